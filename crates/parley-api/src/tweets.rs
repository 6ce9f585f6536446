use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

const TWEET_FIELDS: [(&str, &str); 4] = [
    ("expansions", "author_id,referenced_tweets.id,attachments.media_keys"),
    (
        "tweet.fields",
        "created_at,conversation_id,in_reply_to_user_id,referenced_tweets,text,public_metrics",
    ),
    ("user.fields", "name,username,profile_image_url,verified"),
    ("media.fields", "url,preview_image_url"),
];

#[derive(Debug, Deserialize)]
pub struct TweetQuery {
    pub username: Option<String>,
}

/// A Twitter handle: 1-15 ASCII letters, digits or underscores. It is
/// interpolated into the upstream URL path, so nothing else gets through.
fn required_username(query: TweetQuery) -> Result<String, ApiError> {
    let username = query
        .username
        .map(|u| u.trim().trim_start_matches('@').to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| ApiError::bad_request("Username is required"))?;
    let valid = username.len() <= 15
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ApiError::bad_request("Username is not a valid Twitter handle"));
    }
    Ok(username)
}

fn bearer_token(state: &AppState) -> Result<String, ApiError> {
    state
        .config
        .tweets
        .bearer_token
        .clone()
        .ok_or_else(|| ApiError::Misconfigured("Twitter API configuration is missing".into()))
}

async fn get_json(
    state: &AppState,
    token: &str,
    path: &str,
    query: &[(&str, &str)],
) -> Result<Value, ApiError> {
    let url = format!("{}/{}", state.config.tweets.api_base.trim_end_matches('/'), path);
    let body: Value = state
        .http
        .get(&url)
        .bearer_auth(token)
        .query(query)
        .send()
        .await
        .map_err(|e| ApiError::Upstream(format!("Tweet API request failed: {}", e)))?
        .json()
        .await
        .map_err(|e| ApiError::Upstream(format!("Tweet API returned invalid JSON: {}", e)))?;

    if let Some(message) = first_error(&body) {
        return Err(ApiError::Upstream(message));
    }
    Ok(body)
}

/// The message of the first entry in an `errors` array, if any.
fn first_error(body: &Value) -> Option<String> {
    let first = body.get("errors")?.as_array()?.first()?;
    Some(
        first
            .get("message")
            .or_else(|| first.get("detail"))
            .and_then(Value::as_str)
            .unwrap_or("Tweet API error")
            .to_string(),
    )
}

/// Look the user up by handle, then fetch their recent tweets with authors
/// and media merged in.
async fn fetch_user_tweets(state: &AppState, token: &str, username: &str) -> Result<Value, ApiError> {
    let user = get_json(state, token, &format!("2/users/by/username/{}", username), &[]).await?;
    let user_id = user
        .pointer("/data/id")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::not_found("Twitter user not found"))?
        .to_string();

    let mut tweets = get_json(state, token, &format!("2/users/{}/tweets", user_id), &TWEET_FIELDS).await?;
    if tweets.get("data").is_none_or(Value::is_null) {
        return Err(ApiError::not_found("No tweets found"));
    }

    merge_includes(&mut tweets);
    Ok(tweets)
}

/// Copy `includes.users` and `includes.media` onto each tweet as `author`
/// and `media`.
pub fn merge_includes(body: &mut Value) {
    let users = body.pointer("/includes/users").cloned().unwrap_or(Value::Null);
    let media = body.pointer("/includes/media").cloned().unwrap_or(Value::Null);
    let (Some(users), Some(tweets)) = (
        users.as_array(),
        body.get_mut("data").and_then(Value::as_array_mut),
    ) else {
        return;
    };

    for tweet in tweets.iter_mut() {
        let author = tweet
            .get("author_id")
            .and_then(|id| users.iter().find(|u| u.get("id") == Some(id)))
            .cloned();

        let attached: Vec<Value> = tweet
            .pointer("/attachments/media_keys")
            .and_then(Value::as_array)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| {
                        media
                            .as_array()?
                            .iter()
                            .find(|m| m.get("media_key") == Some(key))
                            .cloned()
                    })
                    .collect()
            })
            .unwrap_or_default();

        if let Some(obj) = tweet.as_object_mut() {
            obj.insert("author".into(), author.unwrap_or(Value::Null));
            obj.insert("media".into(), Value::Array(attached));
        }
    }
}

/// GET /api/tweets?username=...
pub async fn list_tweets(
    State(state): State<AppState>,
    Query(query): Query<TweetQuery>,
) -> Result<Json<Value>, ApiError> {
    let username = required_username(query)?;
    let token = bearer_token(&state)?;
    debug!("Fetching tweets for {}", username);
    Ok(Json(fetch_user_tweets(&state, &token, &username).await?))
}

/// GET /api/tweets/thread/{id}: every tweet in the conversation.
pub async fn tweet_thread(
    State(state): State<AppState>,
    Path(tweet_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if tweet_id.is_empty() || !tweet_id.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::bad_request("Tweet ID is required"));
    }
    let token = bearer_token(&state)?;

    let query = format!("conversation_id:{}", tweet_id);
    let mut thread = get_json(
        &state,
        &token,
        "2/tweets/search/recent",
        &[
            ("query", query.as_str()),
            ("expansions", "author_id,referenced_tweets.id"),
            ("user.fields", "profile_image_url"),
        ],
    )
    .await?;
    merge_includes(&mut thread);
    Ok(Json(thread))
}

/// GET /api/tweets/stream?username=...: server-sent events carrying the
/// user's latest tweet, polled on the configured interval.
pub async fn tweet_stream(
    State(state): State<AppState>,
    Query(query): Query<TweetQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let username = required_username(query)?;
    let token = bearer_token(&state)?;
    let poll_interval = state.config.tweets.poll_interval;

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(poll_interval);
        loop {
            ticker.tick().await;
            match fetch_user_tweets(&state, &token, &username).await {
                Ok(tweets) => {
                    if let Some(latest) = tweets.pointer("/data/0") {
                        yield Ok(Event::default().data(latest.to_string()));
                    }
                }
                Err(e) => warn!("Error checking for new tweets for {}: {}", username, e),
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn authors_and_media_are_merged_onto_tweets() {
        let mut body = json!({
            "data": [
                {"id": "1", "author_id": "42", "attachments": {"media_keys": ["m1", "missing"]}},
                {"id": "2", "author_id": "7"}
            ],
            "includes": {
                "users": [{"id": "42", "username": "austen"}],
                "media": [{"media_key": "m1", "url": "https://img"}]
            }
        });

        merge_includes(&mut body);

        assert_eq!(body["data"][0]["author"]["username"], "austen");
        assert_eq!(body["data"][0]["media"], json!([{"media_key": "m1", "url": "https://img"}]));
        assert_eq!(body["data"][1]["author"], Value::Null);
        assert_eq!(body["data"][1]["media"], json!([]));
    }

    #[test]
    fn upstream_errors_surface_their_message() {
        let body = json!({"errors": [{"message": "Rate limit exceeded"}]});
        assert_eq!(first_error(&body).as_deref(), Some("Rate limit exceeded"));
        assert_eq!(first_error(&json!({"data": []})), None);
    }

    #[test]
    fn username_is_required_and_loses_its_at_sign() {
        let ok = required_username(TweetQuery { username: Some(" @austen ".into()) });
        assert_eq!(ok.unwrap(), "austen");
        assert!(required_username(TweetQuery { username: None }).is_err());
        assert!(required_username(TweetQuery { username: Some("@".into()) }).is_err());
    }

    #[test]
    fn username_cannot_reach_other_upstream_paths() {
        let name = |u: &str| required_username(TweetQuery { username: Some(u.into()) });
        assert_eq!(name("jack_dorsey").unwrap(), "jack_dorsey");
        assert!(name("x/../../2/foo").is_err());
        assert!(name("a?b=c").is_err());
        assert!(name("sixteen_chars_xx").is_err());
        assert!(name("café").is_err());
    }
}
