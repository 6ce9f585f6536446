use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_api::state::{ApiConfig, DEFAULT_MAX_UPLOAD_BYTES, TweetApiConfig};

/// Secrets that ship in examples and must never reach production.
const PLACEHOLDER_SECRETS: [&str; 3] = ["", "change-me", "dev-secret-change-me"];

/// Server configuration, read from `PARLEY_*` environment variables after
/// `.env` is loaded.
#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    /// Unattached uploads older than this are deleted.
    pub upload_retention: chrono::Duration,
    pub cleanup_interval: Duration,
    pub tweet_api_base: String,
    pub tweet_bearer_token: Option<String>,
    pub tweet_poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let host = get("PARLEY_HOST", "0.0.0.0");
        let port: u16 = parse(&lookup, "PARLEY_PORT", 3000)?;
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .with_context(|| format!("invalid PARLEY_HOST '{}'", host))?;

        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.trim()) {
            bail!("PARLEY_JWT_SECRET must be set to a real secret");
        }

        let retention_hours: i64 = parse(&lookup, "PARLEY_UPLOAD_RETENTION_HOURS", 24)?;
        let poll_secs: u64 = parse(&lookup, "PARLEY_TWEET_POLL_SECS", 120)?;
        if poll_secs == 0 {
            bail!("PARLEY_TWEET_POLL_SECS must be positive");
        }

        Ok(Self {
            addr,
            db_path: get("PARLEY_DB_PATH", "parley.db").into(),
            jwt_secret,
            upload_dir: get("PARLEY_UPLOAD_DIR", "./uploads").into(),
            max_upload_bytes: parse(&lookup, "PARLEY_MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
            upload_retention: chrono::Duration::hours(retention_hours),
            cleanup_interval: Duration::from_secs(parse(&lookup, "PARLEY_CLEANUP_INTERVAL_SECS", 3600)?),
            tweet_api_base: get("TWITTER_API_BASE", "https://api.twitter.com"),
            tweet_bearer_token: lookup("TWITTER_BEARER_TOKEN").filter(|t| !t.trim().is_empty()),
            tweet_poll_interval: Duration::from_secs(poll_secs),
        })
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            jwt_secret: self.jwt_secret.clone(),
            max_upload_bytes: self.max_upload_bytes,
            tweets: TweetApiConfig {
                api_base: self.tweet_api_base.clone(),
                bearer_token: self.tweet_bearer_token.clone(),
                poll_interval: self.tweet_poll_interval,
            },
        }
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {} '{}': {}", key, raw, e)),
    }
}
