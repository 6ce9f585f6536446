use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{
    Extension, Json,
    extract::{Query, State},
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand::Rng;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::{is_unique_violation, timestamp_now};
use parley_types::api::{
    AuthCodeResponse, Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse,
};

use crate::error::ApiError;
use crate::middleware::{SESSION_COOKIE, with_workspace, workspace_param};
use crate::state::AppState;

/// Authorization codes are single use and expire after five minutes.
pub const AUTH_CODE_TTL: Duration = Duration::from_secs(5 * 60);

const AUTH_CODE_LEN: usize = 32;

struct PendingCode {
    user_id: Uuid,
    username: String,
    expires_at: Instant,
}

/// Outstanding authorization codes, held in memory only.
#[derive(Default)]
pub struct AuthCodes {
    codes: Mutex<HashMap<String, PendingCode>>,
}

impl AuthCodes {
    pub fn issue(&self, user_id: Uuid, username: &str) -> String {
        let code: String = rand::rng()
            .sample_iter(&rand::distr::Alphanumeric)
            .take(AUTH_CODE_LEN)
            .map(char::from)
            .collect();

        let mut codes = self.codes.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        codes.retain(|_, pending| pending.expires_at > now);
        codes.insert(
            code.clone(),
            PendingCode {
                user_id,
                username: username.to_string(),
                expires_at: now + AUTH_CODE_TTL,
            },
        );
        code
    }

    /// Consume a code. Unknown, reused and expired codes all yield `None`.
    pub fn redeem(&self, code: &str) -> Option<(Uuid, String)> {
        let pending = self
            .codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(code)?;
        (pending.expires_at > Instant::now()).then_some((pending.user_id, pending.username))
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if !email.contains('@') {
        return Err(ApiError::bad_request("A valid email is required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("Password must be at least 8 characters"));
    }

    let username = resolve_username(req.username.as_deref(), &email)?;

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    let (email_c, username_c) = (email.clone(), username.clone());
    state
        .run_db(move |db| {
            if db.get_user_by_email(&email_c)?.is_some() {
                return Ok(Err(ApiError::Conflict("Email is already registered".into())));
            }
            if db.get_user_by_username(&username_c)?.is_some() {
                return Ok(Err(ApiError::Conflict("Username is already taken".into())));
            }
            match db.create_user(
                &user_id.to_string(),
                &email_c,
                &username_c,
                &password_hash,
                &timestamp_now(),
            ) {
                Ok(()) => Ok(Ok(())),
                // Lost a race with a concurrent registration.
                Err(e) if is_unique_violation(&e) => Ok(Err(ApiError::Conflict(
                    "Email or username is already taken".into(),
                ))),
                Err(e) => Err(e),
            }
        })
        .await??;

    info!("Registered {} ({})", username, user_id);

    let token = create_token(&state.config.jwt_secret, user_id, &username)?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id,
            username,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let user = state
        .run_db(move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| anyhow::anyhow!("stored hash for {} is invalid: {}", user.id, e))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| anyhow::anyhow!("corrupt user id '{}': {}", user.id, e))?;

    let token = create_token(&state.config.jwt_secret, user_id, &user.username)?;

    Ok(Json(LoginResponse {
        user_id,
        username: user.username,
        token,
    }))
}

/// POST /auth/code: mint a single-use code the callback can exchange for a
/// session cookie.
pub async fn issue_code(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Json<AuthCodeResponse> {
    let code = state.auth_codes.issue(claims.sub, &claims.username);
    Json(AuthCodeResponse {
        code,
        expires_in: AUTH_CODE_TTL.as_secs(),
    })
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
}

/// GET /auth/callback: exchange the code for a session cookie, then land on
/// `/platform`. The redirect happens whether or not the code was valid.
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
    uri: Uri,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let workspace_id = workspace_param(uri.query());
    let target = with_workspace("/platform", workspace_id.as_deref());

    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return Ok((jar, Redirect::to(&target)));
    };

    match state.auth_codes.redeem(&code) {
        Some((user_id, username)) => {
            let token = create_token(&state.config.jwt_secret, user_id, &username)?;
            let cookie = Cookie::build((SESSION_COOKIE, token))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax);
            Ok((jar.add(cookie), Redirect::to(&target)))
        }
        None => {
            warn!("Rejected unknown or expired auth code");
            Ok((jar, Redirect::to(&target)))
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthLanding {
    pub workspace_id: Option<String>,
    /// Name of the workspace the visitor was invited to, if it exists.
    pub joining_workspace_name: Option<String>,
    pub login: String,
    pub register: String,
    pub callback: String,
}

/// GET /auth: what the sign-in page needs to render.
pub async fn landing(State(state): State<AppState>, uri: Uri) -> Result<Json<AuthLanding>, ApiError> {
    let workspace_id = workspace_param(uri.query());

    let joining_workspace_name = match workspace_id.as_deref().map(str::parse::<Uuid>) {
        Some(Ok(id)) => {
            state
                .run_db(move |db| db.get_workspace(&id.to_string()))
                .await?
                .map(|w| w.name)
        }
        _ => None,
    };

    Ok(Json(AuthLanding {
        callback: with_workspace("/auth/callback", workspace_id.as_deref()),
        workspace_id,
        joining_workspace_name,
        login: "/auth/login".into(),
        register: "/auth/register".into(),
    }))
}

/// The requested username, or the email's local part when none was given.
fn resolve_username(requested: Option<&str>, email: &str) -> Result<String, ApiError> {
    if let Some(name) = requested.map(str::trim).filter(|n| !n.is_empty()) {
        validate_username(name)?;
        return Ok(name.to_string());
    }
    let derived = email.split('@').next().unwrap_or_default();
    if validate_username(derived).is_err() {
        return Err(ApiError::bad_request(
            "Username derived from your email must be 3-32 characters; choose a username",
        ));
    }
    Ok(derived.to_string())
}

pub fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < 3 || username.len() > 32 {
        return Err(ApiError::bad_request("Username must be 3-32 characters"));
    }
    Ok(())
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
