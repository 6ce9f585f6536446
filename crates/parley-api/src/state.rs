use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use parley_db::Database;
use parley_gateway::dispatcher::Dispatcher;

use crate::auth::AuthCodes;
use crate::error::ApiError;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

/// Default upload ceiling: 50 MB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

pub struct ApiConfig {
    pub jwt_secret: String,
    pub max_upload_bytes: usize,
    pub tweets: TweetApiConfig,
}

/// Where the tweet proxy forwards to. Without a bearer token the proxy
/// answers every request with a configuration error.
pub struct TweetApiConfig {
    pub api_base: String,
    pub bearer_token: Option<String>,
    pub poll_interval: Duration,
}

impl Default for TweetApiConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.twitter.com".into(),
            bearer_token: None,
            poll_interval: Duration::from_secs(120),
        }
    }
}

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub storage: Arc<Storage>,
    pub config: ApiConfig,
    pub auth_codes: AuthCodes,
    pub http: reqwest::Client,
}

impl AppStateInner {
    pub fn new(
        db: Arc<Database>,
        dispatcher: Dispatcher,
        storage: Arc<Storage>,
        config: ApiConfig,
    ) -> AppState {
        Arc::new(Self {
            db,
            dispatcher,
            storage,
            config,
            auth_codes: AuthCodes::default(),
            http: reqwest::Client::new(),
        })
    }

    /// Run a blocking DB call off the async runtime.
    pub async fn run_db<F, T>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ApiError::Internal(anyhow::anyhow!("blocking task failed"))
            })?
            .map_err(ApiError::Internal)
    }
}
