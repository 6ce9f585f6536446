use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-success status. `message` is the
    /// `error` field of its JSON body when there is one.
    #[error("{message} ({status})")]
    Status { status: u16, message: String },

    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),

    #[error("realtime connection failed: {0}")]
    Realtime(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("realtime connection is closed")]
    Disconnected,

    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upload of {file} failed: {reason}")]
    Upload { file: String, reason: String },

    #[error("invalid payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
