use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required configuration: {0}")]
    MissingCredential(String),

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} error: {message}")]
    Provider { provider: String, message: String },

    #[error("{provider} authentication failed: {message}")]
    Auth { provider: String, message: String },

    #[error("Storage error on {table}: {message}")]
    Storage { table: String, message: String },

    #[error("Unique constraint violated on {table}: {message}")]
    Conflict { table: String, message: String },

    #[error("Checkpoint store error: {0}")]
    Meta(#[from] rusqlite::Error),

    #[error("Request timed out after {0}s")]
    Timeout(u64),
}

impl IngestError {
    /// True when the provider answered but the response was unusable (status or body),
    /// as opposed to a transport failure.
    pub fn is_provider_response(&self) -> bool {
        matches!(
            self,
            IngestError::Status { .. } | IngestError::Json(_) | IngestError::Provider { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
