use thiserror::Error;

/// Main error type for the prediction pipeline
#[derive(Error, Debug)]
pub enum AugurError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    // Input validation errors (fail fast, no side effects)
    #[error("Validation failed: {0}")]
    Validation(String),

    // Pipeline stage errors
    #[error("Stage {stage} failed: {message}")]
    Stage { stage: String, message: String },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for AugurError
pub type Result<T> = std::result::Result<T, AugurError>;

impl AugurError {
    /// Wrap an error raised inside a pipeline stage
    pub fn stage(stage: impl Into<String>, message: impl Into<String>) -> Self {
        AugurError::Stage {
            stage: stage.into(),
            message: message.into(),
        }
    }
}
