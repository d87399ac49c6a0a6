use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parse { message: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("Page blocked: {reason}")]
    Blocked { reason: String },

    #[error("Sort by newest failed: {0}")]
    Sort(String),

    #[error("Timed out after {waited_secs}s waiting for '{selector}'")]
    ContentTimeout { selector: String, waited_secs: u64 },

    #[error("Currency lookup failed: {0}")]
    CurrencyLookup(String),

    #[error("Failed to persist {path}: {message}")]
    Persistence { path: String, message: String },

    #[error("Notification via {channel} failed: {message}")]
    Notification {
        channel: String,
        message: String,
        retry_after: Option<u64>,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn notification(channel: &str, message: impl Into<String>) -> Self {
        AppError::Notification {
            channel: channel.to_string(),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn persistence(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        AppError::Persistence {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Failures that leave the browser page in a state worth capturing.
    pub fn wants_capture(&self) -> bool {
        matches!(
            self,
            AppError::Sort(_) | AppError::ContentTimeout { .. } | AppError::Blocked { .. }
        )
    }
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
