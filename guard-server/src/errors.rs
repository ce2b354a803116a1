use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("Auth error: {0}")]
    Auth(String),
}

impl Error {
    /// Storage failures are the only class allowed to reach the API boundary as a hard error.
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::StorageUnavailable(_) | Error::Migration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
