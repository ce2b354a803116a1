//! Natural-language insight over device readings, backed by a remote
//! text-generation service.
//!
//! The client rotates through a pool of API keys when a key runs out of
//! quota, and every public operation degrades to a fixed fallback payload
//! instead of failing.

mod client;
mod credentials;
mod gemini;
mod prompt;

pub use client::{strip_code_fence, InsightClient};
pub use credentials::CredentialPool;
pub use gemini::GeminiBackend;
pub use prompt::Language;

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by a text backend for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status: {status:?})")]
pub struct BackendError {
    pub status: Option<u16>,
    pub message: String,
}

impl BackendError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Rate limiting and quota exhaustion are recoverable with another key.
    pub fn is_quota(&self) -> bool {
        if self.status == Some(429) {
            return true;
        }
        let message = self.message.to_ascii_lowercase();
        message.contains("429") || message.contains("quota") || message.contains("limit")
    }
}

#[derive(Debug, Error)]
pub enum InsightError {
    #[error("Insight service not configured: no API keys")]
    ServiceUnconfigured,

    #[error("Quota exhausted for current key: {message}")]
    QuotaExhausted { status: Option<u16>, message: String },

    #[error("All API keys exhausted after {attempts} attempts")]
    AllKeysExhausted { attempts: usize },

    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("Failed to build prompt: {0}")]
    Prompt(#[from] serde_json::Error),
}

impl From<BackendError> for InsightError {
    fn from(err: BackendError) -> Self {
        if err.is_quota() {
            InsightError::QuotaExhausted {
                status: err.status,
                message: err.message,
            }
        } else {
            InsightError::Upstream {
                status: err.status,
                message: err.message,
            }
        }
    }
}

/// A remote text-generation capability, called with one key at a time.
#[async_trait]
pub trait TextBackend: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_classification() {
        assert!(BackendError::new(Some(429), "Too Many Requests").is_quota());
        assert!(BackendError::new(None, "got HTTP 429 from upstream").is_quota());
        assert!(BackendError::new(Some(400), "Quota exceeded for metric").is_quota());
        assert!(BackendError::new(Some(403), "Rate LIMIT reached").is_quota());
        assert!(!BackendError::new(Some(500), "internal error").is_quota());
        assert!(!BackendError::new(None, "connection reset").is_quota());
    }

    #[test]
    fn test_backend_error_conversion() {
        let quota: InsightError = BackendError::new(Some(429), "slow down").into();
        assert!(matches!(quota, InsightError::QuotaExhausted { status: Some(429), .. }));

        let other: InsightError = BackendError::new(Some(401), "bad key").into();
        assert!(matches!(other, InsightError::Upstream { status: Some(401), .. }));
    }
}
