use thiserror::Error;

use crate::tags::types::RegistryKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Registry unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: retry after {retry_after_secs:?} seconds")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Authentication required for {url}")]
    AuthRequired {
        url: String,
        challenge: Option<String>,
    },

    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Server error: HTTP {status}")]
    Server { status: u16 },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RegistryError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RegistryError::Unavailable(_)
                | RegistryError::RateLimited { .. }
                | RegistryError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_body() || e.is_connect() {
            RegistryError::Unavailable(e.to_string())
        } else if e.is_decode() {
            RegistryError::InvalidResponse(e.to_string())
        } else {
            RegistryError::Unavailable(e.to_string())
        }
    }
}

/// Failure to resolve one repository
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid tag pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("No client configured for registry {0}")]
    UnsupportedRegistry(RegistryKind),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}
