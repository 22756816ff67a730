//! Error types for registry and Docker Engine access

use reqwest::StatusCode;
use thiserror::Error;

/// Result alias for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

/// Failures talking to an upstream registry
///
/// A 404 is never represented here where "no data" is a valid answer; callers
/// get `Ok(None)` or an empty list instead.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Timeout, DNS failure, connection reset
    #[error("registry request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Resource does not exist
    #[error("not found: {url}")]
    NotFound { url: String },

    /// 401 or 403 from the registry or its token endpoint
    #[error("registry rejected credentials ({status}) for {url}")]
    Unauthorized { status: StatusCode, url: String },

    /// 429 from the registry
    #[error("registry rate limit reached for {url}")]
    RateLimited { url: String },

    /// Any other non-success status
    #[error("registry returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    /// Malformed response body or header
    #[error("failed to parse registry response: {0}")]
    Parse(String),
}

impl RegistryError {
    /// Classify a non-success HTTP status
    pub fn from_status(status: StatusCode, url: impl Into<String>) -> Self {
        let url = url.into();
        match status {
            StatusCode::NOT_FOUND => Self::NotFound { url },
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::Unauthorized { status, url },
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited { url },
            _ => Self::Status { status, url },
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// Failures from the Docker Engine collaborator
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("docker {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("registry rate limit reached while resolving {image}")]
    RateLimited { image: String },

    #[error("docker engine is not authorized to query {image}")]
    Unauthorized { image: String },

    #[error("docker engine does not support {operation}")]
    Unsupported { operation: String },

    #[error("failed to run docker: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse docker output: {0}")]
    Parse(#[from] serde_json::Error),
}

impl EngineError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_classification() {
        assert!(RegistryError::from_status(StatusCode::NOT_FOUND, "u").is_not_found());
        assert!(RegistryError::from_status(StatusCode::UNAUTHORIZED, "u").is_auth_failure());
        assert!(RegistryError::from_status(StatusCode::FORBIDDEN, "u").is_auth_failure());
        assert!(RegistryError::from_status(StatusCode::TOO_MANY_REQUESTS, "u").is_rate_limited());
        assert!(matches!(
            RegistryError::from_status(StatusCode::BAD_GATEWAY, "u"),
            RegistryError::Status { .. }
        ));
    }
}
