//! Operation error type

use thiserror::Error;

/// Why a background operation did not produce a result
#[derive(Error, Debug)]
pub enum OperationError {
    /// The task's cancellation token fired
    #[error("Cancelled")]
    Cancelled,

    /// The connection to whatever runs the operation dropped
    #[error("connection lost: {0}")]
    Network(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

impl OperationError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(anyhow::anyhow!("{}", message))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        assert_eq!(OperationError::Cancelled.to_string(), "Cancelled");
        assert_eq!(
            OperationError::network("reset by peer").to_string(),
            "connection lost: reset by peer"
        );
        assert_eq!(OperationError::failed("pull failed").to_string(), "pull failed");
    }
}
