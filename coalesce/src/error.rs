//! Batching error types.

/// Batching error type.
///
/// Errors are `Clone` because a single batch failure is delivered to every
/// request that was part of that batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// Invalid configuration, raised at construction only.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// The batch function failed for the batch this request belonged to.
    #[error("batch computation failed: {message}")]
    Computation {
        /// Error message reported by the batch function.
        message: String,
    },

    /// The batch function returned a different number of results than keys.
    #[error("batch function returned {actual} results for {expected} keys")]
    ResultCountMismatch {
        /// Number of keys handed to the batch function.
        expected: usize,
        /// Number of results it returned.
        actual: usize,
    },

    /// The batcher has been shut down.
    #[error("batcher is shut down")]
    Shutdown,
}

impl BatchError {
    /// Creates an `InvalidConfig` error.
    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true if the error was raised at construction time.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::InvalidConfig { .. })
    }
}

/// Result type for batching operations.
pub type BatchResult<T> = Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_both_counts() {
        let err = BatchError::ResultCountMismatch {
            expected: 3,
            actual: 2,
        };
        assert_eq!(err.to_string(), "batch function returned 2 results for 3 keys");
    }

    #[test]
    fn test_is_config() {
        assert!(BatchError::invalid_config("nope").is_config());
        assert!(!BatchError::Shutdown.is_config());
    }
}
