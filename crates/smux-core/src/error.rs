//! Error types for core domain operations.

use thiserror::Error;

/// Errors that can occur in registry and store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An entry with this key is already present.
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    /// No entry with this key exists.
    #[error("not found: {key}")]
    NotFound { key: String },
}

impl CoreError {
    /// Creates a `DuplicateKey` error from any displayable key.
    pub fn duplicate<K: std::fmt::Display>(key: K) -> Self {
        Self::DuplicateKey {
            key: key.to_string(),
        }
    }

    /// Creates a `NotFound` error from any displayable key.
    pub fn not_found<K: std::fmt::Display>(key: K) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            CoreError::duplicate("work").to_string(),
            "duplicate key: work"
        );
        assert_eq!(CoreError::not_found(7).to_string(), "not found: 7");
    }
}
