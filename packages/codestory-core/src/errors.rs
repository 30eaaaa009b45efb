//! Error types for codestory-core
//!
//! One unified error enum for the pipeline; the CLI maps variants to
//! process exit codes.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// User declined the proposed plan or cancelled the run
    #[error("aborted: {0}")]
    UserAbort(String),

    /// Chunk arithmetic produced an inconsistent result
    #[error("chunking invariant violated: {0}")]
    ChunkingInvariantViolated(String),

    /// Chunk -> group partition was broken
    #[error("semantic partition violated: {0}")]
    SemanticPartitionViolated(String),

    /// Repository gateway failure (subprocess git, object IO)
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Destination ref moved between start and finalize
    #[error("concurrent ref update on {reference}: expected {expected}, found {found}")]
    RefCasFailed {
        reference: String,
        expected: String,
        found: String,
    },

    /// Syntax error in a source file (fatal only with fail_on_syntax_errors)
    #[error("parse error in {file}: {message}")]
    Parse { file: String, message: String },

    /// Model capability failed after all retries
    #[error("model error: {0}")]
    Model(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl CoreError {
    pub fn gateway(msg: impl Into<String>) -> Self {
        CoreError::Gateway(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        CoreError::Model(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }

    pub fn cancelled() -> Self {
        CoreError::UserAbort("cancellation requested".to_string())
    }

    /// Process exit code for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::UserAbort(_) => 1,
            CoreError::ChunkingInvariantViolated(_) | CoreError::SemanticPartitionViolated(_) => 2,
            CoreError::Gateway(_) | CoreError::Io(_) => 3,
            CoreError::Model(_) => 4,
            CoreError::RefCasFailed { .. } => 5,
            CoreError::Parse { .. } => 2,
            CoreError::Config(_) => 1,
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CoreError::UserAbort("no".into()).exit_code(), 1);
        assert_eq!(
            CoreError::ChunkingInvariantViolated("x".into()).exit_code(),
            2
        );
        assert_eq!(CoreError::gateway("boom").exit_code(), 3);
        assert_eq!(CoreError::model("boom").exit_code(), 4);
        assert_eq!(
            CoreError::RefCasFailed {
                reference: "refs/heads/main".into(),
                expected: "a".into(),
                found: "b".into(),
            }
            .exit_code(),
            5
        );
    }
}
