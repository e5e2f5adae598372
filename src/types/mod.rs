use crate::db::vectorstore::VectorStoreError;
use crate::evaluation::EvaluationError;
use crate::rag::chunker::ChunkerError;
use crate::rag::embeddings::EmbeddingError;
use crate::utils::toml_config::ConfigError;

// ============= Error Types =============

/// Crate-level error.
///
/// Each component keeps its own error enum so callers can match precisely;
/// `AppError` is what crosses component boundaries and reaches the CLI.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    VectorStore(#[from] VectorStoreError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

impl AppError {
    /// Timeouts and connection failures: the caller may retry with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Embedding(e) => e.is_transient(),
            AppError::VectorStore(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Bad chunk sizes, thresholds or config files. Raised before any I/O.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AppError::Configuration(_)
                | AppError::Config(_)
                | AppError::Chunker(ChunkerError::InvalidConfiguration(_))
                | AppError::Evaluation(EvaluationError::InvalidConfiguration(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout: AppError = EmbeddingError::Timeout.into();
        assert!(timeout.is_transient());

        let network: AppError = EmbeddingError::NetworkError("connection reset".into()).into();
        assert!(network.is_transient());

        let malformed: AppError = EmbeddingError::MalformedResponse {
            reason: "count mismatch".into(),
            response_bytes: 12,
        }
        .into();
        assert!(!malformed.is_transient());
    }

    #[test]
    fn test_configuration_classification() {
        let err: AppError = ChunkerError::InvalidConfiguration("overlap".into()).into();
        assert!(err.is_configuration());
        assert!(!AppError::Cancelled.is_configuration());
    }
}
