use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed input: bad query, dimension mismatch, unknown filter column.
    /// Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Row or vector not present in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// Embedding or generation backend failed in a way that may succeed on
    /// retry (timeout, rate limit, connection reset).
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// The generation backend rejected the request outright (invalid prompt,
    /// unknown model). Retrying cannot help.
    #[error("backend error: {0}")]
    Backend(String),

    /// The id mapping between rows and vectors is broken. The affected index
    /// refuses further writes once this is raised.
    #[error("consistency error: {0}")]
    Consistency(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Validation(err.to_string())
    }

    pub fn transient<E: std::fmt::Display>(err: E) -> Self {
        EngineError::TransientBackend(err.to_string())
    }

    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Internal(err.to_string())
    }

    /// Whether the pipeline layer may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::TransientBackend(_))
    }

    /// Whether this error signals a broken store invariant.
    pub fn is_consistency(&self) -> bool {
        matches!(self, EngineError::Consistency(_))
    }
}
