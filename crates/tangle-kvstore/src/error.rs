/// Errors from key-value store operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure that is not an I/O error.
    #[error("backend error: {0}")]
    Backend(String),

    /// Storage backend is read-only or otherwise unavailable.
    #[error("store is read-only")]
    ReadOnly,
}

/// Result alias for key-value store operations.
pub type KvResult<T> = Result<T, KvError>;
