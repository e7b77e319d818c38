use tangle_objectstorage::StorageError;

use crate::config::ConfigError;

/// Errors from the message and metadata stores.
#[derive(Debug, thiserror::Error)]
pub enum TangleError {
    /// Failure in the underlying object storage.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The raw message cannot be encoded or decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Cache configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result alias for Tangle store operations.
pub type TangleResult<T> = Result<T, TangleError>;
