use tangle_kvstore::KvError;

/// Errors from cached object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The persistent store failed a read, write or delete.
    #[error("persistent store error: {0}")]
    Kv(#[from] KvError),

    /// Persisted bytes could not be decoded into an object.
    #[error("failed to decode {kind} {key}: {reason}")]
    Decode {
        kind: &'static str,
        key: String,
        reason: String,
    },

    /// An object could not be encoded for persistence.
    #[error("failed to encode {kind} {key}: {reason}")]
    Encode {
        kind: &'static str,
        key: String,
        reason: String,
    },

    /// A persisted key does not parse as a key of this storage.
    #[error("invalid {kind} key: {reason}")]
    InvalidKey { kind: &'static str, reason: String },

    /// The storage has been shut down and accepts no further operations.
    #[error("object storage is shut down")]
    ShutDown,

    /// The eviction sweeper needs a Tokio runtime but none is running.
    #[error("no tokio runtime available to run the eviction sweeper")]
    NoRuntime,
}

/// Result alias for object storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
