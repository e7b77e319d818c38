use std::fmt;
use std::hash::Hash;

use tangle_types::MessageId;

use crate::error::{StorageError, StorageResult};

/// Key of a cached object.
///
/// Keys are small `Copy` values with a byte encoding used as the key inside
/// the storage realm. The byte encoding must preserve ordering so realm
/// scans visit keys in order.
pub trait ObjectKey:
    Copy + Eq + Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Encode the key as realm key bytes.
    fn to_key_bytes(&self) -> Vec<u8>;

    /// Decode a key from realm key bytes.
    fn from_key_bytes(bytes: &[u8]) -> StorageResult<Self>;
}

impl ObjectKey for MessageId {
    fn to_key_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn from_key_bytes(bytes: &[u8]) -> StorageResult<Self> {
        MessageId::from_slice(bytes).map_err(|e| StorageError::InvalidKey {
            kind: "message id",
            reason: e.to_string(),
        })
    }
}

/// An object that can live in an [`ObjectStorage`](crate::ObjectStorage).
pub trait StorableObject: Sized + Send + 'static {
    /// The key type identifying objects of this kind.
    type Key: ObjectKey;

    /// Human-readable kind name, used in logs and errors.
    const KIND: &'static str;

    /// The key this object is stored under.
    fn key(&self) -> Self::Key;

    /// Encode the object into the bytes persisted in the realm.
    fn encode(&self) -> StorageResult<Vec<u8>>;

    /// Decode an object previously persisted under `key`.
    fn decode(key: Self::Key, bytes: &[u8]) -> StorageResult<Self>;
}
