use serde::{Deserialize, Serialize};
use tangle_objectstorage::{StorableObject, StorageError, StorageResult};
use tangle_types::{ContentHasher, MessageId};

use crate::error::{TangleError, TangleResult};

/// The wire-independent content of a ledger message.
///
/// A message references two parents (which may be equal) and carries an
/// opaque payload. Its ID is the content hash of the encoded form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    pub parent1: MessageId,
    pub parent2: MessageId,
    pub nonce: u64,
    pub payload: Vec<u8>,
}

impl RawMessage {
    pub fn new(parent1: MessageId, parent2: MessageId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            parent1,
            parent2,
            nonce: 0,
            payload: payload.into(),
        }
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    /// Canonical byte encoding.
    pub fn to_bytes(&self) -> TangleResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TangleError::InvalidMessage(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> TangleResult<Self> {
        bincode::deserialize(bytes).map_err(|e| TangleError::InvalidMessage(e.to_string()))
    }

    /// Content-derived message ID.
    pub fn id(&self) -> TangleResult<MessageId> {
        Ok(ContentHasher::MESSAGE.hash(&self.to_bytes()?))
    }
}

/// An immutable, content-addressed ledger message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    id: MessageId,
    raw: RawMessage,
    bytes: Vec<u8>,
}

impl Message {
    /// Build a message from its content, deriving the ID.
    pub fn from_raw(raw: RawMessage) -> TangleResult<Self> {
        let bytes = raw.to_bytes()?;
        Ok(Self {
            id: ContentHasher::MESSAGE.hash(&bytes),
            raw,
            bytes,
        })
    }

    /// Parse a message from its encoded bytes, deriving the ID.
    pub fn from_bytes(bytes: Vec<u8>) -> TangleResult<Self> {
        let raw = RawMessage::from_bytes(&bytes)?;
        Ok(Self {
            id: ContentHasher::MESSAGE.hash(&bytes),
            raw,
            bytes,
        })
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn parent1(&self) -> MessageId {
        self.raw.parent1
    }

    pub fn parent2(&self) -> MessageId {
        self.raw.parent2
    }

    /// Distinct parents, `parent1` first.
    pub fn parents(&self) -> Vec<MessageId> {
        if self.raw.parent1 == self.raw.parent2 {
            vec![self.raw.parent1]
        } else {
            vec![self.raw.parent1, self.raw.parent2]
        }
    }

    pub fn nonce(&self) -> u64 {
        self.raw.nonce
    }

    pub fn payload(&self) -> &[u8] {
        &self.raw.payload
    }

    pub fn raw(&self) -> &RawMessage {
        &self.raw
    }

    /// The encoded bytes the ID was derived from.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl StorableObject for Message {
    type Key = MessageId;
    const KIND: &'static str = "message";

    fn key(&self) -> MessageId {
        self.id
    }

    fn encode(&self) -> StorageResult<Vec<u8>> {
        Ok(self.bytes.clone())
    }

    fn decode(key: MessageId, bytes: &[u8]) -> StorageResult<Self> {
        let decode_error = |reason: String| StorageError::Decode {
            kind: Self::KIND,
            key: key.to_string(),
            reason,
        };
        let raw: RawMessage =
            bincode::deserialize(bytes).map_err(|e| decode_error(e.to_string()))?;
        let computed = ContentHasher::MESSAGE.hash(bytes);
        if computed != key {
            return Err(decode_error(format!("content hash mismatch: computed {computed}")));
        }
        Ok(Self {
            id: key,
            raw,
            bytes: bytes.to_vec(),
        })
    }
}
