use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Length of a message identifier in bytes.
pub const MESSAGE_ID_LENGTH: usize = 32;

/// Content-addressed identifier of a Tangle message.
///
/// A `MessageId` is the hash of the message's encoded bytes. Identical
/// content always produces the same `MessageId`, so a message can only ever
/// be created once. The same ID keys the message's metadata record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId([u8; MESSAGE_ID_LENGTH]);

impl MessageId {
    /// Create a `MessageId` from a pre-computed hash.
    pub const fn from_hash(hash: [u8; MESSAGE_ID_LENGTH]) -> Self {
        Self(hash)
    }

    /// The null message ID (all zeros). Used as the parent of genesis messages.
    pub const fn null() -> Self {
        Self([0u8; MESSAGE_ID_LENGTH])
    }

    /// Returns `true` if this is the null message ID.
    pub fn is_null(&self) -> bool {
        self.0 == [0u8; MESSAGE_ID_LENGTH]
    }

    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; MESSAGE_ID_LENGTH] {
        &self.0
    }

    /// Build a `MessageId` from a byte slice of exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; MESSAGE_ID_LENGTH] =
            bytes.try_into().map_err(|_| TypeError::InvalidLength {
                expected: MESSAGE_ID_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(arr))
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Short hex representation (first 8 characters).
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.short_hex())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; MESSAGE_ID_LENGTH]> for MessageId {
    fn from(bytes: [u8; MESSAGE_ID_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl From<MessageId> for [u8; MESSAGE_ID_LENGTH] {
    fn from(id: MessageId) -> Self {
        id.0
    }
}

impl AsRef<[u8]> for MessageId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
