use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tangle_objectstorage::{StorableObject, StorageError, StorageResult};
use tangle_types::{MessageId, MilestoneIndex};

/// Milestone that confirmed a message and when.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub index: MilestoneIndex,
    /// Milestone timestamp, seconds since the UNIX epoch.
    pub timestamp: i64,
}

/// Mutable per-message state tracked alongside each stored message.
///
/// Parents are duplicated from the message so traversals need not load the
/// message body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    message_id: MessageId,
    parent1: MessageId,
    parent2: MessageId,
    solid: bool,
    milestone: bool,
    conflicting: bool,
    /// Seconds since the UNIX epoch; zero until the message becomes solid.
    solidification_timestamp: i64,
    confirmation: Option<Confirmation>,
}

impl MessageMetadata {
    pub fn new(message_id: MessageId, parent1: MessageId, parent2: MessageId) -> Self {
        Self {
            message_id,
            parent1,
            parent2,
            solid: false,
            milestone: false,
            conflicting: false,
            solidification_timestamp: 0,
            confirmation: None,
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn parent1(&self) -> MessageId {
        self.parent1
    }

    pub fn parent2(&self) -> MessageId {
        self.parent2
    }

    pub fn is_solid(&self) -> bool {
        self.solid
    }

    /// Mark the message solid (or not). Becoming solid records the
    /// solidification time.
    pub fn set_solid(&mut self, solid: bool) {
        if solid && !self.solid {
            self.solidification_timestamp = unix_now();
        }
        if !solid {
            self.solidification_timestamp = 0;
        }
        self.solid = solid;
    }

    pub fn solidification_timestamp(&self) -> i64 {
        self.solidification_timestamp
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmation.is_some()
    }

    pub fn confirmation(&self) -> Option<Confirmation> {
        self.confirmation
    }

    pub fn set_confirmed(&mut self, index: MilestoneIndex, timestamp: i64) {
        self.confirmation = Some(Confirmation { index, timestamp });
    }

    pub fn clear_confirmed(&mut self) {
        self.confirmation = None;
    }

    pub fn is_milestone(&self) -> bool {
        self.milestone
    }

    pub fn set_milestone(&mut self, milestone: bool) {
        self.milestone = milestone;
    }

    pub fn is_conflicting(&self) -> bool {
        self.conflicting
    }

    pub fn set_conflicting(&mut self, conflicting: bool) {
        self.conflicting = conflicting;
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl StorableObject for MessageMetadata {
    type Key = MessageId;
    const KIND: &'static str = "message metadata";

    fn key(&self) -> MessageId {
        self.message_id
    }

    fn encode(&self) -> StorageResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StorageError::Encode {
            kind: Self::KIND,
            key: self.message_id.to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(key: MessageId, bytes: &[u8]) -> StorageResult<Self> {
        let metadata: Self = bincode::deserialize(bytes).map_err(|e| StorageError::Decode {
            kind: Self::KIND,
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        if metadata.message_id != key {
            return Err(StorageError::Decode {
                kind: Self::KIND,
                key: key.to_string(),
                reason: format!("record belongs to {}", metadata.message_id),
            });
        }
        Ok(metadata)
    }
}
