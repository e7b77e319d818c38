//! Typed notifications fired by [`MessagesStorage`](crate::MessagesStorage).
//!
//! Every handler receives its own retained handle and is responsible for
//! releasing it (dropping it is enough).

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tangle_types::MilestoneIndex;

use crate::cached::{CachedMessage, CachedMetadata};

type NewMessageHandler = Arc<dyn Fn(CachedMessage, MilestoneIndex, MilestoneIndex) + Send + Sync>;
type MetadataHandler = Arc<dyn Fn(CachedMetadata) + Send + Sync>;
type ConfirmedHandler = Arc<dyn Fn(CachedMetadata, MilestoneIndex, i64) + Send + Sync>;

/// Handler registry for message lifecycle events.
#[derive(Default)]
pub struct TangleEvents {
    received_new_message: RwLock<Vec<NewMessageHandler>>,
    message_solid: RwLock<Vec<MetadataHandler>>,
    message_confirmed: RwLock<Vec<ConfirmedHandler>>,
}

impl TangleEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for each message stored for the first time, with the latest
    /// and latest solid milestone indices known at that point.
    pub fn on_received_new_message(
        &self,
        handler: impl Fn(CachedMessage, MilestoneIndex, MilestoneIndex) + Send + Sync + 'static,
    ) {
        self.received_new_message.write().push(Arc::new(handler));
    }

    /// Called when a message becomes solid.
    pub fn on_message_solid(&self, handler: impl Fn(CachedMetadata) + Send + Sync + 'static) {
        self.message_solid.write().push(Arc::new(handler));
    }

    /// Called when a message is confirmed, with the confirming milestone
    /// index and its timestamp.
    pub fn on_message_confirmed(
        &self,
        handler: impl Fn(CachedMetadata, MilestoneIndex, i64) + Send + Sync + 'static,
    ) {
        self.message_confirmed.write().push(Arc::new(handler));
    }

    pub fn trigger_received_new_message(
        &self,
        message: &CachedMessage,
        latest_milestone: MilestoneIndex,
        latest_solid_milestone: MilestoneIndex,
    ) {
        // Snapshot so handlers may register further handlers.
        let handlers = self.received_new_message.read().clone();
        for handler in handlers {
            handler(message.retain(), latest_milestone, latest_solid_milestone);
        }
    }

    pub fn trigger_message_solid(&self, metadata: &CachedMetadata) {
        let handlers = self.message_solid.read().clone();
        for handler in handlers {
            handler(metadata.retain());
        }
    }

    pub fn trigger_message_confirmed(
        &self,
        metadata: &CachedMetadata,
        index: MilestoneIndex,
        timestamp: i64,
    ) {
        let handlers = self.message_confirmed.read().clone();
        for handler in handlers {
            handler(metadata.retain(), index, timestamp);
        }
    }

    /// Remove every registered handler.
    pub fn clear(&self) {
        self.received_new_message.write().clear();
        self.message_solid.write().clear();
        self.message_confirmed.write().clear();
    }
}

impl fmt::Debug for TangleEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TangleEvents")
            .field("received_new_message", &self.received_new_message.read().len())
            .field("message_solid", &self.message_solid.read().len())
            .field("message_confirmed", &self.message_confirmed.read().len())
            .finish()
    }
}
