//! Handles over the message and metadata stores.
//!
//! A [`CachedMessage`] owns one reference on a message entry and one on its
//! metadata entry. Every consuming method releases both, whichever side it
//! actually hands to the closure.

use std::slice;
use std::vec;

use tangle_objectstorage::{CachedObject, ObjectGuard, ObjectMut};
use tangle_types::MessageId;

use crate::message::Message;
use crate::metadata::MessageMetadata;

/// Joint handle on a message and its metadata.
#[derive(Debug)]
pub struct CachedMessage {
    message: CachedObject<Message>,
    metadata: CachedObject<MessageMetadata>,
}

impl CachedMessage {
    pub(crate) fn new(message: CachedObject<Message>, metadata: CachedObject<MessageMetadata>) -> Self {
        Self { message, metadata }
    }

    pub fn message_id(&self) -> MessageId {
        self.message.key()
    }

    /// Whether the message exists.
    pub fn exists(&self) -> bool {
        self.message.exists()
    }

    /// Read access to the message. The entry stays locked while the guard
    /// lives.
    pub fn message(&self) -> Option<ObjectGuard<'_, Message>> {
        self.message.get()
    }

    /// Read access to the metadata. The entry stays locked while the guard
    /// lives.
    pub fn metadata(&self) -> Option<ObjectGuard<'_, MessageMetadata>> {
        self.metadata.get()
    }

    /// A standalone metadata handle holding its own reference.
    #[track_caller]
    pub fn cached_metadata(&self) -> CachedMetadata {
        CachedMetadata::new(self.metadata.retain())
    }

    /// Take another reference on both sides.
    #[track_caller]
    pub fn retain(&self) -> Self {
        Self {
            message: self.message.retain(),
            metadata: self.metadata.retain(),
        }
    }

    /// Release both references.
    pub fn release(self, force: bool) {
        self.message.release(force);
        self.metadata.release(force);
    }

    /// Run `consumer` with the message and mutable metadata, then release
    /// both references.
    pub fn consume_message_and_metadata<R>(
        self,
        consumer: impl FnOnce(&Message, &mut ObjectMut<'_, MessageMetadata>) -> R,
    ) -> Option<R> {
        let Self { message, metadata } = self;
        message
            .consume(move |msg| metadata.consume(|meta| consumer(&**msg, meta)))
            .flatten()
    }

    /// Run `consumer` with the message, then release both references.
    pub fn consume_message<R>(self, consumer: impl FnOnce(&Message) -> R) -> Option<R> {
        let Self { message, metadata } = self;
        let result = message.consume(|msg| consumer(&**msg));
        metadata.release(false);
        result
    }

    /// Run `consumer` with mutable metadata, then release both references.
    ///
    /// The metadata entry is locked while `consumer` runs; it must not look
    /// up any message (see the crate docs on lock order).
    pub fn consume_metadata<R>(
        self,
        consumer: impl FnOnce(&mut ObjectMut<'_, MessageMetadata>) -> R,
    ) -> Option<R> {
        let Self { message, metadata } = self;
        let result = metadata.consume(consumer);
        message.release(false);
        result
    }
}

impl Clone for CachedMessage {
    #[track_caller]
    fn clone(&self) -> Self {
        self.retain()
    }
}

/// Handle on a metadata record alone.
#[derive(Debug)]
pub struct CachedMetadata {
    metadata: CachedObject<MessageMetadata>,
}

impl CachedMetadata {
    pub(crate) fn new(metadata: CachedObject<MessageMetadata>) -> Self {
        Self { metadata }
    }

    pub fn message_id(&self) -> MessageId {
        self.metadata.key()
    }

    pub fn exists(&self) -> bool {
        self.metadata.exists()
    }

    pub fn metadata(&self) -> Option<ObjectGuard<'_, MessageMetadata>> {
        self.metadata.get()
    }

    #[track_caller]
    pub fn retain(&self) -> Self {
        Self::new(self.metadata.retain())
    }

    pub fn release(self, force: bool) {
        self.metadata.release(force);
    }

    /// Run `consumer` with mutable metadata, then release the reference.
    ///
    /// Must not look up or store messages from inside `consumer`: the
    /// metadata entry is locked, and creators lock message entries before
    /// metadata entries.
    pub fn consume<R>(self, consumer: impl FnOnce(&mut ObjectMut<'_, MessageMetadata>) -> R) -> Option<R> {
        self.metadata.consume(consumer)
    }
}

impl Clone for CachedMetadata {
    #[track_caller]
    fn clone(&self) -> Self {
        self.retain()
    }
}

/// A batch of message handles, retained and released together.
#[derive(Debug, Default)]
pub struct CachedMessages(Vec<CachedMessage>);

impl CachedMessages {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, message: CachedMessage) {
        self.0.push(message);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> slice::Iter<'_, CachedMessage> {
        self.0.iter()
    }

    /// Take another reference on every message in the batch.
    #[track_caller]
    pub fn retain(&self) -> Self {
        Self(self.0.iter().map(CachedMessage::retain).collect())
    }

    pub fn release(self, force: bool) {
        for message in self.0 {
            message.release(force);
        }
    }
}

impl FromIterator<CachedMessage> for CachedMessages {
    fn from_iter<I: IntoIterator<Item = CachedMessage>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for CachedMessages {
    type Item = CachedMessage;
    type IntoIter = vec::IntoIter<CachedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a CachedMessages {
    type Item = &'a CachedMessage;
    type IntoIter = slice::Iter<'a, CachedMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
