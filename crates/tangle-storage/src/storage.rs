use std::panic::Location;
use std::sync::Arc;

use tangle_kvstore::{KvStore, Realm};
use tangle_objectstorage::{
    CachedObject, ObjectStorage, StorageOptions, StorageResult, SweepReport,
};
use tangle_types::{MessageId, MilestoneIndex};
use tracing::{debug, warn};

use crate::cached::{CachedMessage, CachedMetadata};
use crate::config::CacheOpts;
use crate::error::TangleResult;
use crate::events::TangleEvents;
use crate::message::{Message, RawMessage};
use crate::metadata::MessageMetadata;

/// Realm prefix of the message store.
pub const STORE_PREFIX_MESSAGES: u8 = 1;
/// Realm prefix of the message metadata store.
pub const STORE_PREFIX_MESSAGE_METADATA: u8 = 2;

/// The message store and its metadata store, kept in lockstep.
///
/// Metadata exists for a message ID if and only if the message exists:
/// both are created inside one compute-if-absent critical section keyed by
/// the message ID, and deleted together (metadata first).
#[derive(Clone, Debug)]
pub struct MessagesStorage {
    messages: ObjectStorage<Message>,
    metadata: ObjectStorage<MessageMetadata>,
    events: Arc<TangleEvents>,
}

impl MessagesStorage {
    /// Open both stores over `store` with the given cache profile.
    ///
    /// Messages are persisted on creation; metadata is persisted when it is
    /// flushed or evicted.
    pub fn new(store: Arc<dyn KvStore>, opts: &CacheOpts) -> Self {
        Self::with_options(store, opts.storage_options(true), opts.storage_options(false))
    }

    pub fn with_options(
        store: Arc<dyn KvStore>,
        message_options: StorageOptions,
        metadata_options: StorageOptions,
    ) -> Self {
        let messages = Realm::new(Arc::clone(&store), vec![STORE_PREFIX_MESSAGES]);
        let metadata = Realm::new(store, vec![STORE_PREFIX_MESSAGE_METADATA]);
        Self {
            messages: ObjectStorage::new(messages, message_options),
            metadata: ObjectStorage::new(metadata, metadata_options),
            events: Arc::new(TangleEvents::new()),
        }
    }

    pub fn events(&self) -> &TangleEvents {
        &self.events
    }

    pub fn message_store(&self) -> &ObjectStorage<Message> {
        &self.messages
    }

    pub fn metadata_store(&self) -> &ObjectStorage<MessageMetadata> {
        &self.metadata
    }

    /// Store a message and its metadata unless the message already exists.
    ///
    /// Returns the joint handle and whether this call created the pair.
    /// Concurrent callers with the same content block until the pair is
    /// complete; exactly one of them observes `true`. On failure neither
    /// record is left behind, and the metadata is removed before the next
    /// creator can enter.
    #[track_caller]
    pub fn store_message_if_absent(&self, raw: RawMessage) -> TangleResult<(CachedMessage, bool)> {
        let location = Location::caller();
        let message = Message::from_raw(raw)?;
        let id = message.id();

        let mut created_metadata: Option<CachedObject<MessageMetadata>> = None;
        let result = self.messages.compute_if_absent_at(
            id,
            location,
            |_| {
                let metadata = MessageMetadata::new(id, message.parent1(), message.parent2());
                created_metadata = Some(self.metadata.store_at(metadata, location)?);
                Ok(message)
            },
            |_| {
                if let Err(err) = self.metadata.delete(id) {
                    warn!(message_id = %id, error = %err, "failed to roll back metadata");
                }
            },
        );

        let (cached_message, created) = match result {
            Ok(pair) => pair,
            Err(err) => {
                // Already detached by the rollback; releasing cannot flush it.
                if let Some(metadata) = created_metadata.take() {
                    metadata.release(true);
                }
                return Err(err.into());
            }
        };

        let cached_metadata = match created_metadata {
            Some(metadata) => metadata,
            None => {
                let metadata = self.metadata.load_at(id, location)?;
                if !metadata.exists() {
                    warn!(message_id = %id, "message exists without metadata");
                }
                metadata
            }
        };
        if created {
            debug!(message_id = %id, "stored new message");
        }
        Ok((CachedMessage::new(cached_message, cached_metadata), created))
    }

    /// Store a message and announce it if it is new.
    ///
    /// Returns the handle and whether the message had already been added.
    /// Handlers of [`TangleEvents::on_received_new_message`] run before this
    /// returns.
    #[track_caller]
    pub fn add_message(
        &self,
        raw: RawMessage,
        latest_milestone: MilestoneIndex,
        latest_solid_milestone: MilestoneIndex,
    ) -> TangleResult<(CachedMessage, bool)> {
        let (cached, created) = self.store_message_if_absent(raw)?;
        if !created {
            return Ok((cached, true));
        }
        self.events
            .trigger_received_new_message(&cached, latest_milestone, latest_solid_milestone);
        Ok((cached, false))
    }

    /// Joint handle on an existing message, or `None`.
    ///
    /// A message without metadata is reported as absent.
    #[track_caller]
    pub fn get_cached_message_or_nil(&self, id: MessageId) -> TangleResult<Option<CachedMessage>> {
        let message = self.messages.load(id)?;
        if !message.exists() {
            message.release(true);
            return Ok(None);
        }

        let metadata = self.metadata.load(id)?;
        if !metadata.exists() {
            warn!(message_id = %id, "message exists without metadata");
            message.release(true);
            metadata.release(true);
            return Ok(None);
        }
        Ok(Some(CachedMessage::new(message, metadata)))
    }

    #[track_caller]
    pub fn get_cached_metadata_or_nil(&self, id: MessageId) -> TangleResult<Option<CachedMetadata>> {
        let metadata = self.metadata.load(id)?;
        if !metadata.exists() {
            metadata.release(true);
            return Ok(None);
        }
        Ok(Some(CachedMetadata::new(metadata)))
    }

    /// Metadata as persisted, bypassing the cache. Unflushed changes are
    /// not visible.
    pub fn get_stored_metadata_or_nil(&self, id: MessageId) -> TangleResult<Option<MessageMetadata>> {
        Ok(self.metadata.load_object_from_store(id)?)
    }

    /// Whether the message exists in the cache or the persistent store.
    pub fn contains_message(&self, id: MessageId) -> TangleResult<bool> {
        Ok(self.messages.contains(id)?)
    }

    /// Whether the message exists in the persistent store.
    pub fn message_exists_in_store(&self, id: MessageId) -> TangleResult<bool> {
        Ok(self.messages.exists_in_store(id)?)
    }

    /// Delete a message and its metadata.
    ///
    /// Metadata goes first: message existence is the authoritative signal,
    /// so a reader that found the message must still find its metadata.
    pub fn delete_message(&self, id: MessageId) -> TangleResult<()> {
        self.metadata.delete(id)?;
        self.messages.delete(id)?;
        debug!(message_id = %id, "deleted message");
        Ok(())
    }

    /// Delete only the metadata of a message.
    pub fn delete_message_metadata(&self, id: MessageId) -> TangleResult<()> {
        Ok(self.metadata.delete(id)?)
    }

    /// Visit every message ID. Without `skip_cache`, cached IDs come before
    /// persisted ones; see [`ObjectStorage::for_each_key`].
    pub fn for_each_message_id(
        &self,
        consumer: impl FnMut(MessageId) -> bool,
        skip_cache: bool,
    ) -> TangleResult<()> {
        Ok(self.messages.for_each_key(consumer, skip_cache)?)
    }

    /// Visit every message ID that has metadata.
    pub fn for_each_metadata_message_id(
        &self,
        consumer: impl FnMut(MessageId) -> bool,
        skip_cache: bool,
    ) -> TangleResult<()> {
        Ok(self.metadata.for_each_key(consumer, skip_cache)?)
    }

    /// Mark a message solid and fire `message_solid` if it was not yet.
    ///
    /// Returns `false` if the metadata does not exist or was already solid.
    #[track_caller]
    pub fn mark_solid(&self, id: MessageId) -> TangleResult<bool> {
        let Some(metadata) = self.get_cached_metadata_or_nil(id)? else {
            return Ok(false);
        };
        let newly_solid = metadata
            .retain()
            .consume(|meta| {
                if meta.is_solid() {
                    return false;
                }
                meta.set_solid(true);
                true
            })
            .unwrap_or(false);
        if newly_solid {
            self.events.trigger_message_solid(&metadata);
        }
        metadata.release(false);
        Ok(newly_solid)
    }

    /// Record the confirming milestone and fire `message_confirmed` if the
    /// message was not confirmed yet.
    #[track_caller]
    pub fn mark_confirmed(
        &self,
        id: MessageId,
        index: MilestoneIndex,
        timestamp: i64,
    ) -> TangleResult<bool> {
        let Some(metadata) = self.get_cached_metadata_or_nil(id)? else {
            return Ok(false);
        };
        let newly_confirmed = metadata
            .retain()
            .consume(|meta| {
                if meta.is_confirmed() {
                    return false;
                }
                meta.set_confirmed(index, timestamp);
                true
            })
            .unwrap_or(false);
        if newly_confirmed {
            self.events
                .trigger_message_confirmed(&metadata, index, timestamp);
        }
        metadata.release(false);
        Ok(newly_confirmed)
    }

    /// Number of persisted messages.
    pub fn size_estimate(&self) -> TangleResult<usize> {
        Ok(self.messages.size_estimate()?)
    }

    /// Number of messages resident in memory.
    pub fn message_storage_size(&self) -> usize {
        self.messages.cached_len()
    }

    /// Start the background eviction sweep of both stores.
    pub fn start_eviction(&self) -> TangleResult<()> {
        self.messages.start_eviction()?;
        self.metadata.start_eviction()?;
        Ok(())
    }

    pub fn stop_eviction(&self) {
        self.messages.stop_eviction();
        self.metadata.stop_eviction();
    }

    /// Run one eviction sweep over both stores.
    pub fn sweep(&self) -> SweepReport {
        let messages = self.messages.sweep();
        let metadata = self.metadata.sweep();
        SweepReport {
            evicted: messages.evicted + metadata.evicted,
            flushed: messages.flushed + metadata.flushed,
            failed: messages.failed + metadata.failed,
            leaks: messages.leaks + metadata.leaks,
        }
    }

    /// Write back all cached changes. Both stores are flushed even if the
    /// first fails.
    pub fn flush(&self) -> TangleResult<()> {
        first_error(self.messages.flush(), self.metadata.flush())
    }

    /// Stop eviction and flush both stores; further operations fail.
    pub fn shutdown(&self) -> TangleResult<()> {
        first_error(self.messages.shutdown(), self.metadata.shutdown())
    }
}

fn first_error(a: StorageResult<()>, b: StorageResult<()>) -> TangleResult<()> {
    a?;
    b?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cached::CachedMessages;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tangle_kvstore::InMemoryKvStore;
    use tangle_objectstorage::StorageError;

    fn storage() -> (MessagesStorage, Arc<InMemoryKvStore>) {
        let store = Arc::new(InMemoryKvStore::new());
        let opts = CacheOpts::default();
        (MessagesStorage::new(store.clone(), &opts), store)
    }

    fn raw(payload: &str) -> RawMessage {
        RawMessage::new(
            MessageId::from_hash([1; 32]),
            MessageId::from_hash([2; 32]),
            payload.as_bytes().to_vec(),
        )
    }

    // -----------------------------------------------------------------------
    // Paired creation
    // -----------------------------------------------------------------------

    #[test]
    fn store_creates_both_records() {
        let (storage, _) = storage();
        let (cached, created) = storage.store_message_if_absent(raw("a")).unwrap();
        assert!(created);
        assert!(cached.exists());
        let id = cached.message_id();
        assert_eq!(cached.metadata().unwrap().message_id(), id);
        assert_eq!(cached.metadata().unwrap().parent1(), MessageId::from_hash([1; 32]));
        cached.release(false);

        assert!(storage.message_exists_in_store(id).unwrap());
        assert!(storage.get_cached_metadata_or_nil(id).unwrap().is_some());
    }

    #[test]
    fn second_store_returns_existing_pair() {
        let (storage, _) = storage();
        let (first, created) = storage.store_message_if_absent(raw("a")).unwrap();
        assert!(created);
        let (second, created) = storage.store_message_if_absent(raw("a")).unwrap();
        assert!(!created);
        assert_eq!(first.message_id(), second.message_id());
        // Both handles share one entry; read them one at a time.
        let first_meta = first.metadata().unwrap().clone();
        let second_meta = second.metadata().unwrap().clone();
        assert_eq!(first_meta, second_meta);
    }

    #[test]
    fn add_message_fires_event_once() {
        let (storage, _) = storage();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        storage.events().on_received_new_message(move |msg, latest, solid| {
            assert!(msg.exists());
            assert_eq!(latest, MilestoneIndex(5));
            assert_eq!(solid, MilestoneIndex(4));
            counter.fetch_add(1, Ordering::SeqCst);
            msg.release(false);
        });

        let (first, already) = storage
            .add_message(raw("a"), MilestoneIndex(5), MilestoneIndex(4))
            .unwrap();
        assert!(!already);
        let (second, already) = storage
            .add_message(raw("a"), MilestoneIndex(5), MilestoneIndex(4))
            .unwrap();
        assert!(already);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        let id = first.message_id();
        first.release(false);
        second.release(false);
        assert_eq!(storage.message_store().ref_count(id), 0);
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    #[test]
    fn get_or_nil_on_unknown_id() {
        let (storage, _) = storage();
        let id = MessageId::from_hash([7; 32]);
        assert!(storage.get_cached_message_or_nil(id).unwrap().is_none());
        assert!(storage.get_cached_metadata_or_nil(id).unwrap().is_none());
        assert!(!storage.message_store().is_cached(id));
        assert!(!storage.metadata_store().is_cached(id));
    }

    #[test]
    fn message_without_metadata_is_absent() {
        let (storage, _) = storage();
        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        cached.release(false);

        storage.delete_message_metadata(id).unwrap();
        assert!(storage.contains_message(id).unwrap());
        assert!(storage.get_cached_message_or_nil(id).unwrap().is_none());
        assert_eq!(storage.message_store().ref_count(id), 0);
    }

    #[test]
    fn stored_metadata_bypasses_cache() {
        let (storage, _) = storage();
        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        cached.release(false);
        // Metadata is persisted lazily.
        assert!(storage.get_stored_metadata_or_nil(id).unwrap().is_none());

        storage.flush().unwrap();
        let stored = storage.get_stored_metadata_or_nil(id).unwrap().unwrap();
        assert_eq!(stored.message_id(), id);
    }

    // -----------------------------------------------------------------------
    // Consumption
    // -----------------------------------------------------------------------

    #[test]
    fn consume_variants_release_both_sides() {
        let (storage, _) = storage();
        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();

        let payload = cached
            .retain()
            .consume_message(|msg| msg.payload().to_vec())
            .unwrap();
        assert_eq!(payload, b"a");

        cached.retain().consume_metadata(|meta| meta.set_milestone(true));
        let both = cached
            .retain()
            .consume_message_and_metadata(|msg, meta| (msg.id(), meta.is_milestone()))
            .unwrap();
        assert_eq!(both, (id, true));

        assert_eq!(storage.message_store().ref_count(id), 1);
        assert_eq!(storage.metadata_store().ref_count(id), 1);
        cached.release(false);
        assert_eq!(storage.message_store().ref_count(id), 0);
        assert_eq!(storage.metadata_store().ref_count(id), 0);
    }

    #[test]
    fn cached_metadata_holds_its_own_reference() {
        let (storage, _) = storage();
        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        let metadata = cached.cached_metadata();
        assert_eq!(storage.metadata_store().ref_count(id), 2);
        cached.release(false);
        assert_eq!(storage.metadata_store().ref_count(id), 1);
        assert!(metadata.exists());
        metadata.release(false);
        assert_eq!(storage.metadata_store().ref_count(id), 0);
    }

    #[test]
    fn bulk_retain_and_release() {
        let (storage, _) = storage();
        let batch: CachedMessages = ["a", "b", "c"]
            .iter()
            .map(|p| storage.store_message_if_absent(raw(p)).unwrap().0)
            .collect();
        let ids: Vec<MessageId> = batch.iter().map(CachedMessage::message_id).collect();

        let extra = batch.retain();
        assert_eq!(extra.len(), 3);
        for id in &ids {
            assert_eq!(storage.message_store().ref_count(*id), 2);
        }
        extra.release(false);
        batch.release(false);
        for id in &ids {
            assert_eq!(storage.message_store().ref_count(*id), 0);
        }
    }

    // -----------------------------------------------------------------------
    // State changes
    // -----------------------------------------------------------------------

    #[test]
    fn mark_solid_fires_once() {
        let (storage, _) = storage();
        let solid = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&solid);
        storage.events().on_message_solid(move |meta| {
            assert!(meta.metadata().unwrap().is_solid());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        cached.release(false);

        assert!(storage.mark_solid(id).unwrap());
        assert!(!storage.mark_solid(id).unwrap());
        assert_eq!(solid.load(Ordering::SeqCst), 1);
        assert!(!storage.mark_solid(MessageId::from_hash([9; 32])).unwrap());
        assert_eq!(storage.metadata_store().ref_count(id), 0);
    }

    #[test]
    fn mark_confirmed_persists_on_flush() {
        let (storage, _) = storage();
        let confirmed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&confirmed);
        storage.events().on_message_confirmed(move |meta, index, ts| {
            assert_eq!(index, MilestoneIndex(10));
            assert_eq!(ts, 1234);
            assert_eq!(meta.metadata().unwrap().confirmation().unwrap().index, index);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        cached.release(false);

        assert!(storage.mark_confirmed(id, MilestoneIndex(10), 1234).unwrap());
        assert!(!storage.mark_confirmed(id, MilestoneIndex(11), 5678).unwrap());
        assert_eq!(confirmed.load(Ordering::SeqCst), 1);

        storage.flush().unwrap();
        let stored = storage.get_stored_metadata_or_nil(id).unwrap().unwrap();
        assert_eq!(stored.confirmation().unwrap().index, MilestoneIndex(10));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn delete_removes_both_records() {
        let (storage, _) = storage();
        let (cached, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let id = cached.message_id();
        cached.release(false);
        storage.flush().unwrap();

        storage.delete_message(id).unwrap();
        assert!(!storage.contains_message(id).unwrap());
        assert!(storage.get_stored_metadata_or_nil(id).unwrap().is_none());
        assert_eq!(storage.size_estimate().unwrap(), 0);
    }

    #[test]
    fn sizes() {
        let (storage, _) = storage();
        let (a, _) = storage.store_message_if_absent(raw("a")).unwrap();
        let (b, _) = storage.store_message_if_absent(raw("b")).unwrap();
        assert_eq!(storage.size_estimate().unwrap(), 2);
        assert_eq!(storage.message_storage_size(), 2);
        a.release(true);
        b.release(true);
        assert_eq!(storage.message_storage_size(), 0);
    }

    #[test]
    fn shutdown_rejects_new_messages() {
        let (storage, _) = storage();
        storage.shutdown().unwrap();
        let err = storage.store_message_if_absent(raw("late")).unwrap_err();
        assert!(matches!(
            err,
            crate::TangleError::Storage(StorageError::ShutDown)
        ));
    }
}
