use std::collections::HashSet;
use std::fmt;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tangle_kvstore::Realm;
use tracing::{debug, error, info, warn};

use crate::cached_object::CachedObject;
use crate::entry::{CacheEntry, EntryState, Existence};
use crate::error::{StorageError, StorageResult};
use crate::leak::{ConsumerId, LeakDetector, LeakReport};
use crate::options::StorageOptions;
use crate::sweeper::EvictionTask;
use crate::traits::{ObjectKey, StorableObject};

/// Outcome of one eviction sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries removed from memory.
    pub evicted: usize,
    /// Dirty entries written back to the persistent store.
    pub flushed: usize,
    /// Entries whose write-back failed; they stay cached for the next sweep.
    pub failed: usize,
    /// Leak detector findings.
    pub leaks: usize,
}

/// Shared state behind an [`ObjectStorage`] and all of its handles.
pub(crate) struct StorageInner<T: StorableObject> {
    realm: Realm,
    options: StorageOptions,
    entries: DashMap<T::Key, Arc<CacheEntry<T>>>,
    leak_detector: Option<LeakDetector<T::Key>>,
    epoch: Instant,
    shut_down: AtomicBool,
    pub(crate) sweeper: Mutex<Option<EvictionTask>>,
}

impl<T: StorableObject> StorageInner<T> {
    pub(crate) fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn cache_time_ms(&self) -> u64 {
        self.options.cache_time.as_millis() as u64
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Find or create the entry for `key` and take a reference on it.
    ///
    /// The increment happens under the map shard lock, which is also the
    /// lock eviction takes, so an entry seen with a zero count under that
    /// lock cannot gain a reference concurrently.
    fn acquire(self: &Arc<Self>, key: T::Key, location: &'static Location<'static>) -> CachedObject<T> {
        let now = self.now_ms();
        let entry = {
            let slot = self
                .entries
                .entry(key)
                .or_insert_with(|| Arc::new(CacheEntry::new(key, Existence::Unknown, 0, now)));
            slot.increment();
            slot.touch(now);
            Arc::clone(slot.value())
        };
        self.issue(entry, location)
    }

    /// Wrap an already-counted reference into a handle.
    pub(crate) fn issue(
        self: &Arc<Self>,
        entry: Arc<CacheEntry<T>>,
        location: &'static Location<'static>,
    ) -> CachedObject<T> {
        let consumer = self
            .leak_detector
            .as_ref()
            .map(|detector| detector.register(entry.key, location));
        CachedObject::new(Arc::clone(self), entry, consumer)
    }

    /// Resolve an `Unknown` entry against the persistent store.
    ///
    /// Decode failures leave the entry unresolved; nothing is cached.
    fn resolve(&self, key: &T::Key, state: &mut EntryState<T>) -> StorageResult<()> {
        if state.existence != Existence::Unknown {
            return Ok(());
        }
        if !self.options.persistence_enabled {
            state.existence = Existence::Absent;
            return Ok(());
        }
        match self.realm.get(&key.to_key_bytes())? {
            Some(bytes) => {
                let object = T::decode(*key, &bytes)?;
                state.payload = Some(object);
                state.existence = Existence::Present;
                debug!(kind = T::KIND, key = %key, "loaded from store");
            }
            None => state.existence = Existence::Absent,
        }
        Ok(())
    }

    fn persist(&self, object: &T) -> StorageResult<()> {
        let bytes = object.encode()?;
        self.realm.put(&object.key().to_key_bytes(), &bytes)?;
        Ok(())
    }

    /// Put `object` into an entry whose state lock is held.
    ///
    /// On error the entry is left exactly as it was.
    fn install(
        &self,
        entry: &CacheEntry<T>,
        state: &mut EntryState<T>,
        object: T,
    ) -> StorageResult<()> {
        debug_assert!(object.key() == entry.key, "object stored under a foreign key");
        if self.options.persistence_enabled && self.options.store_on_creation {
            self.persist(&object)?;
            state.payload = Some(object);
            state.existence = Existence::Present;
            entry.set_dirty(false);
        } else {
            state.payload = Some(object);
            state.existence = Existence::Present;
            entry.mark_modified();
        }
        Ok(())
    }

    /// Write a dirty entry back to the store. Returns `true` if bytes were
    /// written.
    fn flush_entry(&self, entry: &CacheEntry<T>) -> StorageResult<bool> {
        if !entry.is_dirty() {
            return Ok(false);
        }
        let state = entry.state.lock();
        if !entry.is_dirty() || entry.is_deleted() {
            return Ok(false);
        }
        if !self.options.persistence_enabled {
            entry.set_dirty(false);
            return Ok(false);
        }
        let mut written = false;
        if let (Existence::Present, Some(object)) = (state.existence, state.payload.as_ref()) {
            self.persist(object)?;
            written = true;
            debug!(kind = T::KIND, key = %entry.key, "flushed to store");
        }
        entry.set_dirty(false);
        Ok(written)
    }

    /// Remove `entry` from the map if it is still the current entry for its
    /// key, unreferenced and clean.
    fn evict_if_unused(&self, entry: &Arc<CacheEntry<T>>) -> bool {
        let removed = self
            .entries
            .remove_if(&entry.key, |_, current| {
                Arc::ptr_eq(current, entry) && current.ref_count() == 0 && !current.is_dirty()
            })
            .is_some();
        if removed {
            debug!(kind = T::KIND, key = %entry.key, "evicted");
        }
        removed
    }

    /// Drop one reference held by a handle.
    pub(crate) fn release_entry(
        &self,
        entry: &Arc<CacheEntry<T>>,
        consumer: Option<ConsumerId>,
        force: bool,
    ) {
        if let (Some(detector), Some(id)) = (&self.leak_detector, consumer) {
            detector.unregister(id);
        }

        let now = self.now_ms();
        match entry.decrement() {
            None => {
                error!(
                    kind = T::KIND,
                    key = %entry.key,
                    "reference count underflow: handle released more often than acquired"
                );
                debug_assert!(false, "reference count underflow for {} {}", T::KIND, entry.key);
                return;
            }
            Some(previous) if previous > 1 => {
                entry.touch(now);
                return;
            }
            Some(_) => {}
        }

        let idle = entry.idle_ms(now);
        entry.touch(now);
        if self.is_shut_down() || entry.is_deleted() {
            return;
        }

        let resident = entry.existence() == Existence::Present;
        let expired = self.options.cache_time.is_zero() || idle >= self.cache_time_ms();
        if !resident || force || expired {
            match self.flush_entry(entry) {
                Ok(_) => {
                    self.evict_if_unused(entry);
                }
                Err(err) => {
                    warn!(
                        kind = T::KIND,
                        key = %entry.key,
                        error = %err,
                        "flush on release failed; entry kept for the eviction sweep"
                    );
                }
            }
        }
    }
}

/// Reference-counted cache of one object kind over one persistent realm.
///
/// `ObjectStorage` is cheap to clone; clones share the same cache. See the
/// crate documentation for the handle discipline.
pub struct ObjectStorage<T: StorableObject> {
    pub(crate) inner: Arc<StorageInner<T>>,
}

impl<T: StorableObject> Clone for ObjectStorage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: StorableObject> ObjectStorage<T> {
    /// Create a storage caching objects of `realm`.
    pub fn new(realm: Realm, options: StorageOptions) -> Self {
        let leak_detector = options.leak_detection.clone().map(LeakDetector::new);
        Self {
            inner: Arc::new(StorageInner {
                realm,
                options,
                entries: DashMap::new(),
                leak_detector,
                epoch: Instant::now(),
                shut_down: AtomicBool::new(false),
                sweeper: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &StorageOptions {
        self.inner.options()
    }

    pub fn realm(&self) -> &Realm {
        &self.inner.realm
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    pub(crate) fn ensure_running(&self) -> StorageResult<()> {
        if self.inner.is_shut_down() {
            return Err(StorageError::ShutDown);
        }
        Ok(())
    }

    /// Load the object stored under `key`.
    ///
    /// Always returns a handle that must be released; for a missing object
    /// the handle wraps a placeholder and [`CachedObject::exists`] is
    /// `false`. Decode errors are returned and nothing is cached.
    #[track_caller]
    pub fn load(&self, key: T::Key) -> StorageResult<CachedObject<T>> {
        self.load_at(key, Location::caller())
    }

    /// [`load`](Self::load) with the handle attributed to `location` in the
    /// leak detector.
    pub fn load_at(
        &self,
        key: T::Key,
        location: &'static Location<'static>,
    ) -> StorageResult<CachedObject<T>> {
        self.ensure_running()?;
        let handle = self.inner.acquire(key, location);
        {
            let mut state = handle.entry().state.lock();
            self.inner.resolve(&key, &mut state)?;
        }
        Ok(handle)
    }

    /// Atomic get-or-create.
    ///
    /// If no object exists under `key`, `factory` builds one and the call
    /// returns `created = true`. Concurrent callers for the same key block
    /// until the factory has finished and then observe its object with
    /// `created = false`. At most one factory runs per key. A factory error
    /// is returned and leaves no object behind.
    #[track_caller]
    pub fn compute_if_absent<F>(&self, key: T::Key, factory: F) -> StorageResult<(CachedObject<T>, bool)>
    where
        F: FnOnce(&T::Key) -> StorageResult<T>,
    {
        self.compute_if_absent_at(key, Location::caller(), factory, |_| {})
    }

    /// [`compute_if_absent`](Self::compute_if_absent) with the handle
    /// attributed to `location`.
    ///
    /// If the factory succeeds but its object cannot be installed (the
    /// write on creation fails), `rollback` runs before the error is
    /// returned, while the entry is still locked. Callers blocked on the
    /// same key therefore see neither the object nor anything the factory
    /// created on the side.
    pub fn compute_if_absent_at<F, R>(
        &self,
        key: T::Key,
        location: &'static Location<'static>,
        factory: F,
        rollback: R,
    ) -> StorageResult<(CachedObject<T>, bool)>
    where
        F: FnOnce(&T::Key) -> StorageResult<T>,
        R: FnOnce(&T::Key),
    {
        self.ensure_running()?;
        let handle = self.inner.acquire(key, location);
        let created = {
            let mut state = handle.entry().state.lock();
            self.inner.resolve(&key, &mut state)?;
            if state.existence == Existence::Present {
                false
            } else {
                let object = factory(&key)?;
                if let Err(err) = self.inner.install(handle.entry(), &mut state, object) {
                    rollback(&key);
                    return Err(err);
                }
                true
            }
        };
        if created {
            debug!(kind = T::KIND, key = %key, "created");
        }
        Ok((handle, created))
    }

    /// Insert or replace an object without checking prior existence.
    #[track_caller]
    pub fn store(&self, object: T) -> StorageResult<CachedObject<T>> {
        self.store_at(object, Location::caller())
    }

    /// [`store`](Self::store) with the handle attributed to `location`.
    pub fn store_at(
        &self,
        object: T,
        location: &'static Location<'static>,
    ) -> StorageResult<CachedObject<T>> {
        self.ensure_running()?;
        let key = object.key();
        let handle = self.inner.acquire(key, location);
        {
            let mut state = handle.entry().state.lock();
            self.inner.install(handle.entry(), &mut state, object)?;
        }
        Ok(handle)
    }

    /// Delete the object under `key` from the cache and the store.
    ///
    /// Live handles keep observing the object they hold, but they are
    /// detached: nothing they do is written back. Subsequent loads observe
    /// absence, and a later create starts from a fresh entry.
    pub fn delete(&self, key: T::Key) -> StorageResult<()> {
        self.ensure_running()?;
        let inner = &self.inner;
        // Held by this call until the store delete completes, so the
        // tombstone cannot be evicted and reloaded from stale bytes.
        let tombstone = Arc::new(CacheEntry::new(key, Existence::Absent, 1, inner.now_ms()));
        let result = {
            let _tombstone_state = tombstone.state.lock();
            if let Some(previous) = inner.entries.insert(key, Arc::clone(&tombstone)) {
                // Waits for any in-flight flush of the old entry.
                let _previous_state = previous.state.lock();
                previous.mark_deleted();
            }
            if inner.options.persistence_enabled {
                inner.realm.delete(&key.to_key_bytes()).map(|_| ())
            } else {
                Ok(())
            }
        };
        inner.release_entry(&tombstone, None, true);
        debug!(kind = T::KIND, key = %key, "deleted");
        result.map_err(StorageError::from)
    }

    /// Whether an object exists under `key`, in the cache or the store.
    pub fn contains(&self, key: T::Key) -> StorageResult<bool> {
        self.ensure_running()?;
        let cached = self.inner.entries.get(&key).map(|e| Arc::clone(e.value()));
        if let Some(entry) = cached {
            match entry.existence() {
                Existence::Present => return Ok(true),
                Existence::Absent => return Ok(false),
                Existence::Unknown => {}
            }
        }
        self.exists_in_store(key)
    }

    /// Whether the persistent store holds `key`, ignoring the cache.
    pub fn exists_in_store(&self, key: T::Key) -> StorageResult<bool> {
        if !self.inner.options.persistence_enabled {
            return Ok(false);
        }
        Ok(self.inner.realm.has(&key.to_key_bytes())?)
    }

    /// Decode the persisted object under `key` without touching the cache.
    pub fn load_object_from_store(&self, key: T::Key) -> StorageResult<Option<T>> {
        if !self.inner.options.persistence_enabled {
            return Ok(None);
        }
        match self.inner.realm.get(&key.to_key_bytes())? {
            Some(bytes) => Ok(Some(T::decode(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Visit every existing key once. Iteration stops when `consumer`
    /// returns `false`.
    ///
    /// Unless `skip_cache` is set, the walk has two phases: cached objects
    /// (including ones not yet written back) in key order, then the
    /// persisted keys not seen in the first phase, again in key order. The
    /// sequence as a whole is therefore not sorted. With `skip_cache` only
    /// the store is scanned and keys arrive in store order. No references
    /// are taken.
    pub fn for_each_key(
        &self,
        mut consumer: impl FnMut(T::Key) -> bool,
        skip_cache: bool,
    ) -> StorageResult<()> {
        let mut seen = HashSet::new();
        if !skip_cache {
            let mut cached: Vec<Arc<CacheEntry<T>>> = self
                .inner
                .entries
                .iter()
                .map(|e| Arc::clone(e.value()))
                .collect();
            cached.sort_by_key(|entry| entry.key);
            for entry in cached {
                match entry.existence() {
                    Existence::Present => {
                        seen.insert(entry.key);
                        if !consumer(entry.key) {
                            return Ok(());
                        }
                    }
                    Existence::Absent => {
                        seen.insert(entry.key);
                    }
                    Existence::Unknown => {}
                }
            }
        }

        if !self.inner.options.persistence_enabled {
            return Ok(());
        }
        self.inner.realm.scan_keys(|bytes| match T::Key::from_key_bytes(bytes) {
            Ok(key) if seen.contains(&key) => true,
            Ok(key) => consumer(key),
            Err(err) => {
                warn!(kind = T::KIND, error = %err, "skipping unparsable key");
                true
            }
        })?;
        Ok(())
    }

    /// Number of objects in the persistent realm.
    pub fn size_estimate(&self) -> StorageResult<usize> {
        Ok(self.inner.realm.size_estimate()?)
    }

    /// Number of entries resident in memory, placeholders included.
    pub fn cached_len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether an entry for `key` is resident in memory.
    pub fn is_cached(&self, key: T::Key) -> bool {
        self.inner.entries.contains_key(&key)
    }

    /// Reference count of the resident entry for `key`, zero if none.
    pub fn ref_count(&self, key: T::Key) -> usize {
        self.inner
            .entries
            .get(&key)
            .map(|e| e.ref_count())
            .unwrap_or(0)
    }

    /// Flush and evict unreferenced entries idle for at least the cache time.
    ///
    /// Entries whose write-back fails stay cached and are retried by the
    /// next sweep.
    pub fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        if self.inner.is_shut_down() {
            return report;
        }
        let inner = &self.inner;
        let now = inner.now_ms();
        let cache_time_ms = inner.cache_time_ms();
        let candidates: Vec<Arc<CacheEntry<T>>> = inner
            .entries
            .iter()
            .filter(|e| e.ref_count() == 0 && e.idle_ms(now) >= cache_time_ms)
            .map(|e| Arc::clone(e.value()))
            .collect();

        for entry in candidates {
            match inner.flush_entry(&entry) {
                Ok(written) => {
                    if written {
                        report.flushed += 1;
                    }
                    if inner.evict_if_unused(&entry) {
                        report.evicted += 1;
                    }
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(kind = T::KIND, key = %entry.key, error = %err, "flush during sweep failed");
                }
            }
        }

        if let Some(detector) = &inner.leak_detector {
            report.leaks = detector.scan().len();
        }
        if report != SweepReport::default() {
            debug!(kind = T::KIND, ?report, "sweep finished");
        }
        report
    }

    /// Current leak detector findings; empty when detection is disabled.
    pub fn leak_reports(&self) -> Vec<LeakReport<T::Key>> {
        self.inner
            .leak_detector
            .as_ref()
            .map(LeakDetector::scan)
            .unwrap_or_default()
    }

    pub fn leak_detector(&self) -> Option<&LeakDetector<T::Key>> {
        self.inner.leak_detector.as_ref()
    }

    /// Write every dirty entry back and evict everything unreferenced.
    ///
    /// All entries are attempted; the first failure is returned.
    pub fn flush(&self) -> StorageResult<()> {
        let entries: Vec<Arc<CacheEntry<T>>> = self
            .inner
            .entries
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        let mut first_error = None;
        for entry in entries {
            match self.inner.flush_entry(&entry) {
                Ok(_) => {
                    self.inner.evict_if_unused(&entry);
                }
                Err(err) => {
                    error!(kind = T::KIND, key = %entry.key, error = %err, "flush failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop the eviction sweeper, reject further operations and flush.
    ///
    /// A flush failure is returned: it means cached changes were lost.
    pub fn shutdown(&self) -> StorageResult<()> {
        self.inner.shut_down.store(true, Ordering::Release);
        self.stop_eviction();
        let result = self.flush();
        info!(
            kind = T::KIND,
            remaining = self.cached_len(),
            ok = result.is_ok(),
            "object storage shut down"
        );
        result
    }
}

impl<T: StorableObject> fmt::Debug for ObjectStorage<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("kind", &T::KIND)
            .field("realm", &self.inner.realm)
            .field("cached", &self.inner.entries.len())
            .field("shut_down", &self.inner.is_shut_down())
            .finish()
    }
}
