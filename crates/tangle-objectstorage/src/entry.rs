//! Cache entries: one per key resident in an [`ObjectStorage`](crate::ObjectStorage).

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::traits::StorableObject;

/// Whether an entry's object is known to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Existence {
    /// Not yet resolved against the persistent store.
    Unknown,
    /// The entry holds a decoded object.
    Present,
    /// The object definitely does not exist.
    Absent,
}

/// State guarded by the entry lock.
pub(crate) struct EntryState<T> {
    pub(crate) payload: Option<T>,
    pub(crate) existence: Existence,
}

/// A cache slot for one key.
///
/// Reference count, dirty and deleted flags are atomics so eviction can
/// check them while holding only the map shard lock. The payload itself is
/// behind `state`.
pub(crate) struct CacheEntry<T: StorableObject> {
    pub(crate) key: T::Key,
    pub(crate) state: Mutex<EntryState<T>>,
    ref_count: AtomicUsize,
    dirty: AtomicBool,
    deleted: AtomicBool,
    /// Milliseconds since the owning storage's clock epoch.
    last_access_ms: AtomicU64,
}

impl<T: StorableObject> CacheEntry<T> {
    pub(crate) fn new(key: T::Key, existence: Existence, ref_count: usize, now_ms: u64) -> Self {
        Self {
            key,
            state: Mutex::new(EntryState {
                payload: None,
                existence,
            }),
            ref_count: AtomicUsize::new(ref_count),
            dirty: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
            last_access_ms: AtomicU64::new(now_ms),
        }
    }

    pub(crate) fn ref_count(&self) -> usize {
        self.ref_count.load(Ordering::Acquire)
    }

    pub(crate) fn increment(&self) {
        self.ref_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the reference count, returning the previous value.
    ///
    /// Returns `None` on underflow, leaving the count at zero.
    pub(crate) fn decrement(&self) -> Option<usize> {
        self.ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .ok()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::Release);
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Mark the payload as differing from the persisted value.
    ///
    /// Has no effect on deleted entries. Call with the state lock held.
    pub(crate) fn mark_modified(&self) {
        if !self.is_deleted() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Detach the entry from the persistent store: nothing it holds is
    /// flushed any more.
    pub(crate) fn mark_deleted(&self) {
        self.deleted.store(true, Ordering::Release);
        self.dirty.store(false, Ordering::Release);
    }

    pub(crate) fn touch(&self, now_ms: u64) {
        self.last_access_ms.fetch_max(now_ms, Ordering::AcqRel);
    }

    pub(crate) fn idle_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_access_ms.load(Ordering::Acquire))
    }

    pub(crate) fn existence(&self) -> Existence {
        self.state.lock().existence
    }
}
