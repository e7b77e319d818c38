use std::fmt;
use std::ops::{Deref, DerefMut};
use std::panic::Location;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, MutexGuard};

use crate::entry::{CacheEntry, Existence};
use crate::leak::ConsumerId;
use crate::storage::StorageInner;
use crate::traits::StorableObject;

/// A handle owning one reference on a cached entry.
///
/// Handles are the only way to reach a cached object. Each handle is
/// released exactly once: explicitly through [`release`](Self::release),
/// implicitly at the end of [`consume`](Self::consume), or when dropped.
/// [`retain`](Self::retain) (or `clone`) produces an independent handle on
/// the same entry.
///
/// A handle returned by a load may wrap a placeholder for an object that
/// does not exist; check [`exists`](Self::exists).
pub struct CachedObject<T: StorableObject> {
    storage: Arc<StorageInner<T>>,
    entry: Arc<CacheEntry<T>>,
    consumer: Option<ConsumerId>,
    released: bool,
}

impl<T: StorableObject> CachedObject<T> {
    pub(crate) fn new(
        storage: Arc<StorageInner<T>>,
        entry: Arc<CacheEntry<T>>,
        consumer: Option<ConsumerId>,
    ) -> Self {
        Self {
            storage,
            entry,
            consumer,
            released: false,
        }
    }

    pub(crate) fn entry(&self) -> &Arc<CacheEntry<T>> {
        &self.entry
    }

    /// The key of the referenced entry.
    pub fn key(&self) -> T::Key {
        self.entry.key
    }

    /// Returns `true` if the handle refers to an existing object.
    pub fn exists(&self) -> bool {
        self.entry.existence() == Existence::Present
    }

    /// Current reference count of the entry (all handles, not just this one).
    pub fn ref_count(&self) -> usize {
        self.entry.ref_count()
    }

    /// Read access to the object, or `None` for a placeholder.
    ///
    /// The entry stays locked while the guard lives.
    pub fn get(&self) -> Option<ObjectGuard<'_, T>> {
        self.entry.touch(self.storage.now_ms());
        let state = self.entry.state.lock();
        if state.existence != Existence::Present {
            return None;
        }
        MutexGuard::try_map(state, |s| s.payload.as_mut())
            .ok()
            .map(ObjectGuard)
    }

    /// Mutate the object in place without releasing the handle.
    ///
    /// The entry is marked modified and is written back on eviction.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.entry.touch(self.storage.now_ms());
        let mut state = self.entry.state.lock();
        if state.existence != Existence::Present {
            return None;
        }
        let result = state.payload.as_mut().map(f);
        self.entry.mark_modified();
        result
    }

    /// Scoped access: run `f` with exclusive access to the object, then
    /// release this handle.
    ///
    /// The handle is released on every exit path, including a panic inside
    /// `f`. Returns `None` without calling `f` if the object does not exist.
    /// Mutating through the [`ObjectMut`] marks the entry modified.
    pub fn consume<R>(mut self, f: impl FnOnce(&mut ObjectMut<'_, T>) -> R) -> Option<R> {
        self.entry.touch(self.storage.now_ms());
        let result = {
            let mut state = self.entry.state.lock();
            let present = state.existence == Existence::Present;
            match state.payload.as_mut() {
                Some(value) if present => {
                    let mut object = ObjectMut {
                        value,
                        modified: false,
                    };
                    let result = f(&mut object);
                    if object.modified {
                        self.entry.mark_modified();
                    }
                    Some(result)
                }
                _ => None,
            }
        };
        self.release_inner(false);
        result
    }

    /// Take another reference on the same entry.
    #[track_caller]
    pub fn retain(&self) -> Self {
        self.entry.increment();
        self.entry.touch(self.storage.now_ms());
        self.storage
            .issue(Arc::clone(&self.entry), Location::caller())
    }

    /// Release this handle.
    ///
    /// When this was the last reference, `force` flushes and evicts the
    /// entry immediately instead of keeping it for the cache time.
    pub fn release(mut self, force: bool) {
        self.release_inner(force);
    }

    fn release_inner(&mut self, force: bool) {
        if self.released {
            return;
        }
        self.released = true;
        self.storage
            .release_entry(&self.entry, self.consumer.take(), force);
    }
}

impl<T: StorableObject> Clone for CachedObject<T> {
    #[track_caller]
    fn clone(&self) -> Self {
        self.retain()
    }
}

impl<T: StorableObject> Drop for CachedObject<T> {
    fn drop(&mut self) {
        self.release_inner(false);
    }
}

impl<T: StorableObject> fmt::Debug for CachedObject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedObject")
            .field("kind", &T::KIND)
            .field("key", &self.entry.key)
            .field("ref_count", &self.entry.ref_count())
            .finish()
    }
}

/// Locked read access to a cached object.
pub struct ObjectGuard<'a, T>(MappedMutexGuard<'a, T>);

impl<T> Deref for ObjectGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

/// Exclusive access to a cached object inside [`CachedObject::consume`].
///
/// Any mutable access marks the entry modified.
pub struct ObjectMut<'a, T> {
    value: &'a mut T,
    modified: bool,
}

impl<T> ObjectMut<'_, T> {
    /// Returns `true` once the object has been accessed mutably.
    pub fn is_modified(&self) -> bool {
        self.modified
    }
}

impl<T> Deref for ObjectMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &*self.value
    }
}

impl<T> DerefMut for ObjectMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.modified = true;
        &mut *self.value
    }
}
