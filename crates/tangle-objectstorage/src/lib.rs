//! Reference-counted object cache for the Tangle node.
//!
//! An [`ObjectStorage`] fronts one [`Realm`](tangle_kvstore::Realm) of the
//! persistent key-value store with an in-memory cache of decoded objects.
//! Callers never touch cached objects directly: every operation hands out a
//! [`CachedObject`] handle that owns exactly one reference on its entry.
//!
//! # Handle discipline
//!
//! - [`ObjectStorage::load`], [`ObjectStorage::store`] and
//!   [`ObjectStorage::compute_if_absent`] return a handle holding one
//!   reference.
//! - [`CachedObject::retain`] (and `Clone`) takes another reference.
//! - [`CachedObject::consume`] gives scoped access and releases afterwards,
//!   on every exit path.
//! - [`CachedObject::release`] releases explicitly, optionally forcing an
//!   immediate flush and eviction. Dropping a handle releases it too.
//!
//! An entry whose reference count drops to zero stays cached for the
//! configured cache time and is then flushed (if dirty) and evicted, either
//! on release or by the periodic [`sweep`](ObjectStorage::sweep).
//!
//! # Concurrency
//!
//! Keys map to entries through a sharded [`dashmap::DashMap`]; reference
//! counts are only incremented under the shard lock, which is also what
//! eviction takes to remove an entry. Each entry carries its own mutex, held
//! across a compute-if-absent factory, so concurrent creators of one key
//! serialize while other keys proceed independently.
//!
//! Do not access the same key of the same storage from inside a
//! [`consume`](CachedObject::consume) closure: entry locks are not reentrant.

pub mod cached_object;
pub mod entry;
pub mod error;
pub mod leak;
pub mod options;
pub mod storage;
pub mod sweeper;
pub mod traits;

pub use cached_object::{CachedObject, ObjectGuard, ObjectMut};
pub use entry::Existence;
pub use error::{StorageError, StorageResult};
pub use leak::{ConsumerId, LeakDetector, LeakReason, LeakReport};
pub use options::{LeakDetectionOptions, StorageOptions};
pub use storage::{ObjectStorage, SweepReport};
pub use traits::{ObjectKey, StorableObject};
