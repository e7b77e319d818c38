//! Persistent key-value store boundary for the Tangle node.
//!
//! The cached object storage never talks to a database engine directly. It
//! talks to a [`Realm`]: a prefix-scoped view over a shared [`KvStore`].
//! Each entity kind (messages, message metadata, ...) lives in its own realm
//! of the same underlying store.
//!
//! # Storage Backends
//!
//! All backends implement the [`KvStore`] trait:
//!
//! - [`InMemoryKvStore`] -- ordered `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Single-key operations are atomic. There are no multi-key transactions.
//! 2. Key iteration is ordered by raw key bytes.
//! 3. The store never interprets values -- it is a pure key-value store.
//! 4. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod realm;
pub mod traits;

pub use error::{KvError, KvResult};
pub use memory::InMemoryKvStore;
pub use realm::Realm;
pub use traits::KvStore;
