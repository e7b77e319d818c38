//! Message and metadata stores of the Tangle node.
//!
//! [`MessagesStorage`] runs two [`ObjectStorage`](tangle_objectstorage::ObjectStorage)
//! instances over one persistent store: one for immutable [`Message`]s and
//! one for their mutable [`MessageMetadata`], both keyed by message ID.
//!
//! # Pairing
//!
//! Metadata exists if and only if its message exists. Both records are
//! created in the same compute-if-absent critical section, so a caller
//! racing the creator blocks until the pair is complete. Deletion removes
//! metadata before the message.
//!
//! # Handles
//!
//! Lookups return [`CachedMessage`] (one reference on each side) or
//! [`CachedMetadata`]. Consuming methods release every reference the handle
//! holds, whichever side they expose. Dropping a handle releases it.
//!
//! # Lock order
//!
//! Reading or consuming a handle locks its cache entry until the guard or
//! closure ends. Entry locks are not reentrant, and across the two stores
//! they are always taken message first, then metadata: creating a pair
//! locks the message entry and stores the metadata under it, and
//! [`CachedMessage::consume_message_and_metadata`] nests the same way.
//!
//! - Inside a message closure or guard you may touch that message's
//!   metadata, but not the message itself.
//! - Inside a metadata closure or guard, do not look up, store or delete
//!   any message. Doing so for the same ID can deadlock against a caller
//!   creating that message.
//! - Entries of different IDs are independent; holding one never blocks
//!   work on another.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tangle_kvstore::InMemoryKvStore;
//! use tangle_storage::{CacheOpts, MessagesStorage, RawMessage};
//! use tangle_types::MessageId;
//!
//! let storage = MessagesStorage::new(Arc::new(InMemoryKvStore::new()), &CacheOpts::default());
//! let raw = RawMessage::new(MessageId::null(), MessageId::null(), b"payload".to_vec());
//! let (cached, created) = storage.store_message_if_absent(raw)?;
//! assert!(created);
//! cached.consume_metadata(|meta| meta.set_solid(true));
//! storage.shutdown()?;
//! # Ok::<(), tangle_storage::TangleError>(())
//! ```

pub mod cached;
pub mod config;
pub mod error;
pub mod events;
pub mod message;
pub mod metadata;
pub mod storage;

pub use cached::{CachedMessage, CachedMessages, CachedMetadata};
pub use config::{CacheOpts, ConfigError, LeakDetectionConfig};
pub use error::{TangleError, TangleResult};
pub use events::TangleEvents;
pub use message::{Message, RawMessage};
pub use metadata::{Confirmation, MessageMetadata};
pub use storage::{MessagesStorage, STORE_PREFIX_MESSAGES, STORE_PREFIX_MESSAGE_METADATA};
