//! Foundation types for the Tangle node storage core.
//!
//! Every other crate in the workspace depends on `tangle-types`.
//!
//! # Key Types
//!
//! - [`MessageId`]: Content-addressed identifier of a Tangle message (BLAKE3 hash)
//! - [`MilestoneIndex`]: Index of a milestone issued by the coordinator
//! - [`ContentHasher`]: Domain-separated BLAKE3 hasher used to derive IDs

pub mod error;
pub mod hasher;
pub mod message_id;
pub mod milestone;

pub use error::TypeError;
pub use hasher::ContentHasher;
pub use message_id::{MessageId, MESSAGE_ID_LENGTH};
pub use milestone::MilestoneIndex;
