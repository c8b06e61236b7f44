//! # SnapSync Store
//!
//! The local durable store for the SnapSync engine: the latest known
//! snapshot plus the offline mutation queue, surviving process restarts.
//!
//! ## Design Principles
//!
//! - The store is the only shared mutable resource in the engine; every
//!   operation is a scoped acquisition so capture, enqueue, and the sync
//!   loop never interleave a partial write
//! - Writes are atomic per record: a crash mid-write leaves either the old
//!   or the new record, never a corrupt mix
//! - Queue collapse happens here, atomically with persistence: enqueueing a
//!   newer mutation for an entity supersedes its pending predecessor
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - for testing and ephemeral sessions
//! - [`FileStore`] - persistent storage under a locked directory

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
mod queue;
mod store;

pub use error::{StorageError, StorageResult};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use queue::PendingQueue;
pub use store::{LocalStore, RequeueDisposition};
