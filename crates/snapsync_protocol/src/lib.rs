//! # SnapSync Protocol
//!
//! Data model and wire types shared by the SnapSync engine, store, and
//! reference server.
//!
//! This crate defines:
//! - [`Snapshot`] - one versioned, opaque blob of application state
//! - [`QueueOperation`] - a durable entry in the offline mutation queue
//! - Wire messages for the fetch/push remote contract
//! - Deterministic last-writer-wins conflict resolution
//!
//! The payload inside a snapshot is owned by the caller; nothing in this
//! crate interprets it beyond byte equality.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod messages;
mod operation;
mod snapshot;
mod time;

pub use conflict::{resolve_last_writer_wins, ConflictRecord, ConflictWinner};
pub use messages::{ChangeNotification, FetchResponse, PushOutcome, PushRequest};
pub use operation::{OperationKind, OperationStatus, QueueOperation};
pub use snapshot::Snapshot;
pub use time::unix_millis_now;
