//! # SnapSync Engine
//!
//! An embeddable, offline-first sync engine for versioned application
//! state. One worker per synchronized entity keeps a local snapshot
//! consistent with a remote versioned row store across unreliable
//! networks, multiple devices, and full disconnection.
//!
//! This crate provides:
//! - State capture seam ([`StateCapture`]) and mutation intake
//! - The debounced background sync worker ([`SyncManager`] / [`SyncHandle`])
//! - Optimistic-concurrency conflict detection with deterministic
//!   last-writer-wins resolution
//! - Bounded retry with exponential backoff
//! - A remote change listener for near-real-time pull
//! - HTTP binding over an abstract client ([`HttpRemote`])
//!
//! ## Architecture
//!
//! ```text
//! UI mutation ─▶ capture ─▶ local store (snapshot + queue)
//!                                │ debounced trigger
//!                                ▼
//!                          sync worker ──▶ remote row store
//!                                ▲    pull / push / resolve
//!                                │
//!                         change listener ◀── server notifications
//! ```
//!
//! ## Key Invariants
//!
//! - Mutation capture and enqueue are synchronous; sync is asynchronous
//! - Per entity, operations drain strictly FIFO with one round-trip in
//!   flight at a time
//! - Version counters only move on server acceptance; failed calls never
//!   mutate them
//! - No queued write is lost short of local storage loss; worst case a
//!   mutation waits for connectivity or reauthentication

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod capture;
mod config;
mod error;
mod http;
mod listener;
mod status;
mod transport;
mod worker;

pub use capture::{CaptureError, FnCapture, StateCapture};
pub use config::{RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{AuthProvider, HttpClient, HttpRemote, HttpResponse, StaticToken};
pub use status::{ErrorDetail, ErrorKind, SyncState, SyncStatus};
pub use transport::{ChangeFeed, MockChangeFeed, MockRemote, RemoteStore};
pub use worker::{SyncHandle, SyncManager};

pub use snapsync_protocol::{
    ChangeNotification, ConflictRecord, ConflictWinner, FetchResponse, OperationKind,
    OperationStatus, PushOutcome, PushRequest, QueueOperation, Snapshot,
};
pub use snapsync_store::{
    FileStore, LocalStore, MemoryStore, RequeueDisposition, StorageError,
};
