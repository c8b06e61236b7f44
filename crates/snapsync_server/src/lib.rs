//! # SnapSync Server
//!
//! Reference in-memory implementation of the remote store contract the
//! SnapSync engine syncs against:
//!
//! - one versioned row per entity, version bumped by 1 per accepted push
//! - optimistic concurrency: a push whose `base_version` does not match the
//!   current row reports a conflict carrying the current row
//! - idempotency-key dedup: a replayed push returns its original version
//!   without advancing the row
//! - a broadcast change feed per entity
//! - optional HMAC-SHA256 bearer-token authentication
//!
//! This crate exists for integration testing and prototyping; a production
//! deployment would put the same contract behind real HTTP endpoints.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod server;
mod state;

pub use auth::{AuthConfig, TokenValidator};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::SyncServer;
pub use state::RowStore;
