//! # parley-store
//!
//! The external collaborators of the Parley messaging core, made concrete:
//! a SQLite message log with ownership rules and a change feed, a profile
//! table for display names, and filesystem object storage for attachments.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection`, the authoritative [`MessageStore`] built on top of
//! it, and the async [`ObjectStore`].

pub mod database;
pub mod messages;
pub mod migrations;
pub mod objects;
pub mod profiles;
pub mod rate_limit;
pub mod store;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use objects::ObjectStore;
pub use rate_limit::RateLimiter;
pub use store::{MessageStore, StoreOptions};
