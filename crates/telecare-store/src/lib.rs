//! # telecare-store
//!
//! Chat persistence for the Telecare relay, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` with typed helpers for chat messages, and the
//! [`ChatStore`] trait the relay consumes. [`SqliteChatStore`] adapts the
//! former to the latter so it can be shared across tasks.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod store;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use store::{ChatStore, SqliteChatStore};
pub use telecare_shared::protocol::ChatMessage;
