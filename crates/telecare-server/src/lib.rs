//! # telecare-server
//!
//! Real-time relay for the Telecare platform.
//!
//! One WebSocket endpoint carries two kinds of traffic:
//! - **chat**: validated, persisted through [`telecare_store::ChatStore`],
//!   forwarded to the receiver if online and acknowledged to the sender
//! - **signaling**: WebRTC offers, answers and ICE candidates forwarded
//!   verbatim to the addressed user, never stored
//!
//! A small REST surface (axum) exposes health, instance info and chat
//! history for clients that were offline while messages arrived.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod relay;

#[cfg(test)]
mod socket_tests;

pub use api::{build_router, serve, serve_listener, AppState};
pub use config::{DatabaseLocation, ServerConfig};
