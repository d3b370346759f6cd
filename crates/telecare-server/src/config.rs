//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the relay can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use telecare_shared::constants::{
    DEFAULT_HTTP_PORT, DEFAULT_SIGNALING_TTL_SECS, DEFAULT_WS_PATH, MAX_FRAME_BYTES,
    OUTBOUND_QUEUE_DEPTH,
};

/// Where chat messages are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    /// Platform data directory (`directories` crate).
    Default,
    /// Explicit file path.
    Path(PathBuf),
    /// Process-lifetime in-memory database.
    Memory,
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Path of the WebSocket endpoint.
    /// Env: `WS_PATH`
    /// Default: `/ws`
    pub ws_path: String,

    /// Chat database location.
    /// Env: `DATABASE_PATH` (`:memory:` for an in-memory store)
    /// Default: platform data directory.
    pub database: DatabaseLocation,

    /// Human-readable name reported by `/info`.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,

    /// Maximum number of concurrent sockets (0 = unlimited).
    /// Env: `MAX_CONNECTIONS`
    pub max_connections: usize,

    /// Largest accepted inbound text frame, in bytes.
    /// Env: `MAX_FRAME_BYTES`
    pub max_frame_bytes: usize,

    /// Sustained inbound frames per second per socket (0 = unlimited).
    /// Env: `FRAME_RATE`
    pub frame_rate: f64,

    /// Inbound frame burst per socket.
    /// Env: `FRAME_BURST`
    pub frame_burst: f64,

    /// Per-socket outbound queue depth.
    /// Env: `OUTBOUND_QUEUE`
    pub outbound_queue: usize,

    /// How long callers should wait for an answer before giving up. The relay
    /// itself never times out signaling; this value is advertised to clients.
    /// Env: `SIGNALING_TTL_SECS`
    pub signaling_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            ws_path: DEFAULT_WS_PATH.to_string(),
            database: DatabaseLocation::Default,
            instance_name: "Telecare Relay".to_string(),
            max_connections: 0,
            max_frame_bytes: MAX_FRAME_BYTES,
            frame_rate: 20.0,
            frame_burst: 60.0,
            outbound_queue: OUTBOUND_QUEUE_DEPTH,
            signaling_ttl_secs: DEFAULT_SIGNALING_TTL_SECS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Invalid values are logged and the
    /// default is kept.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        parse_into(&lookup, "HTTP_ADDR", &mut config.http_addr);

        if let Some(path) = lookup("WS_PATH") {
            if path.starts_with('/') {
                config.ws_path = path;
            } else {
                tracing::warn!(value = %path, "WS_PATH must start with '/', using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            config.database = match path.trim() {
                "" => DatabaseLocation::Default,
                ":memory:" => DatabaseLocation::Memory,
                other => DatabaseLocation::Path(PathBuf::from(other)),
            };
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        parse_into(&lookup, "MAX_CONNECTIONS", &mut config.max_connections);
        parse_into(&lookup, "MAX_FRAME_BYTES", &mut config.max_frame_bytes);
        parse_into(&lookup, "FRAME_RATE", &mut config.frame_rate);
        parse_into(&lookup, "FRAME_BURST", &mut config.frame_burst);
        parse_into(&lookup, "OUTBOUND_QUEUE", &mut config.outbound_queue);
        parse_into(&lookup, "SIGNALING_TTL_SECS", &mut config.signaling_ttl_secs);

        if config.outbound_queue == 0 {
            tracing::warn!("OUTBOUND_QUEUE must be positive, using default");
            config.outbound_queue = OUTBOUND_QUEUE_DEPTH;
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Invalid value, using default"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> ServerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.database, DatabaseLocation::Default);
        assert_eq!(config.signaling_ttl_secs, 30);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("WS_PATH", "/signal"),
            ("DATABASE_PATH", ":memory:"),
            ("MAX_CONNECTIONS", "500"),
            ("FRAME_RATE", "5.5"),
            ("SIGNALING_TTL_SECS", "45"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.ws_path, "/signal");
        assert_eq!(config.database, DatabaseLocation::Memory);
        assert_eq!(config.max_connections, 500);
        assert_eq!(config.frame_rate, 5.5);
        assert_eq!(config.signaling_ttl_secs, 45);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = from_pairs(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("WS_PATH", "ws"),
            ("MAX_FRAME_BYTES", "lots"),
            ("OUTBOUND_QUEUE", "0"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.http_addr, defaults.http_addr);
        assert_eq!(config.ws_path, defaults.ws_path);
        assert_eq!(config.max_frame_bytes, defaults.max_frame_bytes);
        assert_eq!(config.outbound_queue, defaults.outbound_queue);
    }

    #[test]
    fn test_database_path() {
        let config = from_pairs(&[("DATABASE_PATH", "/var/lib/telecare/chat.db")]);
        assert_eq!(
            config.database,
            DatabaseLocation::Path(PathBuf::from("/var/lib/telecare/chat.db"))
        );
    }
}
