/// Default WebSocket endpoint path
pub const DEFAULT_WS_PATH: &str = "/ws";

/// Default HTTP port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Maximum inbound text frame size in bytes (64 KiB). SDP blobs fit comfortably.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Per-connection outbound queue depth
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// How long a caller waits in `Connecting` before giving up
pub const DEFAULT_SIGNALING_TTL_SECS: u64 = 30;

/// Error envelope texts. Clients match on these, keep them stable.
pub const ERR_INVALID_FORMAT: &str = "Invalid message format";
pub const ERR_MISSING_PARTICIPANTS: &str = "senderId and receiverId are required";
pub const ERR_EMPTY_CONTENT: &str = "Message content cannot be empty";
pub const ERR_SEND_FAILED: &str = "Failed to send message";
pub const ERR_FRAME_TOO_LARGE: &str = "Message too large";
pub const ERR_RATE_LIMITED: &str = "Rate limit exceeded";
