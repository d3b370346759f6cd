//! v001 -- Initial schema: the `chat_messages` table.
//!
//! User accounts live in the account service; sender and receiver are plain
//! integer ids here, not foreign keys.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS chat_messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id   INTEGER NOT NULL,
    receiver_id INTEGER NOT NULL,
    content     TEXT    NOT NULL,
    timestamp   TEXT    NOT NULL,            -- RFC-3339, UTC, microseconds
    is_read     INTEGER NOT NULL DEFAULT 0   -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_chat_pair_ts
    ON chat_messages(sender_id, receiver_id, timestamp);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
