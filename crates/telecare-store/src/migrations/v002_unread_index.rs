//! v002 -- Partial index backing unread counts per receiver.

use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE INDEX IF NOT EXISTS idx_chat_unread
    ON chat_messages(receiver_id)
    WHERE is_read = 0;
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
