//! CRUD operations for [`ChatMessage`] records.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;

use telecare_shared::protocol::ChatMessage;
use telecare_shared::types::{MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};

const SELECT_COLUMNS: &str = "SELECT id, sender_id, receiver_id, content, timestamp, is_read
     FROM chat_messages";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Persist a new message. The store assigns `id` and `timestamp`;
    /// `is_read` starts false.
    pub fn create_chat_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);

        self.conn().execute(
            "INSERT INTO chat_messages (sender_id, receiver_id, content, timestamp, is_read)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![sender_id.get(), receiver_id.get(), content, timestamp],
        )?;

        let id = MessageId(self.conn().last_insert_rowid());
        self.get_chat_message(id)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_chat_message(&self, id: MessageId) -> Result<ChatMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// The conversation between two users in both directions, oldest first.
    /// Messages written within the same microsecond keep insertion order.
    pub fn get_chat_messages(&self, user_a: UserId, user_b: UserId) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLUMNS}
             WHERE (sender_id = ?1 AND receiver_id = ?2)
                OR (sender_id = ?2 AND receiver_id = ?1)
             ORDER BY timestamp ASC, id ASC"
        ))?;

        let rows = stmt.query_map(params![user_a.get(), user_b.get()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Number of unread messages addressed to `user_id`.
    pub fn unread_count(&self, user_id: UserId) -> Result<u64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE receiver_id = ?1 AND is_read = 0",
            params![user_id.get()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Mark every unread message from `peer_id` to `reader_id` as read.
    /// Returns the number of rows that changed.
    pub fn mark_conversation_read(&self, reader_id: UserId, peer_id: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE chat_messages SET is_read = 1
             WHERE receiver_id = ?1 AND sender_id = ?2 AND is_read = 0",
            params![reader_id.get(), peer_id.get()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let ts_str: String = row.get(4)?;
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(ChatMessage {
        id: MessageId(row.get(0)?),
        sender_id: UserId(row.get(1)?),
        receiver_id: UserId(row.get(2)?),
        content: row.get(3)?,
        timestamp,
        is_read: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn create_assigns_id_timestamp_and_unread() {
        let db = db();
        let before = Utc::now();
        let msg = db.create_chat_message(UserId(1), UserId(2), "hello").unwrap();

        assert!(msg.id.0 > 0);
        assert_eq!(msg.sender_id, UserId(1));
        assert_eq!(msg.receiver_id, UserId(2));
        assert_eq!(msg.content, "hello");
        assert!(!msg.is_read);
        // Stored with microsecond precision.
        assert!(msg.timestamp >= before - chrono::Duration::milliseconds(1));

        let again = db.get_chat_message(msg.id).unwrap();
        assert_eq!(again, msg);
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let db = db();
        let a = db.create_chat_message(UserId(1), UserId(2), "a").unwrap();
        let b = db.create_chat_message(UserId(1), UserId(2), "b").unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn conversation_is_both_directions_ascending() {
        let db = db();
        db.create_chat_message(UserId(1), UserId(2), "first").unwrap();
        db.create_chat_message(UserId(2), UserId(1), "second").unwrap();
        db.create_chat_message(UserId(1), UserId(3), "elsewhere").unwrap();
        db.create_chat_message(UserId(1), UserId(2), "third").unwrap();

        let convo = db.get_chat_messages(UserId(2), UserId(1)).unwrap();
        let contents: Vec<_> = convo.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(convo.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn missing_message_is_not_found() {
        let db = db();
        assert!(matches!(
            db.get_chat_message(MessageId(404)),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn mark_read_only_touches_incoming_from_peer() {
        let db = db();
        db.create_chat_message(UserId(1), UserId(2), "to 2").unwrap();
        db.create_chat_message(UserId(1), UserId(2), "to 2 again").unwrap();
        db.create_chat_message(UserId(3), UserId(2), "from 3").unwrap();
        db.create_chat_message(UserId(2), UserId(1), "to 1").unwrap();

        assert_eq!(db.unread_count(UserId(2)).unwrap(), 3);
        assert_eq!(db.mark_conversation_read(UserId(2), UserId(1)).unwrap(), 2);
        assert_eq!(db.unread_count(UserId(2)).unwrap(), 1);
        assert_eq!(db.unread_count(UserId(1)).unwrap(), 1);

        // Idempotent.
        assert_eq!(db.mark_conversation_read(UserId(2), UserId(1)).unwrap(), 0);
    }
}
