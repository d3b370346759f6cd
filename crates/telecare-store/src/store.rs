//! The persistence contract the relay consumes.
//!
//! Methods are synchronous; async callers run them on a blocking thread.

use std::path::Path;
use std::sync::Mutex;

use telecare_shared::protocol::ChatMessage;
use telecare_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};

pub trait ChatStore: Send + Sync + 'static {
    /// Persist a message; the returned value carries the assigned id and
    /// timestamp.
    fn create_chat_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<ChatMessage>;

    /// Both directions between two users, ascending by timestamp.
    fn get_chat_messages(&self, user_a: UserId, user_b: UserId) -> Result<Vec<ChatMessage>>;

    fn mark_conversation_read(&self, reader_id: UserId, peer_id: UserId) -> Result<usize>;

    fn unread_count(&self, user_id: UserId) -> Result<u64>;
}

/// [`ChatStore`] over a single SQLite connection guarded by a mutex.
pub struct SqliteChatStore {
    db: Mutex<Database>,
}

impl SqliteChatStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open_at(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::open_at(path)?))
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        let db = self.db.lock().map_err(|_| StoreError::Poisoned)?;
        f(&db)
    }
}

impl ChatStore for SqliteChatStore {
    fn create_chat_message(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        self.with_db(|db| db.create_chat_message(sender_id, receiver_id, content))
    }

    fn get_chat_messages(&self, user_a: UserId, user_b: UserId) -> Result<Vec<ChatMessage>> {
        self.with_db(|db| db.get_chat_messages(user_a, user_b))
    }

    fn mark_conversation_read(&self, reader_id: UserId, peer_id: UserId) -> Result<usize> {
        self.with_db(|db| db.mark_conversation_read(reader_id, peer_id))
    }

    fn unread_count(&self, user_id: UserId) -> Result<u64> {
        self.with_db(|db| db.unread_count(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn shared_across_threads() {
        let store: Arc<dyn ChatStore> = Arc::new(SqliteChatStore::open_in_memory().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .create_chat_message(UserId(1), UserId(2), &format!("msg {i}"))
                        .unwrap()
                })
            })
            .collect();

        let mut ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap().id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 4);
        assert_eq!(store.get_chat_messages(UserId(1), UserId(2)).unwrap().len(), 4);
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chat.db");

        let store = SqliteChatStore::open_at(&path).unwrap();
        let msg = store.create_chat_message(UserId(5), UserId(6), "persisted").unwrap();
        drop(store);

        let store = SqliteChatStore::open_at(&path).unwrap();
        let convo = store.get_chat_messages(UserId(6), UserId(5)).unwrap();
        assert_eq!(convo, vec![msg]);
    }
}
