use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{KeyValueStore, StorageError};

/// One question/answer exchange. `answer` is already sanitized HTML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub question: String,
    pub answer: String,
}

impl ChatEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        ChatEntry {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Oldest first.
pub type History = Vec<ChatEntry>;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("could not encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Reads the persisted log. Anything unreadable counts as no history.
pub fn read_history(store: &dyn KeyValueStore, key: &str) -> History {
    let raw = match store.get(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return History::new(),
        Err(e) => {
            warn!(key, "Could not read chat history: {}", e);
            return History::new();
        }
    };

    match serde_json::from_str::<History>(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(key, "Discarding corrupt chat history: {}", e);
            History::new()
        }
    }
}

/// In-memory history kept in lockstep with its persisted copy.
pub struct HistoryStore {
    store: Arc<dyn KeyValueStore>,
    key: String,
    entries: History,
}

impl HistoryStore {
    pub fn load(store: Arc<dyn KeyValueStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        let entries = read_history(store.as_ref(), &key);
        debug!(key = %key, entries = entries.len(), "Loaded chat history");
        HistoryStore { store, key, entries }
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The entry is kept only if the full log was written.
    pub fn append(&mut self, entry: ChatEntry) -> Result<&[ChatEntry], HistoryError> {
        self.entries.push(entry);
        if let Err(e) = self.persist() {
            self.entries.pop();
            return Err(e);
        }
        Ok(&self.entries)
    }

    pub fn clear(&mut self) -> Result<&[ChatEntry], HistoryError> {
        self.store.remove(&self.key)?;
        self.entries.clear();
        Ok(&self.entries)
    }

    fn persist(&self) -> Result<(), HistoryError> {
        let encoded = serde_json::to_string(&self.entries)?;
        self.store.set(&self.key, &encoded)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SqliteStore};

    const KEY: &str = "chat_history";

    struct ReadOnlyStore(MemoryStore);

    impl KeyValueStore for ReadOnlyStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get(key)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".to_string()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("read-only".to_string()))
        }
    }

    fn open(store: &MemoryStore) -> HistoryStore {
        HistoryStore::load(Arc::new(store.clone()), KEY)
    }

    #[test]
    fn append_is_visible_to_a_fresh_load() {
        let store = MemoryStore::new();
        let mut history = open(&store);
        history
            .append(ChatEntry::new("first?", "<p>one</p>\n"))
            .unwrap();
        let entries = history
            .append(ChatEntry::new("second?", "<p>two</p>\n"))
            .unwrap();
        assert_eq!(entries.len(), 2);

        let reloaded = read_history(&store, KEY);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded[1], ChatEntry::new("second?", "<p>two</p>\n"));
        assert_eq!(reloaded[0].question, "first?");
    }

    #[test]
    fn persisted_layout_is_a_plain_array() {
        let store = MemoryStore::new();
        open(&store).append(ChatEntry::new("q", "a")).unwrap();
        assert_eq!(
            store.get(KEY).unwrap().as_deref(),
            Some(r#"[{"question":"q","answer":"a"}]"#)
        );
    }

    #[test]
    fn clear_removes_persisted_log() {
        let store = MemoryStore::new();
        let mut history = open(&store);
        history.append(ChatEntry::new("q", "a")).unwrap();

        assert!(history.clear().unwrap().is_empty());
        assert_eq!(store.get(KEY).unwrap(), None);
        assert!(open(&store).is_empty());
    }

    #[test]
    fn corrupt_data_loads_as_empty() {
        let store = MemoryStore::new();
        for raw in [
            "not json",
            r#"{"question":"q","answer":"a"}"#,
            r#"[{"question":1}]"#,
            "null",
        ] {
            store.set(KEY, raw).unwrap();
            assert!(open(&store).is_empty(), "{raw} should load as empty");
        }
    }

    #[test]
    fn failed_write_leaves_history_unchanged() {
        let memory = MemoryStore::new();
        memory
            .set(KEY, r#"[{"question":"q","answer":"a"}]"#)
            .unwrap();
        let mut history = HistoryStore::load(Arc::new(ReadOnlyStore(memory.clone())), KEY);

        assert!(history.append(ChatEntry::new("q2", "a2")).is_err());
        assert_eq!(history.len(), 1);

        assert!(history.clear().is_err());
        assert_eq!(history.len(), 1);
        assert!(memory.get(KEY).unwrap().is_some());
    }

    #[test]
    fn history_does_not_touch_other_keys() {
        let store = MemoryStore::new();
        store.set("theme", "\"dark\"").unwrap();
        let mut history = open(&store);
        history.append(ChatEntry::new("q", "a")).unwrap();
        history.clear().unwrap();
        assert_eq!(store.get("theme").unwrap().as_deref(), Some("\"dark\""));
    }

    #[test]
    fn sqlite_round_trip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.sqlite");
        let entry = ChatEntry::new("What is <b>?", "<p>A <strong>tag</strong></p>\n");

        {
            let store = Arc::new(SqliteStore::open(&path).unwrap());
            let mut history = HistoryStore::load(store, KEY);
            history.append(entry.clone()).unwrap();
        }

        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let history = HistoryStore::load(store, KEY);
        assert_eq!(history.entries().last(), Some(&entry));
    }
}
