//! Session persistence — one JSON document per conversation.
//!
//! Disk layout: `<sessions_dir>/<sanitised-key>.json` where the key is
//! `{channel}:{chat_id}` with unsafe filename characters replaced. All
//! sessions on disk are loaded eagerly at startup; a corrupt file is skipped
//! with a warning and never aborts startup.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use tracing::{debug, warn};

use crate::types::{Message, Session};
use crate::utils::safe_filename;

/// Thread-safe store for conversation sessions.
///
/// Reads of different keys proceed concurrently; mutations take the writer
/// lock, so appends to the same key are serialised.
pub struct SessionStore {
    sessions_dir: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    /// Create the store and eagerly load everything under `sessions_dir`.
    pub fn new(sessions_dir: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&sessions_dir)?;

        let store = SessionStore {
            sessions_dir,
            sessions: RwLock::new(HashMap::new()),
        };
        store.load_all();
        Ok(store)
    }

    fn load_all(&self) {
        let entries = match std::fs::read_dir(&self.sessions_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to read sessions directory");
                return;
            }
        };

        let mut sessions = self.sessions.write().unwrap();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable session file");
                    continue;
                }
            };
            match serde_json::from_str::<Session>(&content) {
                Ok(session) => {
                    debug!(key = %session.key, messages = session.messages.len(), "loaded session");
                    sessions.insert(session.key.clone(), session);
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping corrupt session file");
                }
            }
        }
    }

    /// Get a session by key, creating an empty one lazily.
    pub fn get_or_create(&self, key: &str) -> Session {
        {
            let sessions = self.sessions.read().unwrap();
            if let Some(session) = sessions.get(key) {
                return session.clone();
            }
        }

        let session = Session::new(key);
        self.sessions
            .write()
            .unwrap()
            .insert(key.to_string(), session.clone());
        session
    }

    /// Append a message to a session (in memory; call `save` to persist).
    pub fn append(&self, key: &str, message: Message) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.messages.push(message);
        session.updated = Utc::now();
    }

    /// Full message history of a session (empty for unknown keys).
    pub fn history(&self, key: &str) -> Vec<Message> {
        self.sessions
            .read()
            .unwrap()
            .get(key)
            .map(|s| s.messages.clone())
            .unwrap_or_default()
    }

    /// The session's summary string (empty when unset or unknown).
    pub fn summary(&self, key: &str) -> String {
        self.sessions
            .read()
            .unwrap()
            .get(key)
            .map(|s| s.summary.clone())
            .unwrap_or_default()
    }

    pub fn set_summary(&self, key: &str, summary: impl Into<String>) {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session::new(key));
        session.summary = summary.into();
        session.updated = Utc::now();
    }

    /// Drop all but the last `keep_last` messages.
    pub fn truncate(&self, key: &str, keep_last: usize) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.get_mut(key) {
            let len = session.messages.len();
            if len > keep_last {
                session.messages.drain(..len - keep_last);
                session.updated = Utc::now();
            }
        }
    }

    /// Persist one session to its JSON file.
    pub fn save(&self, key: &str) -> std::io::Result<()> {
        let session = {
            let sessions = self.sessions.read().unwrap();
            match sessions.get(key) {
                Some(s) => s.clone(),
                None => return Ok(()),
            }
        };

        let path = self.session_path(key);
        let json = serde_json::to_string_pretty(&session)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(&path, json)?;
        debug!(key = %key, messages = session.messages.len(), "saved session");
        Ok(())
    }

    /// Delete a session from memory and disk. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let existed = self.sessions.write().unwrap().remove(key).is_some();

        let path = self.session_path(key);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(key = %key, error = %e, "failed to delete session file");
            }
            return true;
        }
        existed
    }

    /// All known session keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.sessions.read().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn session_path(&self, key: &str) -> PathBuf {
        self.sessions_dir
            .join(format!("{}.json", safe_filename(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn make_store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();
        (store, dir)
    }

    #[test]
    fn get_or_create_returns_empty_session() {
        let (store, _dir) = make_store();
        let session = store.get_or_create("telegram:12345");
        assert_eq!(session.key, "telegram:12345");
        assert!(session.messages.is_empty());
        assert!(session.summary.is_empty());
    }

    #[test]
    fn append_and_history() {
        let (store, _dir) = make_store();
        store.append("test:1", Message::user("hello"));
        store.append("test:1", Message::assistant("hi there!"));

        let history = store.history("test:1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text(), Some("hello"));
    }

    #[test]
    fn histories_are_independent() {
        let (store, _dir) = make_store();
        store.append("a:1", Message::user("one"));
        store.append("b:2", Message::user("two"));
        store.append("b:2", Message::user("three"));

        assert_eq!(store.history("a:1").len(), 1);
        assert_eq!(store.history("b:2").len(), 2);
    }

    #[test]
    fn summary_round_trip() {
        let (store, _dir) = make_store();
        store.set_summary("test:1", "talked about rust");
        assert_eq!(store.summary("test:1"), "talked about rust");
        assert_eq!(store.summary("unknown:1"), "");
    }

    #[test]
    fn truncate_keeps_tail() {
        let (store, _dir) = make_store();
        for i in 0..10 {
            store.append("test:1", Message::user(format!("msg {i}")));
        }
        store.truncate("test:1", 4);

        let history = store.history("test:1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].text(), Some("msg 6"));
    }

    #[test]
    fn truncate_shorter_history_is_noop() {
        let (store, _dir) = make_store();
        store.append("test:1", Message::user("only"));
        store.truncate("test:1", 4);
        assert_eq!(store.history("test:1").len(), 1);
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::new(dir.path().to_path_buf()).unwrap();
            store.append("telegram:42", Message::user("Hello"));
            store.append(
                "telegram:42",
                Message::assistant_tool_calls(vec![ToolCall::new("c1", "read_file", "{}")]),
            );
            store.append("telegram:42", Message::tool_result("c1", "contents"));
            store.append("telegram:42", Message::assistant("done"));
            store.set_summary("telegram:42", "file read");
            store.save("telegram:42").unwrap();
        }

        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();
        let session = store.get_or_create("telegram:42");
        assert_eq!(session.messages.len(), 4);
        assert_eq!(session.summary, "file read");
        assert!(matches!(session.messages[2], Message::Tool { .. }));
    }

    #[test]
    fn corrupt_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        std::fs::write(
            dir.path().join("cli_direct.json"),
            serde_json::to_string(&Session::new("cli:direct")).unwrap(),
        )
        .unwrap();

        let store = SessionStore::new(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.keys(), vec!["cli:direct"]);
    }

    #[test]
    fn delete_removes_memory_and_disk() {
        let (store, dir) = make_store();
        store.append("test:1", Message::user("hello"));
        store.save("test:1").unwrap();
        assert!(dir.path().join("test_1.json").exists());

        assert!(store.delete("test:1"));
        assert!(!dir.path().join("test_1.json").exists());
        assert!(store.history("test:1").is_empty());
        assert!(!store.delete("test:1"));
    }

    #[test]
    fn keys_sorted() {
        let (store, _dir) = make_store();
        store.append("b:1", Message::user("x"));
        store.append("a:1", Message::user("y"));
        assert_eq!(store.keys(), vec!["a:1", "b:1"]);
    }

    #[test]
    fn key_sanitised_in_filename() {
        let (store, dir) = make_store();
        store.append("telegram:user/42", Message::user("hi"));
        store.save("telegram:user/42").unwrap();
        assert!(dir.path().join("telegram_user_42.json").exists());
    }
}
