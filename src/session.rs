use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::AgentError;
use crate::types::{Message, Session};

/// The slice of the session authority the core consumes: read, append,
/// and replace-messages. Creation and archival policy live with the host.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AgentError>;

    /// Append messages, creating the session if the authority allows it.
    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), AgentError>;

    /// Replace the full message sequence (compaction writes back through
    /// this).
    async fn replace_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), AgentError>;
}

/// In-memory store for tests and ephemeral hosts.
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        Ok(self
            .sessions
            .lock()
            .expect("session store lock")
            .get(session_id)
            .cloned())
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), AgentError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, "default", "unknown"));
        session.messages.extend(messages.iter().cloned());
        session.last_activity = Utc::now();
        Ok(())
    }

    async fn replace_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), AgentError> {
        let mut sessions = self.sessions.lock().expect("session store lock");
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id, "default", "unknown"));
        session.messages = messages.to_vec();
        session.last_activity = Utc::now();
        Ok(())
    }
}

/// Saves sessions to disk as one JSON file per session id.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        match tokio::fs::read_to_string(self.path(session_id)).await {
            Ok(json) => {
                let session: Session = serde_json::from_str(&json)
                    .map_err(|e| AgentError::Session(e.to_string()))?;
                Ok(Some(session))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AgentError::Session(e.to_string())),
        }
    }

    async fn save(&self, session: &Session) -> Result<(), AgentError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AgentError::Session(e.to_string()))?;
        let json = serde_json::to_string_pretty(session)
            .map_err(|e| AgentError::Session(e.to_string()))?;
        tokio::fs::write(self.path(&session.id), json)
            .await
            .map_err(|e| AgentError::Session(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Session>, AgentError> {
        self.load(session_id).await
    }

    async fn append(&self, session_id: &str, messages: &[Message]) -> Result<(), AgentError> {
        let mut session = self
            .load(session_id)
            .await?
            .unwrap_or_else(|| Session::new(session_id, "default", "unknown"));
        session.messages.extend(messages.iter().cloned());
        session.last_activity = Utc::now();
        self.save(&session).await
    }

    async fn replace_messages(
        &self,
        session_id: &str,
        messages: &[Message],
    ) -> Result<(), AgentError> {
        let mut session = self
            .load(session_id)
            .await?
            .unwrap_or_else(|| Session::new(session_id, "default", "unknown"));
        session.messages = messages.to_vec();
        session.last_activity = Utc::now();
        self.save(&session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_append_and_get() {
        let store = MemorySessionStore::new();
        store
            .append("s1", &[Message::user("hello", "s1")])
            .await
            .unwrap();
        store
            .append("s1", &[Message::assistant("hi", "s1")])
            .await
            .unwrap();

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn memory_store_replace() {
        let store = MemorySessionStore::new();
        store
            .append("s1", &[Message::user("one", "s1"), Message::user("two", "s1")])
            .await
            .unwrap();
        store
            .replace_messages("s1", &[Message::system("summary", "s1")])
            .await
            .unwrap();

        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "summary");
    }

    #[tokio::test]
    async fn missing_session_is_none() {
        let store = MemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());

        store
            .append("s1", &[Message::user("persisted", "s1")])
            .await
            .unwrap();
        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 1);

        store
            .replace_messages("s1", &[Message::system("compacted", "s1")])
            .await
            .unwrap();
        let session = store.get("s1").await.unwrap().unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].content, "compacted");
    }
}
