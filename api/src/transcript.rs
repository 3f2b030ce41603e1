use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::{collections::HashMap, sync::Mutex};

use crate::session::ChatSession;
use crate::utils::sanitize_file_component;

/// Durable record of chat sessions. Every completed turn overwrites the
/// session's transcript with the full conversation so far.
pub trait TranscriptStore: Send + Sync {
    fn save(&self, session: &ChatSession) -> Result<()>;

    fn load(&self, user_id: &str, session_id: &str) -> Result<Option<ChatSession>>;

    /// Look a session up by id alone, whoever it belongs to.
    fn find(&self, session_id: &str) -> Result<Option<ChatSession>>;
}

/// One pretty-printed JSON file per session: `<user>_<session>.json`.
pub struct FileTranscriptStore {
    dir: PathBuf,
}

impl FileTranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create chat log directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, user_id: &str, session_id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.json",
            sanitize_file_component(user_id),
            sanitize_file_component(session_id)
        ))
    }

    fn read(path: &Path) -> Result<ChatSession> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read transcript {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse transcript {}", path.display()))
    }
}

impl TranscriptStore for FileTranscriptStore {
    fn save(&self, session: &ChatSession) -> Result<()> {
        let path = self.path_for(&session.user_id, &session.session_id);
        let json = serde_json::to_string_pretty(session)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)
            .with_context(|| format!("Failed to write transcript {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to move transcript into {}", path.display()))?;

        log::debug!("Saved transcript {}", path.display());
        Ok(())
    }

    fn load(&self, user_id: &str, session_id: &str) -> Result<Option<ChatSession>> {
        let path = self.path_for(user_id, session_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn find(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let suffix = format!("_{}.json", sanitize_file_component(session_id));
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(&suffix))
                .unwrap_or(false);
            if !matches {
                continue;
            }

            let session = Self::read(&path)?;
            if session.session_id == session_id {
                return Ok(Some(session));
            }
        }

        Ok(None)
    }
}

/// Keeps transcripts in memory only.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryTranscriptStore {
    sessions: Mutex<HashMap<String, ChatSession>>,
}

#[cfg(test)]
impl MemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
impl TranscriptStore for MemoryTranscriptStore {
    fn save(&self, session: &ChatSession) -> Result<()> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript store lock poisoned"))?;
        sessions.insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    fn load(&self, user_id: &str, session_id: &str) -> Result<Option<ChatSession>> {
        Ok(self
            .find(session_id)?
            .filter(|session| session.user_id == user_id))
    }

    fn find(&self, session_id: &str) -> Result<Option<ChatSession>> {
        let sessions = self
            .sessions
            .lock()
            .map_err(|_| anyhow::anyhow!("transcript store lock poisoned"))?;
        Ok(sessions.get(session_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session(user: &str) -> ChatSession {
        let mut session = ChatSession::new(Some(user));
        session.push_turn("How many casual leaves?", "Six per year.");
        session
    }

    #[test]
    fn test_file_store_writes_user_and_session_in_name() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTranscriptStore::new(temp_dir.path().join("chat_logs")).unwrap();
        let session = sample_session("emp042");

        store.save(&session).unwrap();

        let expected = store
            .dir()
            .join(format!("emp042_{}.json", session.session_id));
        assert!(expected.exists());
        let raw = fs::read_to_string(expected).unwrap();
        assert!(raw.contains("\"role\": \"user\""));
        assert!(raw.contains("Six per year."));
    }

    #[test]
    fn test_file_store_load_and_find() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTranscriptStore::new(temp_dir.path()).unwrap();
        let session = sample_session("emp042");
        store.save(&session).unwrap();

        let loaded = store
            .load("emp042", &session.session_id)
            .unwrap()
            .unwrap();
        assert_eq!(loaded, session);
        assert_eq!(store.find(&session.session_id).unwrap(), Some(session.clone()));
        assert!(store.load("someone-else", &session.session_id).unwrap().is_none());
        assert!(store.find("2020-01-01_00-00-00_000000").unwrap().is_none());
    }

    #[test]
    fn test_file_store_overwrites_on_each_turn() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTranscriptStore::new(temp_dir.path()).unwrap();
        let mut session = sample_session("emp042");
        store.save(&session).unwrap();

        session.push_turn("And sick leave?", "Eight days.");
        store.save(&session).unwrap();

        let files = fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(files, 1);
        let loaded = store.find(&session.session_id).unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 4);
    }

    #[test]
    fn test_file_store_sanitizes_user_id() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileTranscriptStore::new(temp_dir.path()).unwrap();
        let session = sample_session("../../etc");
        store.save(&session).unwrap();

        let name = format!("_.._etc_{}.json", session.session_id);
        assert!(temp_dir.path().join(name).exists());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryTranscriptStore::new();
        let session = sample_session("emp042");
        store.save(&session).unwrap();

        assert_eq!(store.find(&session.session_id).unwrap(), Some(session.clone()));
        assert!(store.load("emp042", &session.session_id).unwrap().is_some());
        assert!(store.load("other", &session.session_id).unwrap().is_none());
    }
}
