use chrono::{DateTime, Utc};
use policy_rag::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::utils::new_session_id;

pub const ANONYMOUS_USER: &str = "anonymous";

/// One chat conversation; also the shape persisted as a transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(user_id: Option<&str>) -> Self {
        let user_id = user_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();
        let now = Utc::now();

        Self {
            session_id: new_session_id(),
            user_id,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Record a completed turn.
    pub fn push_turn(&mut self, question: &str, answer: &str) {
        self.messages.push(ChatMessage::user(question));
        self.messages.push(ChatMessage::assistant(answer));
        self.updated_at = Utc::now();
    }
}

pub type SharedSession = Arc<Mutex<ChatSession>>;

/// Live sessions. Each session sits behind its own mutex so the turns of one
/// conversation are answered strictly in order while different sessions run
/// concurrently.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SharedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, session: ChatSession) -> SharedSession {
        let id = session.session_id.clone();
        let shared = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, Arc::clone(&shared));
        shared
    }

    pub async fn get(&self, session_id: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Return the live session, or adopt `restore()`'s transcript when the
    /// session is only known to the transcript store.
    pub async fn get_or_restore<F>(&self, session_id: &str, restore: F) -> Option<SharedSession>
    where
        F: FnOnce() -> Option<ChatSession>,
    {
        if let Some(existing) = self.get(session_id).await {
            return Some(existing);
        }

        let restored = restore()?;
        let mut sessions = self.sessions.write().await;
        // Another request may have restored it while we were loading.
        let shared = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(restored)));
        Some(Arc::clone(shared))
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
