//! Chat-session persistence: maps a chat key to an agent-session id for
//! resume, plus an audit-only transcript.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const MAX_MSG_CHARS: usize = 2000;
const MAX_CONTEXT_CHARS: usize = 8000;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionData {
    pub agent_session_id: Option<String>,
    /// (role, text) pairs, kept for audit only — never re-injected into
    /// prompts. Context is rehydrated via agent session-resume.
    pub history: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub key: String,
    pub updated_at: DateTime<Utc>,
    pub data: SessionData,
}

pub fn session_key(channel: &str, sender_id: &str) -> String {
    format!("{channel}:dm:{sender_id}")
}

pub struct SessionStore {
    path: PathBuf,
    sessions: RwLock<BTreeMap<String, Session>>,
}

impl SessionStore {
    pub async fn load(path: PathBuf) -> Result<Self, SessionError> {
        let sessions = if path.exists() {
            let text = tokio::fs::read_to_string(&path).await?;
            if text.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            sessions: RwLock::new(sessions),
        })
    }

    async fn persist(&self, sessions: &BTreeMap<String, Session>) -> Result<(), SessionError> {
        let text = serde_json::to_string_pretty(sessions)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Option<Session> {
        self.sessions.read().await.get(key).cloned()
    }

    pub async fn upsert(&self, key: &str) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(key.to_string())
            .or_insert_with(|| Session {
                key: key.to_string(),
                updated_at: Utc::now(),
                data: SessionData::default(),
            })
            .clone();
        self.persist(&sessions).await?;
        Ok(session)
    }

    pub async fn append_message(
        &self,
        key: &str,
        role: &str,
        text: &str,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key.to_string()).or_insert_with(|| Session {
            key: key.to_string(),
            updated_at: Utc::now(),
            data: SessionData::default(),
        });
        let truncated: String = text.chars().take(MAX_MSG_CHARS).collect();
        session.data.history.push((role.to_string(), truncated));
        let mut total: usize = session
            .data
            .history
            .iter()
            .map(|(_, t)| t.chars().count())
            .sum();
        while total > MAX_CONTEXT_CHARS && session.data.history.len() > 1 {
            if let Some((_, removed)) = session.data.history.first().cloned() {
                session.data.history.remove(0);
                total -= removed.chars().count();
            } else {
                break;
            }
        }
        session.updated_at = Utc::now();
        self.persist(&sessions).await?;
        Ok(())
    }

    pub async fn set_agent_session_id(
        &self,
        key: &str,
        session_id: Option<String>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.entry(key.to_string()).or_insert_with(|| Session {
            key: key.to_string(),
            updated_at: Utc::now(),
            data: SessionData::default(),
        });
        session.data.agent_session_id = session_id;
        session.updated_at = Utc::now();
        self.persist(&sessions).await?;
        Ok(())
    }

    pub async fn get_agent_session_id(&self, key: &str) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(key)
            .and_then(|s| s.data.agent_session_id.clone())
    }

    pub async fn clear_agent_session_id(&self, key: &str) -> Result<(), SessionError> {
        self.set_agent_session_id(key, None).await
    }

    pub async fn clear_history(&self, key: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(key) {
            session.data.history.clear();
            session.updated_at = Utc::now();
        }
        self.persist(&sessions).await?;
        Ok(())
    }
}

/// Test-only constructor bypassing disk I/O for fast unit tests.
#[cfg(test)]
impl SessionStore {
    fn in_memory(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            sessions: RwLock::new(BTreeMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_message_truncates_single_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_memory(&dir.path().join("sessions.json"));
        let key = session_key("telegram", "42");
        let long = "x".repeat(MAX_MSG_CHARS + 500);
        store.append_message(&key, "user", &long).await.unwrap();
        let session = store.get(&key).await.unwrap();
        assert_eq!(session.data.history[0].1.chars().count(), MAX_MSG_CHARS);
    }

    #[tokio::test]
    async fn agent_session_id_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::in_memory(&dir.path().join("sessions.json"));
        let key = session_key("telegram", "42");
        store
            .set_agent_session_id(&key, Some("sess-1".into()))
            .await
            .unwrap();
        assert_eq!(
            store.get_agent_session_id(&key).await,
            Some("sess-1".to_string())
        );
        store.clear_agent_session_id(&key).await.unwrap();
        assert_eq!(store.get_agent_session_id(&key).await, None);
    }
}
