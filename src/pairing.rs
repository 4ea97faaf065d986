//! Allowlist and pending pairing-code store.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const CODE_LENGTH: usize = 6;
const PENDING_TTL_HOURS: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unknown pairing code")]
    UnknownCode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCode {
    pub code: String,
    pub channel: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PairingDocument {
    allowlist: BTreeMap<String, BTreeSet<String>>,
    pending: BTreeMap<String, PendingCode>,
}

pub struct PairingStore {
    path: PathBuf,
    doc: RwLock<PairingDocument>,
}

fn chat_key(channel: &str, sender_id: &str) -> String {
    format!("{channel}:{sender_id}")
}

impl PairingStore {
    pub async fn load(path: PathBuf) -> Result<Self, PairingError> {
        let doc = if path.exists() {
            let text = tokio::fs::read_to_string(&path).await?;
            if text.trim().is_empty() {
                PairingDocument::default()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            PairingDocument::default()
        };
        Ok(Self {
            path,
            doc: RwLock::new(doc),
        })
    }

    async fn persist(&self, doc: &PairingDocument) -> Result<(), PairingError> {
        let text = serde_json::to_string_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn is_allowed(&self, channel: &str, sender_id: &str) -> bool {
        self.doc
            .read()
            .await
            .allowlist
            .get(channel)
            .map(|set| set.contains(sender_id))
            .unwrap_or(false)
    }

    pub async fn add_allowed(&self, channel: &str, sender_id: &str) -> Result<(), PairingError> {
        let mut doc = self.doc.write().await;
        doc.allowlist
            .entry(channel.to_string())
            .or_default()
            .insert(sender_id.to_string());
        doc.pending.remove(&chat_key(channel, sender_id));
        self.persist(&doc).await
    }

    pub async fn list_pending(&self) -> Vec<PendingCode> {
        self.doc.read().await.pending.values().cloned().collect()
    }

    /// Idempotent: returns the existing pending code if one is still fresh.
    pub async fn request_code(
        &self,
        channel: &str,
        sender_id: &str,
    ) -> Result<PendingCode, PairingError> {
        self.prune_expired().await?;
        let mut doc = self.doc.write().await;
        let key = chat_key(channel, sender_id);
        if let Some(existing) = doc.pending.get(&key) {
            return Ok(existing.clone());
        }
        let code = generate_code();
        let entry = PendingCode {
            code,
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            created_at: Utc::now(),
        };
        doc.pending.insert(key, entry.clone());
        self.persist(&doc).await?;
        Ok(entry)
    }

    pub async fn approve(&self, code: &str) -> Result<PendingCode, PairingError> {
        let mut doc = self.doc.write().await;
        let key = doc
            .pending
            .iter()
            .find(|(_, v)| v.code == code)
            .map(|(k, _)| k.clone())
            .ok_or(PairingError::UnknownCode)?;
        let entry = doc.pending.remove(&key).unwrap();
        doc.allowlist
            .entry(entry.channel.clone())
            .or_default()
            .insert(entry.sender_id.clone());
        self.persist(&doc).await?;
        Ok(entry)
    }

    async fn prune_expired(&self) -> Result<(), PairingError> {
        let mut doc = self.doc.write().await;
        let cutoff = Utc::now() - ChronoDuration::hours(PENDING_TTL_HOURS);
        let before = doc.pending.len();
        doc.pending.retain(|_, v| v.created_at > cutoff);
        if doc.pending.len() != before {
            self.persist(&doc).await?;
        }
        Ok(())
    }
}

fn generate_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| char::from_digit(rng.random_range(0..10), 10).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_at(dir: &std::path::Path) -> PairingStore {
        PairingStore {
            path: dir.join("pairing.json"),
            doc: RwLock::new(PairingDocument::default()),
        }
    }

    #[tokio::test]
    async fn request_code_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let a = store.request_code("telegram", "42").await.unwrap();
        let b = store.request_code("telegram", "42").await.unwrap();
        assert_eq!(a.code, b.code);
    }

    #[tokio::test]
    async fn approve_adds_to_allowlist() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_at(dir.path());
        let pending = store.request_code("telegram", "42").await.unwrap();
        assert!(!store.is_allowed("telegram", "42").await);
        store.approve(&pending.code).await.unwrap();
        assert!(store.is_allowed("telegram", "42").await);
    }
}
