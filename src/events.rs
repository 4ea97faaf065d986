//! Per-task append-only JSONL event stream — the supervisor's primary
//! source of truth about what the worker has actually done.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::tasks::types::{Tier, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub timestamp: DateTime<Utc>,
    pub role: Tier,
    pub tool: String,
    pub args_summary: String,
    pub result_summary: String,
    pub is_error: bool,
    pub task_id: TaskId,
}

fn summarize(value: &serde_json::Value, max_chars: usize) -> String {
    let text = value.to_string();
    if text.chars().count() > max_chars {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        text
    }
}

/// Append-only log for a single task's tool-call events.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn append(&self, event: &TaskEvent) -> Result<(), EventError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(())
    }

    pub async fn record(
        &self,
        task_id: &TaskId,
        role: Tier,
        tool: &str,
        args: &serde_json::Value,
        result: &serde_json::Value,
        is_error: bool,
    ) -> Result<(), EventError> {
        let event = TaskEvent {
            timestamp: Utc::now(),
            role,
            tool: tool.to_string(),
            args_summary: summarize(args, 400),
            result_summary: summarize(result, 400),
            is_error,
            task_id: task_id.clone(),
        };
        self.append(&event).await
    }

    pub async fn all_events(&self) -> Result<Vec<TaskEvent>, EventError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(line)?);
        }
        Ok(events)
    }

    pub async fn tail(&self, n: usize) -> Result<Vec<TaskEvent>, EventError> {
        let mut events = self.all_events().await?;
        if events.len() > n {
            events.drain(0..events.len() - n);
        }
        Ok(events)
    }

    pub async fn count(&self) -> Result<usize, EventError> {
        Ok(self.all_events().await?.len())
    }
}

/// Per-task registry of event logs, created lazily.
pub struct EventRegistry {
    tasks_root: PathBuf,
    logs: RwLock<BTreeMap<TaskId, std::sync::Arc<EventLog>>>,
}

impl EventRegistry {
    pub fn new(tasks_root: PathBuf) -> Self {
        Self {
            tasks_root,
            logs: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn get_or_create(&self, task_id: &TaskId) -> std::sync::Arc<EventLog> {
        if let Some(log) = self.logs.read().await.get(task_id) {
            return log.clone();
        }
        let mut logs = self.logs.write().await;
        logs.entry(task_id.clone())
            .or_insert_with(|| {
                std::sync::Arc::new(EventLog::new(
                    self.tasks_root.join(task_id).join("events.jsonl"),
                ))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_then_tail_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("events.jsonl"));
        for i in 0..5 {
            log.record(
                &"task-1".to_string(),
                Tier::Worker,
                "task_report",
                &serde_json::json!({"i": i}),
                &serde_json::json!({"ok": true}),
                false,
            )
            .await
            .unwrap();
        }
        assert_eq!(log.count().await.unwrap(), 5);
        let tail = log.tail(2).await.unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].args_summary, r#"{"i":4}"#);
    }
}
