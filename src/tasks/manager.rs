//! Authoritative task store: the single owner of every `Task`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use uuid::Uuid;

use super::types::*;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidStatusTransition { from: TaskStatus, to: TaskStatus },

    #[error("message kind {0:?} is not a valid upward report type")]
    InvalidUpKind(MessageKind),

    #[error("message kind {0:?} is not a valid downward message type")]
    InvalidDownKind(MessageKind),

    #[error("a task named '{0}' is already active or proposed")]
    DuplicateActiveName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub struct TaskManager {
    path: PathBuf,
    tasks_root: PathBuf,
    tasks: tokio::sync::RwLock<BTreeMap<TaskId, Task>>,
}

fn new_msg_id() -> MsgId {
    Uuid::new_v4().simple().to_string()
}

fn new_task_id() -> TaskId {
    let full = Uuid::new_v4().simple().to_string();
    full[..12].to_string()
}

impl TaskManager {
    pub async fn load(path: PathBuf, tasks_root: PathBuf) -> Result<Self, TaskError> {
        let tasks = if path.exists() {
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
            tasks_root,
            tasks: tokio::sync::RwLock::new(tasks),
        })
    }

    async fn persist(&self, tasks: &BTreeMap<TaskId, Task>) -> Result<(), TaskError> {
        let text = serde_json::to_string_pretty(tasks)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn get(&self, id: &TaskId) -> Option<Task> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Task> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn create_task(&self, input: CreateTaskInput) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks
            .values()
            .any(|t| t.name == input.name && !t.status.is_terminal())
        {
            return Err(TaskError::DuplicateActiveName(input.name));
        }
        let id = new_task_id();
        let now = Utc::now();
        let working_dir = self.tasks_root.join(&id).join("workspace");
        tokio::fs::create_dir_all(&working_dir).await?;

        let status = if input.proposed {
            TaskStatus::Proposed
        } else {
            TaskStatus::Pending
        };

        let task = Task {
            task_id: id.clone(),
            name: input.name,
            prompt: input.prompt,
            status,
            created_at: now,
            updated_at: now,
            completed_at: None,
            worker_session_id: None,
            supervisor_session_id: None,
            working_dir: working_dir.to_string_lossy().into_owned(),
            channel: input.channel,
            target: input.target,
            service_url: input.service_url,
            plan: None,
            supervisor_instructions: input.supervisor_instructions,
            supervisor_check_interval_secs: input.supervisor_check_interval_secs,
            auto_supervise: input.auto_supervise,
            on_complete: input.on_complete,
            retry_pending: false,
            retry_reason: None,
            retry_attempt_count: 0,
            completion_deferred: false,
            completion_deferred_at: None,
            completion_deferred_summary: None,
            completion_deferred_detail: None,
            watchdog_state: WatchdogState::None,
            watchdog_restart_count: 0,
            watchdog_last_action_at: None,
            supervisor_assessment_count: 0,
            last_worker_activity_at: None,
            worker_exited_at: None,
            recovery_pending: false,
            timeline: vec![TimelineEntry {
                timestamp: now,
                event_kind: "created".into(),
                summary: format!("task created with status {status:?}"),
                detail: None,
            }],
            inbox: Vec::new(),
            outbox: Vec::new(),
        };
        tasks.insert(id, task.clone());
        self.persist(&tasks).await?;
        Ok(task)
    }

    pub async fn update_status(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        if !task.status.can_transition_to(status) {
            return Err(TaskError::InvalidStatusTransition {
                from: task.status,
                to: status,
            });
        }
        task.status = status;
        task.updated_at = Utc::now();
        if status.is_terminal() {
            task.completed_at = Some(task.updated_at);
        }
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "status_changed".into(),
            summary: format!("status -> {status:?}"),
            detail: None,
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    /// Record an upward report from a worker/supervisor.
    pub async fn handle_report(
        &self,
        id: &TaskId,
        kind: MessageKind,
        summary: &str,
        detail: Option<&str>,
        artifact_url: Option<&str>,
        from_tier: Tier,
    ) -> Result<TaskMessage, TaskError> {
        if !kind.is_up() {
            return Err(TaskError::InvalidUpKind(kind));
        }
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let now = Utc::now();
        let msg = TaskMessage {
            msg_id: new_msg_id(),
            ts: now,
            direction: Direction::Up,
            kind,
            from_tier,
            content: summary.to_string(),
            detail: detail.map(str::to_string),
            artifact_url: artifact_url.map(str::to_string),
            acknowledged: true,
        };
        task.outbox.push(msg.clone());

        let event_kind = match kind {
            MessageKind::Progress => "checkpoint",
            MessageKind::Assessment => "supervised",
            MessageKind::Completed => "completed",
            MessageKind::Failed => "failed",
            MessageKind::NeedsInput => "needs_input",
            MessageKind::Question => "question",
            MessageKind::Artifact => "artifact",
            MessageKind::Intervention => "intervention",
            MessageKind::Escalation => "escalation",
            _ => "report",
        };
        task.timeline.push(TimelineEntry {
            timestamp: now,
            event_kind: event_kind.to_string(),
            summary: summary.to_string(),
            detail: detail.map(str::to_string),
        });

        match kind {
            MessageKind::Completed => {
                task.status = TaskStatus::Completed;
                task.completed_at = Some(now);
            }
            MessageKind::Failed => {
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now);
            }
            MessageKind::NeedsInput => {
                task.status = TaskStatus::NeedsInput;
            }
            _ => {}
        }
        task.updated_at = now;
        self.persist(&tasks).await?;
        Ok(msg)
    }

    /// Record a downward message from the orchestrator to a tier.
    pub async fn send_message(
        &self,
        id: &TaskId,
        kind: MessageKind,
        content: &str,
        from_tier: Tier,
    ) -> Result<TaskMessage, TaskError> {
        if !kind.is_down() {
            return Err(TaskError::InvalidDownKind(kind));
        }
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        let now = Utc::now();
        let msg = TaskMessage {
            msg_id: new_msg_id(),
            ts: now,
            direction: Direction::Down,
            kind,
            from_tier,
            content: content.to_string(),
            detail: None,
            artifact_url: None,
            acknowledged: false,
        };
        task.outbox.push(msg.clone());
        task.inbox.push(msg.clone());

        match kind {
            MessageKind::Pause => task.status = TaskStatus::Paused,
            MessageKind::Resume if task.status == TaskStatus::Paused => {
                task.status = TaskStatus::Running
            }
            MessageKind::Cancel => task.status = TaskStatus::Cancelled,
            _ => {}
        }
        task.updated_at = now;
        self.persist(&tasks).await?;
        Ok(msg)
    }

    /// Returns unacknowledged downward messages; short-circuits to a
    /// synthetic `terminate` message for terminal-state tasks.
    pub async fn check_inbox(
        &self,
        id: &TaskId,
        acknowledge: bool,
    ) -> Result<Vec<TaskMessage>, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;

        if task.status.is_terminal() {
            return Ok(vec![TaskMessage {
                msg_id: "system".into(),
                ts: Utc::now(),
                direction: Direction::Down,
                kind: MessageKind::Terminate,
                from_tier: Tier::Orchestrator,
                content: format!(
                    "Task is {:?}. Stop all work and exit immediately.",
                    task.status
                ),
                detail: None,
                artifact_url: None,
                acknowledged: true,
            }]);
        }

        let pending: Vec<TaskMessage> = task
            .inbox
            .iter()
            .filter(|m| !m.acknowledged)
            .cloned()
            .collect();
        if acknowledge {
            for m in task.inbox.iter_mut() {
                if !m.acknowledged {
                    m.acknowledged = true;
                }
            }
            self.persist(&tasks).await?;
        }
        Ok(pending)
    }

    pub async fn request_retry(&self, id: &TaskId, reason: &str) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.status = TaskStatus::NeedsInput;
        task.retry_pending = true;
        task.retry_reason = Some(reason.to_string());
        task.retry_attempt_count += 1;
        task.updated_at = Utc::now();
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "retry_requested".into(),
            summary: reason.to_string(),
            detail: None,
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn approve_retry(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.retry_pending = false;
        task.retry_reason = None;
        task.status = TaskStatus::Running;
        task.updated_at = Utc::now();
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn decline_retry(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.retry_pending = false;
        task.retry_reason = None;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        task.updated_at = Utc::now();
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn mark_recovery_pending(&self, id: &TaskId) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.recovery_pending = true;
        task.updated_at = Utc::now();
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn resolve_recovery(&self, id: &TaskId, resume: bool) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.recovery_pending = false;
        task.status = if resume {
            TaskStatus::Pending
        } else {
            TaskStatus::Cancelled
        };
        if !resume {
            task.completed_at = Some(Utc::now());
        }
        task.updated_at = Utc::now();
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn recovery_pending_tasks(
        &self,
        channel_target: Option<(&str, &str)>,
    ) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.recovery_pending)
            .filter(|t| match channel_target {
                Some((channel, target)) => t.channel == channel && t.target == target,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Tasks that were in-progress with no recovery flag yet — surfaced on
    /// boot so the operator can be prompted.
    pub async fn stale_active_tasks(&self) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Running
                        | TaskStatus::Paused
                        | TaskStatus::NeedsInput
                        | TaskStatus::Pending
                ) && !t.recovery_pending
            })
            .cloned()
            .collect()
    }

    pub async fn latest_pending_retry(
        &self,
        channel: &str,
        target: &str,
    ) -> Option<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.retry_pending && t.channel == channel && t.target == target)
            .max_by_key(|t| t.updated_at)
            .cloned()
    }

    pub async fn latest_proposed(&self, channel: &str, target: &str) -> Option<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| t.status == TaskStatus::Proposed && t.channel == channel && t.target == target)
            .max_by_key(|t| t.created_at)
            .cloned()
    }

    pub async fn cancel_task(&self, id: &TaskId) -> Result<Task, TaskError> {
        self.update_status(id, TaskStatus::Cancelled).await
    }

    pub async fn clear_all(&self) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        tasks.clear();
        self.persist(&tasks).await
    }

    pub async fn append_log(&self, id: &TaskId, text: &str) -> Result<(), TaskError> {
        let log_path = self.tasks_root.join(id).join("raw.log");
        if let Some(parent) = log_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&log_path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn read_log(&self, id: &TaskId, tail: usize) -> Result<Vec<String>, TaskError> {
        let log_path = self.tasks_root.join(id).join("raw.log");
        if !log_path.exists() {
            return Ok(Vec::new());
        }
        let text = tokio::fs::read_to_string(&log_path).await?;
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        if lines.len() > tail {
            lines.drain(0..lines.len() - tail);
        }
        Ok(lines)
    }

    /// Mark a worker's reported completion as deferred pending supervisor
    /// verification; status stays `Running`.
    pub async fn defer_completion(
        &self,
        id: &TaskId,
        summary: &str,
        detail: Option<&str>,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.completion_deferred = true;
        task.completion_deferred_at = Some(Utc::now());
        task.completion_deferred_summary = Some(summary.to_string());
        task.completion_deferred_detail = detail.map(str::to_string);
        task.updated_at = Utc::now();
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "completion_deferred".into(),
            summary: summary.to_string(),
            detail: detail.map(str::to_string),
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    /// Record a supervisor assessment of a deferred completion, without
    /// finalizing it.
    pub async fn record_assessment(&self, id: &TaskId, content: &str) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.supervisor_assessment_count += 1;
        task.updated_at = Utc::now();
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "supervised".into(),
            summary: content.to_string(),
            detail: None,
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    /// Resolve a deferred completion to a terminal status.
    pub async fn finalize_deferred(
        &self,
        id: &TaskId,
        status: TaskStatus,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        if !matches!(status, TaskStatus::Completed | TaskStatus::Failed) {
            return Err(TaskError::InvalidStatusTransition { from: task.status, to: status });
        }
        task.status = status;
        task.completed_at = Some(Utc::now());
        task.completion_deferred = false;
        task.completion_deferred_at = None;
        task.completion_deferred_summary = None;
        task.completion_deferred_detail = None;
        task.supervisor_assessment_count = 0;
        task.updated_at = Utc::now();
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "completion_finalized".into(),
            summary: format!("finalized as {status:?}"),
            detail: None,
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    /// Apply a watchdog state transition, optionally bumping the restart
    /// counter, and record it on the timeline.
    pub async fn apply_watchdog_action(
        &self,
        id: &TaskId,
        state: WatchdogState,
        increment_restart: bool,
        note: &str,
    ) -> Result<Task, TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.clone()))?;
        task.watchdog_state = state;
        task.watchdog_last_action_at = Some(Utc::now());
        if increment_restart {
            task.watchdog_restart_count += 1;
        }
        task.updated_at = Utc::now();
        task.timeline.push(TimelineEntry {
            timestamp: task.updated_at,
            event_kind: "watchdog".into(),
            summary: note.to_string(),
            detail: None,
        });
        let result = task.clone();
        self.persist(&tasks).await?;
        Ok(result)
    }

    pub async fn touch_worker_activity(&self, id: &TaskId) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(id) {
            task.last_worker_activity_at = Some(Utc::now());
            if matches!(task.watchdog_state, WatchdogState::Warned | WatchdogState::Restarted) {
                task.watchdog_state = WatchdogState::None;
            }
            self.persist(&tasks).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> (tempfile::TempDir, TaskManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = TaskManager::load(dir.path().join("tasks.json"), dir.path().join("tasks"))
            .await
            .unwrap();
        (dir, manager)
    }

    fn input(name: &str) -> CreateTaskInput {
        CreateTaskInput {
            name: name.to_string(),
            prompt: "do the thing".into(),
            channel: "telegram".into(),
            target: "999".into(),
            service_url: None,
            auto_supervise: false,
            supervisor_instructions: None,
            supervisor_check_interval_secs: 60,
            on_complete: None,
            proposed: false,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let (_dir, mgr) = manager().await;
        let task = mgr.create_task(input("t1")).await.unwrap();
        let fetched = mgr.get(&task.task_id).await.unwrap();
        assert_eq!(fetched.name, "t1");
        assert_eq!(fetched.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn invalid_transition_is_rejected() {
        let (_dir, mgr) = manager().await;
        let task = mgr.create_task(input("t1")).await.unwrap();
        let err = mgr
            .update_status(&task.task_id, TaskStatus::Completed)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::InvalidStatusTransition { .. }));
        let unchanged = mgr.get(&task.task_id).await.unwrap();
        assert_eq!(unchanged.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn check_inbox_is_idempotent_with_ack() {
        let (_dir, mgr) = manager().await;
        let task = mgr.create_task(input("t1")).await.unwrap();
        mgr.update_status(&task.task_id, TaskStatus::Running)
            .await
            .unwrap();
        mgr.send_message(
            &task.task_id,
            MessageKind::Instruction,
            "do X",
            Tier::Orchestrator,
        )
        .await
        .unwrap();
        let first = mgr.check_inbox(&task.task_id, true).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = mgr.check_inbox(&task.task_id, true).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn terminal_task_check_inbox_is_synthetic() {
        let (_dir, mgr) = manager().await;
        let task = mgr.create_task(input("t1")).await.unwrap();
        mgr.update_status(&task.task_id, TaskStatus::Running)
            .await
            .unwrap();
        mgr.handle_report(
            &task.task_id,
            MessageKind::Completed,
            "done",
            None,
            None,
            Tier::Worker,
        )
        .await
        .unwrap();
        let inbox = mgr.check_inbox(&task.task_id, true).await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].kind, MessageKind::Terminate);
    }

    #[tokio::test]
    async fn recovery_round_trip() {
        let (_dir, mgr) = manager().await;
        let task = mgr.create_task(input("t1")).await.unwrap();
        mgr.update_status(&task.task_id, TaskStatus::Running)
            .await
            .unwrap();
        mgr.mark_recovery_pending(&task.task_id).await.unwrap();
        let resolved = mgr.resolve_recovery(&task.task_id, true).await.unwrap();
        assert_eq!(resolved.status, TaskStatus::Pending);
    }
}
