//! Core task/message/timeline types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type MsgId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Proposed,
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
    NeedsInput,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Status-machine edges from spec.md §3.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Proposed, Pending)
                | (Proposed, Cancelled)
                | (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Paused)
                | (Running, NeedsInput)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (NeedsInput, Running)
                | (NeedsInput, Cancelled)
                | (NeedsInput, Failed)
        ) || self == next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Orchestrator,
    Worker,
    Supervisor,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    // up: worker/supervisor -> orchestrator
    Progress,
    Completed,
    Failed,
    NeedsInput,
    Question,
    Artifact,
    Assessment,
    Intervention,
    Escalation,
    // down: orchestrator -> tier
    Instruction,
    Input,
    Pause,
    Resume,
    Redirect,
    Cancel,
    Priority,
    /// Synthetic, non-persisted marker returned by `check_inbox` once a task
    /// has reached a terminal state, so workers exit instead of polling.
    Terminate,
}

impl MessageKind {
    pub fn is_up(self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            Progress
                | Completed
                | Failed
                | NeedsInput
                | Question
                | Artifact
                | Assessment
                | Intervention
                | Escalation
        )
    }

    pub fn is_down(self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            Instruction | Input | Pause | Resume | Redirect | Cancel | Priority
        )
    }

    /// Upward kinds (plus supervisor assessment/intervention) that should
    /// notify the operator.
    pub fn notifies_operator(self) -> bool {
        use MessageKind::*;
        matches!(
            self,
            Completed | Failed | NeedsInput | Escalation | Assessment | Intervention
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub event_kind: String,
    pub summary: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub msg_id: MsgId,
    pub ts: DateTime<Utc>,
    pub direction: Direction,
    pub kind: MessageKind,
    pub from_tier: Tier,
    pub content: String,
    pub detail: Option<String>,
    pub artifact_url: Option<String>,
    pub acknowledged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    None,
    Warned,
    Restarted,
    NeedsInput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub name: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub worker_session_id: Option<String>,
    pub supervisor_session_id: Option<String>,
    pub working_dir: String,

    pub channel: String,
    pub target: String,
    pub service_url: Option<String>,

    pub plan: Option<String>,
    pub supervisor_instructions: Option<String>,
    pub supervisor_check_interval_secs: u64,
    pub auto_supervise: bool,
    pub on_complete: Option<String>,

    pub retry_pending: bool,
    pub retry_reason: Option<String>,
    pub retry_attempt_count: u32,

    pub completion_deferred: bool,
    pub completion_deferred_at: Option<DateTime<Utc>>,
    pub completion_deferred_summary: Option<String>,
    pub completion_deferred_detail: Option<String>,

    pub watchdog_state: WatchdogState,
    pub watchdog_restart_count: u32,
    pub watchdog_last_action_at: Option<DateTime<Utc>>,

    pub supervisor_assessment_count: u32,
    pub last_worker_activity_at: Option<DateTime<Utc>>,
    pub worker_exited_at: Option<DateTime<Utc>>,

    pub recovery_pending: bool,

    pub timeline: Vec<TimelineEntry>,
    pub inbox: Vec<TaskMessage>,
    pub outbox: Vec<TaskMessage>,
}

#[derive(Debug, Clone)]
pub struct CreateTaskInput {
    pub name: String,
    pub prompt: String,
    pub channel: String,
    pub target: String,
    pub service_url: Option<String>,
    pub auto_supervise: bool,
    pub supervisor_instructions: Option<String>,
    pub supervisor_check_interval_secs: u64,
    pub on_complete: Option<String>,
    pub proposed: bool,
}
