//! Tool catalog and dispatch: one handler per MCP tool name, matched on a
//! plain string rather than a reflective registry.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::agent_runner::AgentRunner;
use crate::config::ChannelCredentials;
use crate::tasks::{MessageKind, Task, TaskId, TaskStatus, Tier};

use super::{ToolContext, ToolServer};

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("missing required argument '{0}'")]
    MissingArg(String),
    #[error("task_id required in tool context")]
    MissingTaskContext,
    #[error("path escapes data directory")]
    PathEscape,
    #[error(transparent)]
    Task(#[from] crate::tasks::TaskError),
    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),
    #[error(transparent)]
    Pool(#[from] crate::pool::PoolError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const STRONG_NEGATIVE: &[&str] = &[
    "truncated", "incomplete", "missing", "error", "failed", "cannot", "lack", "absent",
    "broken", "wrong",
];
const POSITIVE: &[&str] = &[
    "verified", "looks good", "complete", "success", "correct", "passed", "ok", "done",
    "finished", "created", "built", "working",
];

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_ascii_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::MissingArg(key.to_string()))
}

pub fn tool_catalog() -> Value {
    json!([
        "jobs_schedule", "jobs_list", "jobs_cancel", "jobs_runs", "jobs_clear_all",
        "send_message", "files_read", "files_write", "audit_read",
        "mcp_server_add", "mcp_server_list", "mcp_server_remove", "app_restart",
        "tasks_propose", "tasks_approve", "tasks_create", "tasks_list", "tasks_status",
        "tasks_logs", "tasks_send", "tasks_cancel", "tasks_clear_all",
        "task_report", "task_check_inbox", "task_set_status", "task_get_context",
        "task_read_peer", "task_send_input",
    ])
}

impl ToolServer {
    pub async fn call_tool(&self, ctx: ToolContext, name: &str, args: Value) -> Result<Value, ToolError> {
        let outcome = match name {
            "jobs_schedule" => self.jobs_schedule(args).await,
            "jobs_list" => self.jobs_list().await,
            "jobs_cancel" => self.jobs_cancel(args).await,
            "jobs_runs" => self.jobs_runs(args).await,
            "jobs_clear_all" => self.jobs_clear_all().await,
            "send_message" => self.send_message(args).await,
            "files_read" => self.files_read(args).await,
            "files_write" => self.files_write(args).await,
            "audit_read" => self.audit_read(args).await,
            "mcp_server_add" => self.mcp_server_add(args).await,
            "mcp_server_list" => self.mcp_server_list().await,
            "mcp_server_remove" => self.mcp_server_remove(args).await,
            "app_restart" => Ok(json!({ "status": "restarting" })),
            "tasks_propose" => self.tasks_propose(args).await,
            "tasks_approve" => self.tasks_approve(args).await,
            "tasks_create" => self.tasks_create(args).await,
            "tasks_list" => self.tasks_list().await,
            "tasks_status" => self.tasks_status(args).await,
            "tasks_logs" => self.tasks_logs(args).await,
            "tasks_send" => self.tasks_send(args).await,
            "tasks_cancel" => self.tasks_cancel(args).await,
            "tasks_clear_all" => self.tasks_clear_all().await,
            "task_report" => self.task_report(&ctx, args).await,
            "task_check_inbox" => self.task_check_inbox(&ctx).await,
            "task_set_status" => self.task_set_status(&ctx, args).await,
            "task_get_context" => self.task_get_context(&ctx).await,
            "task_read_peer" => self.task_read_peer(&ctx).await,
            "task_send_input" => self.task_send_input(&ctx, args).await,
            other => Err(ToolError::UnknownTool(other.to_string())),
        };

        if let Some(task_id) = ctx.task_id.clone() {
            let role = ctx.role.unwrap_or(Tier::Orchestrator);
            let is_error = outcome.is_err();
            let result_value = match &outcome {
                Ok(v) => v.clone(),
                Err(e) => json!({ "error": e.to_string() }),
            };
            let log = self.events.get_or_create(&task_id).await;
            let _ = log.record(&task_id, role, name, &args, &result_value, is_error).await;
            if role == Tier::Worker {
                let _ = self.tasks.touch_worker_activity(&task_id).await;
            }
        }
        outcome
    }

    // --- infrastructure tools -------------------------------------------------

    async fn jobs_schedule(&self, args: Value) -> Result<Value, ToolError> {
        let name = str_arg(&args, "name")?;
        let run_at = args
            .get("run_at")
            .and_then(|v| v.as_str())
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let payload = args.get("payload").cloned().unwrap_or(json!({}));
        let cron_expr = args.get("cron").and_then(|v| v.as_str()).map(str::to_string);
        let job = self.scheduler.schedule(name, run_at, payload, cron_expr).await?;
        Ok(serde_json::to_value(job).unwrap())
    }

    async fn jobs_list(&self) -> Result<Value, ToolError> {
        Ok(serde_json::to_value(self.scheduler.list().await).unwrap())
    }

    async fn jobs_cancel(&self, args: Value) -> Result<Value, ToolError> {
        let job_id = str_arg(&args, "job_id")?.to_string();
        self.scheduler.cancel(&job_id).await?;
        Ok(json!({ "cancelled": true }))
    }

    async fn jobs_runs(&self, args: Value) -> Result<Value, ToolError> {
        let job_id = args.get("job_id").and_then(|v| v.as_str()).map(str::to_string);
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
        let runs = self.scheduler.list_runs(job_id.as_ref(), limit).await?;
        Ok(serde_json::to_value(runs).unwrap())
    }

    async fn jobs_clear_all(&self) -> Result<Value, ToolError> {
        self.scheduler.clear_all().await?;
        Ok(json!({ "cleared": true }))
    }

    async fn send_message(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        let content = str_arg(&args, "content")?;
        let msg = self
            .tasks
            .send_message(&task_id, MessageKind::Instruction, content, Tier::Orchestrator)
            .await?;
        Ok(serde_json::to_value(msg).unwrap())
    }

    /// `true` if `relative` would resolve outside `data_dir` — an absolute
    /// path or one with a `..`/prefix component.
    fn escapes_data_dir(relative: &str) -> bool {
        use std::path::Component;
        let rel = std::path::Path::new(relative);
        rel.is_absolute()
            || rel.components().any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
    }

    fn resolve_data_path(&self, relative: &str) -> Result<PathBuf, ToolError> {
        if Self::escapes_data_dir(relative) {
            return Err(ToolError::PathEscape);
        }
        Ok(self.data_dir.join(relative))
    }

    async fn files_read(&self, args: Value) -> Result<Value, ToolError> {
        let path = self.resolve_data_path(str_arg(&args, "path")?)?;
        let text = tokio::fs::read_to_string(&path).await?;
        Ok(json!({ "content": text }))
    }

    /// Unlike `files_read`, writes outside `data_dir` are allowed — only
    /// warned about — to preserve agent autonomy.
    async fn files_write(&self, args: Value) -> Result<Value, ToolError> {
        let relative = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        if Self::escapes_data_dir(relative) {
            tracing::warn!(path = relative, "files_write escapes data dir, allowing anyway");
        }
        let path = if std::path::Path::new(relative).is_absolute() {
            PathBuf::from(relative)
        } else {
            self.data_dir.join(relative)
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(json!({ "written": true }))
    }

    async fn audit_read(&self, args: Value) -> Result<Value, ToolError> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
        if !self.audit_log_path.exists() {
            return Ok(json!({ "entries": [] }));
        }
        let text = tokio::fs::read_to_string(&self.audit_log_path).await?;
        let mut lines: Vec<&str> = text.lines().collect();
        if lines.len() > limit {
            lines.drain(0..lines.len() - limit);
        }
        Ok(json!({ "entries": lines }))
    }

    async fn mcp_server_add(&self, args: Value) -> Result<Value, ToolError> {
        let name = str_arg(&args, "name")?.to_string();
        let url = str_arg(&args, "url")?.to_string();
        if name == "orchestra" {
            return Err(ToolError::MissingArg("name 'orchestra' is reserved".into()));
        }
        self.external_servers.write().await.insert(name, url);
        Ok(json!({ "added": true }))
    }

    async fn mcp_server_list(&self) -> Result<Value, ToolError> {
        let servers = self.external_servers.read().await.clone();
        Ok(serde_json::to_value(servers).unwrap())
    }

    async fn mcp_server_remove(&self, args: Value) -> Result<Value, ToolError> {
        let name = str_arg(&args, "name")?;
        self.external_servers.write().await.remove(name);
        Ok(json!({ "removed": true }))
    }

    // --- orchestrator-level task tools -----------------------------------------

    async fn tasks_propose(&self, args: Value) -> Result<Value, ToolError> {
        let mut input = create_input_from_args(&args)?;
        input.proposed = true;
        let task = self.tasks.create_task(input).await?;
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn tasks_approve(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        let task = self.tasks.update_status(&task_id, TaskStatus::Pending).await?;
        if task.status == TaskStatus::Pending {
            self.pool.start_worker(&task.task_id, &task.prompt).await?;
            if task.auto_supervise {
                self.pool
                    .start_supervisor(
                        &task.task_id,
                        std::time::Duration::from_secs(task.supervisor_check_interval_secs),
                    )
                    .await?;
            }
        }
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn tasks_create(&self, args: Value) -> Result<Value, ToolError> {
        let input = create_input_from_args(&args)?;
        let task = self.tasks.create_task(input).await?;
        if task.status == TaskStatus::Pending {
            self.pool.start_worker(&task.task_id, &task.prompt).await?;
            if task.auto_supervise {
                self.pool
                    .start_supervisor(
                        &task.task_id,
                        std::time::Duration::from_secs(task.supervisor_check_interval_secs),
                    )
                    .await?;
            }
        }
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn tasks_list(&self) -> Result<Value, ToolError> {
        Ok(serde_json::to_value(self.tasks.list().await).unwrap())
    }

    async fn tasks_status(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        let task = self.tasks.get(&task_id).await.ok_or(crate::tasks::TaskError::NotFound(task_id))?;
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn tasks_logs(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        let tail = args.get("tail").and_then(|v| v.as_u64()).unwrap_or(200) as usize;
        let lines = self.tasks.read_log(&task_id, tail).await?;
        Ok(json!({ "lines": lines }))
    }

    async fn tasks_send(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        let content = str_arg(&args, "content")?;
        let kind = parse_down_kind(args.get("kind").and_then(|v| v.as_str()).unwrap_or("instruction"))?;

        let task = self.tasks.get(&task_id).await.ok_or_else(|| crate::tasks::TaskError::NotFound(task_id.clone()))?;
        if task.status.is_terminal() {
            // Auto-resume: dispatch a fresh worker with a continuation prompt
            // carrying the previous session id forward.
            let prompt = build_continuation_prompt(&task.prompt, content);
            self.tasks.update_status(&task_id, TaskStatus::Pending).await.ok();
            self.pool.start_worker(&task_id, &prompt).await?;
            return Ok(json!({ "resumed": true }));
        }

        let msg = self.tasks.send_message(&task_id, kind, content, Tier::Orchestrator).await?;
        Ok(serde_json::to_value(msg).unwrap())
    }

    async fn tasks_cancel(&self, args: Value) -> Result<Value, ToolError> {
        let task_id = str_arg(&args, "task_id")?.to_string();
        self.pool.stop_task(&task_id).await;
        let task = self.tasks.cancel_task(&task_id).await?;
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn tasks_clear_all(&self) -> Result<Value, ToolError> {
        self.pool.stop_all().await;
        self.tasks.clear_all().await?;
        Ok(json!({ "cleared": true }))
    }

    // --- worker/supervisor-level task tools -------------------------------------

    fn ctx_task_id(ctx: &ToolContext) -> Result<TaskId, ToolError> {
        ctx.task_id.clone().ok_or(ToolError::MissingTaskContext)
    }

    async fn task_report(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let kind = parse_up_kind(str_arg(&args, "type")?)?;
        let summary = str_arg(&args, "summary")?;
        let detail = args.get("detail").and_then(|v| v.as_str());
        let role = ctx.role.unwrap_or(Tier::Worker);

        match (role, kind) {
            (Tier::Worker, MessageKind::Completed) | (Tier::Worker, MessageKind::Failed) => {
                let task = self.tasks.get(&task_id).await.ok_or_else(|| crate::tasks::TaskError::NotFound(task_id.clone()))?;
                if task.auto_supervise {
                    let finalized = self.tasks.defer_completion(&task_id, summary, detail).await?;
                    self.spawn_deferred_completion_watchdog(task_id.clone());
                    self.pool.request_supervisor_check(&task_id).await;
                    Ok(serde_json::to_value(finalized).unwrap())
                } else {
                    let msg = self.tasks.handle_report(&task_id, kind, summary, detail, None, role).await?;
                    if let Some(finished) = self.tasks.get(&task_id).await {
                        let reason = if kind == MessageKind::Completed { "completed" } else { "failed" };
                        self.finish_task(&task_id, finished, reason).await;
                    }
                    Ok(serde_json::to_value(msg).unwrap())
                }
            }
            (Tier::Supervisor, MessageKind::Assessment) => {
                let task = self.tasks.get(&task_id).await.ok_or_else(|| crate::tasks::TaskError::NotFound(task_id.clone()))?;
                if !task.completion_deferred {
                    let assessed = self.tasks.record_assessment(&task_id, summary).await?;
                    return Ok(serde_json::to_value(assessed).unwrap());
                }
                let strong_negative = contains_any(summary, STRONG_NEGATIVE);
                let positive = contains_any(summary, POSITIVE);
                let assessed = self.tasks.record_assessment(&task_id, summary).await?;

                let worker_running = self.pool.has_worker(&task_id).await;
                let should_finalize = !strong_negative
                    && (positive || assessed.supervisor_assessment_count >= 2)
                    && !worker_running;

                if should_finalize {
                    let finalized = self.tasks.finalize_deferred(&task_id, TaskStatus::Completed).await?;
                    self.finish_task(&task_id, finalized.clone(), "completed").await;
                    Ok(serde_json::to_value(finalized).unwrap())
                } else if strong_negative {
                    self.tasks
                        .send_message(&task_id, MessageKind::Redirect, summary, Tier::Supervisor)
                        .await?;
                    Ok(serde_json::to_value(assessed).unwrap())
                } else {
                    Ok(serde_json::to_value(assessed).unwrap())
                }
            }
            _ => {
                let msg = self.tasks.handle_report(&task_id, kind, summary, detail, None, role).await?;
                Ok(serde_json::to_value(msg).unwrap())
            }
        }
    }

    /// One-shot timer: if the deferral this call observed is still the
    /// current one after 5 minutes, auto-finalize as completed. A later
    /// assessment that finalizes first simply makes this a no-op.
    fn spawn_deferred_completion_watchdog(&self, task_id: TaskId) {
        let tasks = self.tasks.clone();
        let pool = self.pool.clone();
        let runner = self.runner.clone();
        let channels = self.channels.clone();
        let http = self.http.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5 * 60)).await;
            if let Some(task) = tasks.get(&task_id).await {
                if task.completion_deferred {
                    if let Ok(finalized) = tasks.finalize_deferred(&task_id, TaskStatus::Completed).await {
                        pool.stop_task(&task_id).await;
                        spawn_on_complete_hook(runner, channels, http, finalized, "completed (watchdog auto-finalize)");
                    }
                }
            }
        });
    }

    /// Stop the task's worker/supervisor and deliver the on-complete hook.
    /// Shared by every path that moves a task to a terminal status.
    async fn finish_task(&self, task_id: &TaskId, task: Task, reason: &str) {
        self.pool.stop_task(task_id).await;
        spawn_on_complete_hook(self.runner.clone(), self.channels.clone(), self.http.clone(), task, reason);
    }

    async fn task_check_inbox(&self, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let messages = self.tasks.check_inbox(&task_id, true).await?;
        Ok(serde_json::to_value(messages).unwrap())
    }

    async fn task_set_status(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let status = parse_status(str_arg(&args, "status")?)?;
        let task = self.tasks.update_status(&task_id, status).await?;
        Ok(serde_json::to_value(task).unwrap())
    }

    async fn task_get_context(&self, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let task = self.tasks.get(&task_id).await.ok_or(crate::tasks::TaskError::NotFound(task_id))?;
        Ok(json!({
            "task_id": task.task_id,
            "name": task.name,
            "prompt": task.prompt,
            "status": task.status,
            "supervisor_instructions": task.supervisor_instructions,
            "recent_timeline": task.timeline.iter().rev().take(10).collect::<Vec<_>>(),
        }))
    }

    async fn task_read_peer(&self, ctx: &ToolContext) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let task = self.tasks.get(&task_id).await.ok_or(crate::tasks::TaskError::NotFound(task_id))?;
        let peer_tier = match ctx.role {
            Some(Tier::Worker) => Tier::Supervisor,
            Some(Tier::Supervisor) => Tier::Worker,
            _ => Tier::Worker,
        };
        let messages: Vec<_> = task.outbox.iter().filter(|m| m.from_tier == peer_tier).collect();
        Ok(serde_json::to_value(messages).unwrap())
    }

    async fn task_send_input(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let task_id = Self::ctx_task_id(ctx)?;
        let content = str_arg(&args, "content")?;
        let worker_running = self.pool.has_worker(&task_id).await;
        if !worker_running {
            let task = self.tasks.get(&task_id).await.ok_or_else(|| crate::tasks::TaskError::NotFound(task_id.clone()))?;
            let prompt = build_continuation_prompt(&task.prompt, content);
            self.pool.start_worker(&task_id, &prompt).await?;
            return Ok(json!({ "redispatched": true }));
        }
        let msg = self.tasks.send_message(&task_id, MessageKind::Input, content, Tier::Supervisor).await?;
        Ok(serde_json::to_value(msg).unwrap())
    }
}

/// Deliver the `[TASK COMPLETE]` hook prompt on the orchestrator's own agent
/// session, on its own spawned task; any reply goes back out through the
/// task's reply channel.
fn spawn_on_complete_hook(
    runner: Arc<AgentRunner>,
    channels: ChannelCredentials,
    http: reqwest::Client,
    task: Task,
    reason: &str,
) {
    let reason = reason.to_string();
    tokio::spawn(async move {
        let prompt = format!(
            "[TASK COMPLETE] task '{}' has {reason}. Completion summary: {}. Completion detail: {}. \
             Original task prompt: {}. Hook instruction: {}. You may use tasks_create for follow-up \
             without user approval.",
            task.name,
            task.completion_deferred_summary.as_deref().unwrap_or("none"),
            task.completion_deferred_detail.as_deref().unwrap_or("none"),
            task.prompt,
            task.on_complete.as_deref().unwrap_or("none"),
        );
        let reply = match runner.run_prompt(&prompt, None, |_line| {}).await {
            Ok(turn) if !turn.output.trim().is_empty() => turn.output,
            _ => return,
        };
        if let Err(error) = crate::channels::send(
            &task.channel,
            &channels,
            &http,
            &task.target,
            &reply,
            task.service_url.as_deref(),
        )
        .await
        {
            tracing::warn!(task_id = %task.task_id, %error, "failed to deliver on-complete hook reply");
        }
    });
}

fn build_continuation_prompt(original_prompt: &str, new_text: &str) -> String {
    format!(
        "Continuing prior task:\n{original_prompt}\n\nNew instruction from the operator:\n{new_text}"
    )
}

fn create_input_from_args(args: &Value) -> Result<crate::tasks::CreateTaskInput, ToolError> {
    Ok(crate::tasks::CreateTaskInput {
        name: str_arg(args, "name")?.to_string(),
        prompt: str_arg(args, "prompt")?.to_string(),
        channel: str_arg(args, "channel")?.to_string(),
        target: str_arg(args, "target")?.to_string(),
        service_url: args.get("service_url").and_then(|v| v.as_str()).map(str::to_string),
        auto_supervise: args.get("auto_supervise").and_then(|v| v.as_bool()).unwrap_or(true),
        supervisor_instructions: args.get("supervisor_instructions").and_then(|v| v.as_str()).map(str::to_string),
        supervisor_check_interval_secs: args.get("supervisor_check_interval_secs").and_then(|v| v.as_u64()).unwrap_or(60),
        on_complete: args.get("on_complete").and_then(|v| v.as_str()).map(str::to_string),
        proposed: false,
    })
}

fn parse_status(s: &str) -> Result<TaskStatus, ToolError> {
    match s {
        "proposed" => Ok(TaskStatus::Proposed),
        "pending" => Ok(TaskStatus::Pending),
        "running" => Ok(TaskStatus::Running),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        "paused" => Ok(TaskStatus::Paused),
        "needs_input" => Ok(TaskStatus::NeedsInput),
        "cancelled" => Ok(TaskStatus::Cancelled),
        other => Err(ToolError::MissingArg(format!("unknown status '{other}'"))),
    }
}

fn parse_up_kind(s: &str) -> Result<MessageKind, ToolError> {
    match s {
        "progress" => Ok(MessageKind::Progress),
        "completed" => Ok(MessageKind::Completed),
        "failed" => Ok(MessageKind::Failed),
        "needs_input" => Ok(MessageKind::NeedsInput),
        "question" => Ok(MessageKind::Question),
        "artifact" => Ok(MessageKind::Artifact),
        "assessment" => Ok(MessageKind::Assessment),
        "intervention" => Ok(MessageKind::Intervention),
        "escalation" => Ok(MessageKind::Escalation),
        other => Err(ToolError::MissingArg(format!("unknown report type '{other}'"))),
    }
}

fn parse_down_kind(s: &str) -> Result<MessageKind, ToolError> {
    match s {
        "instruction" => Ok(MessageKind::Instruction),
        "input" => Ok(MessageKind::Input),
        "pause" => Ok(MessageKind::Pause),
        "resume" => Ok(MessageKind::Resume),
        "redirect" => Ok(MessageKind::Redirect),
        "cancel" => Ok(MessageKind::Cancel),
        "priority" => Ok(MessageKind::Priority),
        other => Err(ToolError::MissingArg(format!("unknown message kind '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_negative_keywords_detected_case_insensitively() {
        assert!(contains_any("The output was TRUNCATED", STRONG_NEGATIVE));
        assert!(!contains_any("all good here", STRONG_NEGATIVE));
    }

    #[test]
    fn positive_keywords_detected() {
        assert!(contains_any("Verified and working as expected", POSITIVE));
    }
}
