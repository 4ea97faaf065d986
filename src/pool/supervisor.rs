//! Supervisor subprocess lifecycle: event-driven review loop that verifies
//! a worker's deliverables on request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::agent_runner::{AgentRunner, AgentRunnerConfig};
use crate::tasks::{Task, TaskId};

use super::workspace;

const SUPERVISOR_INSTRUCTIONS_TEMPLATE: &str = r#"# Supervisor instructions

Task id: {{ task_id }}
Worker session: {{ worker_session_id }}

Original request:
{{ prompt }}

Additional verification rules:
{{ supervisor_instructions }}

Read the worker's files under `workers-workspace/`. Verify the deliverable
actually satisfies the original request before reporting completion.
"#;

pub struct SupervisorHandle {
    pub cancel: CancellationToken,
    pub kick: Arc<Notify>,
    pub join: tokio::task::JoinHandle<()>,
}

impl SupervisorHandle {
    pub fn request_check(&self) {
        self.kick.notify_one();
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        self.kick.notify_one();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.join).await;
    }
}

pub struct StartSupervisorArgs {
    pub task_id: TaskId,
    pub task_dir: PathBuf,
    pub worker_workspace: PathBuf,
    pub tool_server_url: String,
    pub agent_program: PathBuf,
    pub timeout: Duration,
    pub check_interval: Duration,
}

/// Build the contextual trigger prompt from current task state, per the
/// four-branch priority order: urgent finalize, verify, investigate,
/// stuck-warning, else normal check.
pub fn build_trigger_prompt(task: &Task, worker_running: bool) -> String {
    if task.completion_deferred && !worker_running {
        return "The worker has exited and reported completion. You must report `completed` \
                 or `failed` now — do not wait any longer."
            .to_string();
    }
    if task.completion_deferred && worker_running {
        return "The worker reported completion but is still running. Verify the deliverables \
                 actually satisfy the original request."
            .to_string();
    }
    if !worker_running && !task.status.is_terminal() {
        return "The worker process has exited but the task is still marked in progress. \
                 Investigate and finalize the task status."
            .to_string();
    }
    if let Some(last_activity) = task.last_worker_activity_at {
        let idle = chrono::Utc::now() - last_activity;
        if worker_running && idle > chrono::Duration::minutes(5) {
            return "The worker has been idle for more than 5 minutes. It may be stuck; \
                     consider intervening."
                .to_string();
        }
    }
    "Perform a normal progress check on the worker's task.".to_string()
}

pub type KickCallback = Arc<dyn Fn(TaskId, String) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

pub async fn start_supervisor(
    args: StartSupervisorArgs,
    task_snapshot: impl Fn() -> futures::future::BoxFuture<'static, Option<(Task, bool)>>
        + Send
        + Sync
        + 'static,
    on_result: KickCallback,
) -> std::io::Result<SupervisorHandle> {
    let supervisor_dir = args.task_dir.join("supervisor");
    tokio::fs::create_dir_all(&supervisor_dir).await?;
    workspace::link_root_into(&args.worker_workspace, &supervisor_dir.join("workers-workspace"))
        .await
        .ok();

    write_mcp_config(&supervisor_dir, &args.tool_server_url, &args.task_id).await?;

    let kick = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    let loop_kick = kick.clone();
    let loop_cancel = cancel.clone();
    let task_id = args.task_id.clone();
    let effective_timeout = args.timeout.min(args.check_interval);

    let join = tokio::spawn(async move {
        let runner = AgentRunner::new(AgentRunnerConfig {
            program: args.agent_program,
            tool_server_url: args.tool_server_url,
            extra_dirs: vec![supervisor_dir.clone()],
            timeout: effective_timeout,
            session_state_dir: args.task_dir.join(".agent-sessions"),
        });

        loop {
            tokio::select! {
                _ = loop_cancel.cancelled() => break,
                _ = loop_kick.notified() => {
                    let Some((task, worker_running)) = task_snapshot().await else { continue };
                    let prompt = build_trigger_prompt(&task, worker_running);
                    let resume = runner.resume_session_id();
                    let result = runner.run_prompt(&prompt, resume, |_line| {}).await;
                    let output = match result {
                        Ok(turn) => turn.output,
                        Err(e) => format!("supervisor check failed: {e}"),
                    };
                    on_result(task_id.clone(), output).await;
                }
            }
        }
    });

    Ok(SupervisorHandle {
        cancel,
        kick,
        join,
    })
}

async fn write_mcp_config(
    supervisor_dir: &std::path::Path,
    tool_server_url: &str,
    task_id: &str,
) -> std::io::Result<()> {
    let url = format!("{tool_server_url}?task_id={task_id}&role=supervisor");
    let config = json!({ "mcpServers": { "orchestra": { "url": url } } });
    tokio::fs::write(
        supervisor_dir.join("copilot-mcp-config.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .await
}

#[allow(dead_code)]
fn render_instructions_template(task_id: &str, worker_session_id: &str, prompt: &str, rules: &str) -> String {
    let mut env = minijinja::Environment::new();
    env.add_template("supervisor", SUPERVISOR_INSTRUCTIONS_TEMPLATE).ok();
    env.get_template("supervisor")
        .ok()
        .and_then(|t| {
            t.render(minijinja::context! {
                task_id => task_id,
                worker_session_id => worker_session_id,
                prompt => prompt,
                supervisor_instructions => rules,
            })
            .ok()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Task, TaskStatus, WatchdogState};

    fn base_task() -> Task {
        Task {
            task_id: "t1".into(),
            name: "n".into(),
            prompt: "p".into(),
            status: TaskStatus::Running,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            completed_at: None,
            worker_session_id: None,
            supervisor_session_id: None,
            working_dir: "/tmp".into(),
            channel: "telegram".into(),
            target: "1".into(),
            service_url: None,
            plan: None,
            supervisor_instructions: None,
            supervisor_check_interval_secs: 60,
            auto_supervise: true,
            on_complete: None,
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
            last_worker_activity_at: Some(chrono::Utc::now()),
            worker_exited_at: None,
            recovery_pending: false,
            timeline: Vec::new(),
            inbox: Vec::new(),
            outbox: Vec::new(),
        }
    }

    #[test]
    fn deferred_and_worker_exited_is_urgent() {
        let mut task = base_task();
        task.completion_deferred = true;
        let prompt = build_trigger_prompt(&task, false);
        assert!(prompt.contains("must report"));
    }

    #[test]
    fn deferred_and_worker_running_asks_to_verify() {
        let mut task = base_task();
        task.completion_deferred = true;
        let prompt = build_trigger_prompt(&task, true);
        assert!(prompt.contains("Verify"));
    }

    #[test]
    fn worker_exited_but_task_running_asks_to_investigate() {
        let task = base_task();
        let prompt = build_trigger_prompt(&task, false);
        assert!(prompt.contains("Investigate"));
    }

    #[test]
    fn idle_worker_warns_of_stuck() {
        let mut task = base_task();
        task.last_worker_activity_at = Some(chrono::Utc::now() - chrono::Duration::minutes(10));
        let prompt = build_trigger_prompt(&task, true);
        assert!(prompt.contains("stuck"));
    }
}
