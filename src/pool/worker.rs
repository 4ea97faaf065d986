//! Worker subprocess lifecycle: one subprocess per task, running in an
//! isolated, root-workspace-linked directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent_runner::{AgentRunner, AgentRunnerConfig, SessionRole};
use crate::tasks::TaskId;

use super::workspace;

const WORKER_INSTRUCTIONS_TEMPLATE: &str = r#"# Task instructions

Task id: {{ task_id }}

Original request:
{{ prompt }}

Workspace root: {{ workspace_root }}

Rules:
- Read README.md before doing anything else.
- Pick an existing project subfolder or create a new one; do not work
  directly in the workspace root.
- Never run interactive or blocking commands (`npm start` with no
  backgrounding, `git commit` with no `-m`, pagers, REPLs).
- Call `task_check_inbox` periodically so you notice pause/cancel/redirect
  instructions.
- When you believe the work is done, call `task_report` with
  type=completed, then keep calling `task_check_inbox` in a wait loop for up
  to 10 minutes so a supervisor can ask for fixes before you exit.
"#;

const SYNC_INTERVAL: Duration = Duration::from_secs(30);

pub enum WorkerOutcome {
    Success(String),
    NonZeroExit(i32),
    PreLaunchError(String),
}

pub struct WorkerHandle {
    pub cancel: CancellationToken,
    pub join: tokio::task::JoinHandle<()>,
    pub last_session_id: Arc<Mutex<Option<String>>>,
}

impl WorkerHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(10), self.join).await;
    }
}

pub struct StartWorkerArgs {
    pub task_id: TaskId,
    pub prompt: String,
    pub task_dir: PathBuf,
    pub workspace_root: PathBuf,
    pub tool_server_url: String,
    pub agent_program: PathBuf,
    pub timeout: Duration,
    pub resume_session_id: Option<String>,
}

pub type CompletionCallback =
    Arc<dyn Fn(TaskId, WorkerOutcome) -> futures::future::BoxFuture<'static, ()> + Send + Sync>;

pub type LineCallback = Arc<dyn Fn(&TaskId, &str) + Send + Sync>;

/// Start a worker subprocess for `task_id`, returning a handle the pool can
/// use to stop it. Implements spec step order: workspace creation, root
/// linking, instructions template, MCP config, periodic sync, subprocess
/// spawn, log streaming, completion callback.
pub async fn start_worker(
    args: StartWorkerArgs,
    on_complete: CompletionCallback,
    on_line: LineCallback,
) -> std::io::Result<WorkerHandle> {
    let workspace = args.task_dir.join("workspace");
    tokio::fs::create_dir_all(&workspace).await?;
    workspace::link_root_into(&args.workspace_root, &workspace).await?;

    write_instructions(&workspace, &args.task_id, &args.prompt, &args.workspace_root).await?;
    write_mcp_config(&workspace, &args.tool_server_url, &args.task_id, "worker").await?;

    let cancel = CancellationToken::new();
    let last_session_id = Arc::new(Mutex::new(args.resume_session_id.clone()));

    let sync_root = args.workspace_root.clone();
    let sync_workspace = workspace.clone();
    let sync_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SYNC_INTERVAL);
        loop {
            tokio::select! {
                _ = sync_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = workspace::sync_workspace(&sync_root, &sync_workspace).await;
                }
            }
        }
    });

    let task_id = args.task_id.clone();
    let worker_log = args.task_dir.join("worker.log");
    let session_holder = last_session_id.clone();
    let run_cancel = cancel.clone();

    let join = tokio::spawn(async move {
        let runner = AgentRunner::new(AgentRunnerConfig {
            program: args.agent_program,
            tool_server_url: args.tool_server_url,
            extra_dirs: vec![args.workspace_root.clone(), workspace.clone()],
            timeout: args.timeout,
            session_state_dir: args.task_dir.join(".agent-sessions"),
        });

        let resume = session_holder.lock().await.clone();
        let log_path = worker_log.clone();
        let line_task_id = task_id.clone();
        let on_line2 = on_line.clone();

        let turn = tokio::select! {
            _ = run_cancel.cancelled() => {
                return;
            }
            result = runner.run_prompt(&args.prompt, resume, move |line| {
                on_line2(&line_task_id, line);
                append_line(&log_path, line);
            }) => result,
        };

        match turn {
            Ok(agent_turn) => {
                if let Some(id) = agent_turn.session_id.clone() {
                    *session_holder.lock().await = Some(id);
                }
                on_complete(task_id, WorkerOutcome::Success(agent_turn.output)).await;
            }
            Err(crate::agent_runner::AgentRunnerError::NonZeroExit(code)) => {
                on_complete(task_id, WorkerOutcome::NonZeroExit(code)).await;
            }
            Err(e) => {
                on_complete(task_id, WorkerOutcome::PreLaunchError(e.to_string())).await;
            }
        }
    });

    Ok(WorkerHandle {
        cancel,
        join,
        last_session_id,
    })
}

fn append_line(path: &Path, line: &str) {
    use std::io::Write;
    if let Ok(mut file) = std::fs::OpenOptions::new().append(true).create(true).open(path) {
        let _ = writeln!(file, "{line}");
    }
}

async fn write_instructions(
    workspace: &Path,
    task_id: &str,
    prompt: &str,
    workspace_root: &Path,
) -> std::io::Result<()> {
    let dir = workspace.join(".github");
    tokio::fs::create_dir_all(&dir).await?;
    let mut env = minijinja::Environment::new();
    env.add_template("worker", WORKER_INSTRUCTIONS_TEMPLATE).ok();
    let rendered = env
        .get_template("worker")
        .ok()
        .and_then(|t| {
            t.render(minijinja::context! {
                task_id => task_id,
                prompt => prompt,
                workspace_root => workspace_root.display().to_string(),
            })
            .ok()
        })
        .unwrap_or_else(|| WORKER_INSTRUCTIONS_TEMPLATE.to_string());
    tokio::fs::write(dir.join("copilot-instructions.md"), rendered).await
}

async fn write_mcp_config(
    workspace: &Path,
    tool_server_url: &str,
    task_id: &str,
    role: &str,
) -> std::io::Result<()> {
    let url = format!("{tool_server_url}?task_id={task_id}&role={role}");
    let config = json!({
        "mcpServers": {
            "orchestra": { "url": url }
        }
    });
    tokio::fs::write(
        workspace.join("copilot-mcp-config.json"),
        serde_json::to_string_pretty(&config).unwrap(),
    )
    .await
}

#[allow(dead_code)]
fn session_role() -> SessionRole {
    SessionRole::Worker
}
