//! Maintains worker and supervisor process managers indexed by task id.

pub mod supervisor;
pub mod worker;
pub mod workspace;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::tasks::{MessageKind, Task, TaskId, TaskManager, Tier};

pub use supervisor::SupervisorHandle;
pub use worker::{WorkerHandle, WorkerOutcome};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker for task {0} is already running")]
    WorkerAlreadyRunning(TaskId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct PoolStatus {
    pub active_workers: usize,
    pub active_supervisors: usize,
}

pub struct WorkerPool {
    tasks: Arc<TaskManager>,
    workspace_root: PathBuf,
    tasks_root: PathBuf,
    tool_server_url: String,
    agent_program: PathBuf,
    timeout: Duration,
    workers: Arc<Mutex<BTreeMap<TaskId, WorkerHandle>>>,
    supervisors: Mutex<BTreeMap<TaskId, SupervisorHandle>>,
}

impl WorkerPool {
    pub fn new(
        tasks: Arc<TaskManager>,
        workspace_root: PathBuf,
        tasks_root: PathBuf,
        tool_server_url: String,
        agent_program: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            workspace_root,
            tasks_root,
            tool_server_url,
            agent_program,
            timeout,
            workers: Arc::new(Mutex::new(BTreeMap::new())),
            supervisors: Mutex::new(BTreeMap::new()),
        }
    }

    pub async fn start_worker(&self, task_id: &TaskId, prompt: &str) -> Result<(), PoolError> {
        {
            let workers = self.workers.lock().await;
            if workers.contains_key(task_id) {
                return Err(PoolError::WorkerAlreadyRunning(task_id.clone()));
            }
        }

        // Carry forward the previous worker's session id, if any, so a
        // re-dispatch after completion preserves context.
        let resume_session_id = self
            .tasks
            .get(task_id)
            .await
            .and_then(|t| t.worker_session_id.clone());

        let task_dir = self.tasks_root.join(task_id);
        let args = worker::StartWorkerArgs {
            task_id: task_id.clone(),
            prompt: prompt.to_string(),
            task_dir,
            workspace_root: self.workspace_root.clone(),
            tool_server_url: self.tool_server_url.clone(),
            agent_program: self.agent_program.clone(),
            timeout: self.timeout,
            resume_session_id,
        };

        let tasks = self.tasks.clone();
        let workers_map = self.workers.clone();
        let on_complete: worker::CompletionCallback = Arc::new(move |task_id, outcome| {
            let tasks = tasks.clone();
            let workers_map = workers_map.clone();
            Box::pin(async move {
                let _ = handle_worker_outcome(&tasks, &task_id, outcome).await;
                workers_map.lock().await.remove(&task_id);
            })
        });
        let on_line: worker::LineCallback = Arc::new(|_task_id, _line| {});

        let handle = worker::start_worker(args, on_complete, on_line).await?;
        self.workers.lock().await.insert(task_id.clone(), handle);
        Ok(())
    }

    pub async fn start_supervisor(
        &self,
        task_id: &TaskId,
        check_interval: Duration,
    ) -> Result<(), PoolError> {
        let task_dir = self.tasks_root.join(task_id);
        let worker_workspace = task_dir.join("workspace");
        let args = supervisor::StartSupervisorArgs {
            task_id: task_id.clone(),
            task_dir,
            worker_workspace,
            tool_server_url: self.tool_server_url.clone(),
            agent_program: self.agent_program.clone(),
            timeout: self.timeout,
            check_interval,
        };

        let tasks = self.tasks.clone();
        let workers = self.workers_snapshot_fn();
        let snapshot_task_id = task_id.clone();
        let snapshot_fn = move || {
            let tasks = tasks.clone();
            let workers = workers.clone();
            let task_id = snapshot_task_id.clone();
            Box::pin(async move {
                let task = tasks.get(&task_id).await?;
                let running = workers(&task_id).await;
                Some((task, running))
            }) as futures::future::BoxFuture<'static, Option<(Task, bool)>>
        };

        let tasks2 = self.tasks.clone();
        let on_result: supervisor::KickCallback = Arc::new(move |task_id, output| {
            let tasks = tasks2.clone();
            Box::pin(async move {
                let _ = tasks
                    .handle_report(
                        &task_id,
                        MessageKind::Assessment,
                        &output,
                        None,
                        None,
                        Tier::Supervisor,
                    )
                    .await;
            })
        });

        let handle = supervisor::start_supervisor(args, snapshot_fn, on_result).await?;
        self.supervisors.lock().await.insert(task_id.clone(), handle);
        Ok(())
    }

    fn workers_snapshot_fn(
        &self,
    ) -> Arc<dyn Fn(&TaskId) -> futures::future::BoxFuture<'static, bool> + Send + Sync> {
        let workers = self.workers.clone();
        Arc::new(move |task_id: &TaskId| {
            let workers = workers.clone();
            let task_id = task_id.clone();
            Box::pin(async move { workers.lock().await.contains_key(&task_id) })
        })
    }

    pub async fn stop_task(&self, task_id: &TaskId) {
        if let Some(handle) = self.workers.lock().await.remove(task_id) {
            handle.stop().await;
        }
        if let Some(handle) = self.supervisors.lock().await.remove(task_id) {
            handle.stop().await;
        }
    }

    pub async fn stop_all(&self) {
        let worker_ids: Vec<TaskId> = self.workers.lock().await.keys().cloned().collect();
        for id in worker_ids {
            self.stop_task(&id).await;
        }
    }

    pub async fn request_supervisor_check(&self, task_id: &TaskId) {
        if let Some(handle) = self.supervisors.lock().await.get(task_id) {
            handle.request_check();
        }
    }

    pub async fn has_worker(&self, task_id: &TaskId) -> bool {
        self.workers.lock().await.contains_key(task_id)
    }

    pub async fn has_supervisor(&self, task_id: &TaskId) -> bool {
        self.supervisors.lock().await.contains_key(task_id)
    }

    pub async fn active_count(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn status(&self) -> PoolStatus {
        PoolStatus {
            active_workers: self.workers.lock().await.len(),
            active_supervisors: self.supervisors.lock().await.len(),
        }
    }
}

async fn handle_worker_outcome(
    tasks: &Arc<TaskManager>,
    task_id: &TaskId,
    outcome: WorkerOutcome,
) -> Result<(), crate::tasks::TaskError> {
    match outcome {
        WorkerOutcome::Success(summary) => {
            tasks
                .handle_report(
                    task_id,
                    MessageKind::Progress,
                    &summary,
                    None,
                    None,
                    Tier::Worker,
                )
                .await?;
        }
        WorkerOutcome::NonZeroExit(code) => {
            tasks
                .request_retry(task_id, &format!("ERROR (exit {code})"))
                .await?;
        }
        WorkerOutcome::PreLaunchError(msg) => {
            tasks
                .request_retry(task_id, &format!("UNEXPECTED ERROR: {msg}"))
                .await?;
        }
    }
    Ok(())
}
