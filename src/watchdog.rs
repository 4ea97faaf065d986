//! Idle-task watchdog: scans running tasks for stalled workers and escalates
//! through warn -> restart -> operator-notify, mirroring a circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use crate::config::WatchdogThresholds;
use crate::pool::WorkerPool;
use crate::tasks::{MessageKind, Task, TaskId, TaskManager, TaskStatus, Tier, WatchdogState};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub thresholds: WatchdogThresholds,
}

impl WatchdogConfig {
    pub fn from_thresholds(thresholds: WatchdogThresholds) -> Self {
        Self {
            interval: Duration::from_secs(5).max(thresholds.grace / 4),
            thresholds,
        }
    }
}

fn idle_duration(task: &Task) -> chrono::Duration {
    let last_activity = [
        task.last_worker_activity_at,
        task.watchdog_last_action_at,
        Some(task.updated_at),
        Some(task.created_at),
    ]
    .into_iter()
    .flatten()
    .max()
    .unwrap_or(task.created_at);
    Utc::now() - last_activity
}

/// Runs until `stop` reports `true`. One tick per `config.interval`.
pub async fn run_watchdog_loop(
    tasks: Arc<TaskManager>,
    pool: Arc<WorkerPool>,
    config: WatchdogConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    loop {
        tokio::select! {
            _ = stop.changed() => {
                if *stop.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                sweep(&tasks, &pool, &config).await;
            }
        }
    }
}

async fn sweep(tasks: &Arc<TaskManager>, pool: &Arc<WorkerPool>, config: &WatchdogConfig) {
    for task in tasks.list().await {
        if task.status != TaskStatus::Running || task.completion_deferred {
            continue;
        }
        let idle = idle_duration(&task);
        if idle < chrono::Duration::from_std(config.thresholds.grace).unwrap_or_default() {
            continue;
        }

        let worker_running = pool.has_worker(&task.task_id).await;

        if !worker_running {
            if idle >= chrono::Duration::from_std(config.thresholds.restart_after).unwrap_or_default() {
                let _ = tasks
                    .handle_report(
                        &task.task_id,
                        MessageKind::NeedsInput,
                        "Worker process is no longer running but the task is still marked as \
                         running. Reply to retry or cancel.",
                        None,
                        None,
                        Tier::Orchestrator,
                    )
                    .await;
            }
            continue;
        }

        act_on_running_worker(tasks, pool, config, &task, idle).await;
    }
}

async fn act_on_running_worker(
    tasks: &Arc<TaskManager>,
    pool: &Arc<WorkerPool>,
    config: &WatchdogConfig,
    task: &Task,
    idle: chrono::Duration,
) {
    let restart_after = chrono::Duration::from_std(config.thresholds.restart_after).unwrap_or_default();
    let warn_after = chrono::Duration::from_std(config.thresholds.warn_after).unwrap_or_default();

    if idle >= restart_after {
        if task.watchdog_restart_count < config.thresholds.max_restarts {
            pool.stop_task(&task.task_id).await;
            if pool.start_worker(&task.task_id, &task.prompt).await.is_ok() {
                mark_watchdog_state(tasks, &task.task_id, WatchdogState::Restarted, true).await;
            }
        } else {
            let _ = tasks
                .handle_report(
                    &task.task_id,
                    MessageKind::NeedsInput,
                    "Worker has been unresponsive and the restart budget is exhausted. Reply to \
                     retry or cancel.",
                    None,
                    None,
                    Tier::Orchestrator,
                )
                .await;
            mark_watchdog_state(tasks, &task.task_id, WatchdogState::NeedsInput, false).await;
        }
    } else if idle >= warn_after && task.watchdog_state == WatchdogState::None {
        let _ = tasks
            .send_message(
                &task.task_id,
                MessageKind::Instruction,
                "watchdog notice: no activity observed recently, please report status",
                Tier::Orchestrator,
            )
            .await;
        mark_watchdog_state(tasks, &task.task_id, WatchdogState::Warned, false).await;
    }
}

async fn mark_watchdog_state(
    tasks: &Arc<TaskManager>,
    task_id: &TaskId,
    state: WatchdogState,
    increment_restart: bool,
) {
    let _ = tasks
        .apply_watchdog_action(
            task_id,
            state,
            increment_restart,
            &format!("watchdog state -> {state:?}"),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Task, TimelineEntry};

    fn task_with_idle(minutes: i64) -> Task {
        Task {
            task_id: "t1".into(),
            name: "n".into(),
            prompt: "p".into(),
            status: TaskStatus::Running,
            created_at: Utc::now() - chrono::Duration::minutes(minutes + 5),
            updated_at: Utc::now() - chrono::Duration::minutes(minutes),
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
            last_worker_activity_at: Some(Utc::now() - chrono::Duration::minutes(minutes)),
            worker_exited_at: None,
            recovery_pending: false,
            timeline: Vec::<TimelineEntry>::new(),
            inbox: Vec::new(),
            outbox: Vec::new(),
        }
    }

    #[test]
    fn idle_duration_uses_most_recent_activity() {
        let task = task_with_idle(15);
        let idle = idle_duration(&task);
        assert!(idle >= chrono::Duration::minutes(14));
        assert!(idle < chrono::Duration::minutes(16));
    }
}
