//! A worker that is alive but has gone idle past `restart_after` should be
//! killed and relaunched by the watchdog sweep, with the restart counted.

mod support;

use std::time::Duration;

use orchestra::config::WatchdogThresholds;
use orchestra::tasks::{CreateTaskInput, TaskStatus};
use orchestra::watchdog::{run_watchdog_loop, WatchdogConfig};
use tokio::sync::watch;

#[tokio::test]
async fn stuck_worker_gets_restarted() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let agent = support::write_fake_agent(
        scratch.path(),
        &support::sleep_forever(),
        &support::sleep_forever(),
    );

    let gateway = support::spawn_gateway(&agent).await;

    let task = gateway
        .tasks
        .create_task(CreateTaskInput {
            name: "stuck-demo".into(),
            prompt: "watch paint dry".into(),
            channel: "telegram".into(),
            target: "123".into(),
            service_url: None,
            auto_supervise: false,
            supervisor_instructions: None,
            supervisor_check_interval_secs: 60,
            on_complete: None,
            proposed: false,
        })
        .await
        .expect("create task");
    assert_eq!(task.status, TaskStatus::Pending);

    gateway
        .tasks
        .update_status(&task.task_id, TaskStatus::Running)
        .await
        .expect("mark running");
    gateway
        .pool
        .start_worker(&task.task_id, &task.prompt)
        .await
        .expect("start worker");

    let (stop_tx, stop_rx) = watch::channel(false);
    let config = WatchdogConfig {
        interval: Duration::from_millis(20),
        thresholds: WatchdogThresholds {
            grace: Duration::from_millis(10),
            warn_after: Duration::from_millis(15),
            restart_after: Duration::from_millis(20),
            max_restarts: 3,
        },
    };
    let loop_handle = tokio::spawn(run_watchdog_loop(
        gateway.tasks.clone(),
        gateway.pool.clone(),
        config,
        stop_rx,
    ));

    let tasks = gateway.tasks.clone();
    let task_id = task.task_id.clone();
    let restarted = support::wait_until(Duration::from_secs(10), || {
        let tasks = tasks.clone();
        let task_id = task_id.clone();
        async move {
            tasks
                .get(&task_id)
                .await
                .map(|t| t.watchdog_restart_count >= 1)
                .unwrap_or(false)
        }
    })
    .await;

    let _ = stop_tx.send(true);
    loop_handle.abort();

    assert!(restarted, "watchdog never restarted the stuck worker");
    assert!(gateway.pool.has_worker(&task.task_id).await, "restarted worker should still be running");
}
