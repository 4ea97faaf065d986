//! Deferred completion: an auto-supervised task's worker report is held
//! back until a supervisor assessment resolves it, per the deferred
//! completion state machine.

mod support;

use std::time::Duration;

use serde_json::json;

#[tokio::test]
async fn supervisor_confirms_completion() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let agent = support::write_fake_agent(
        scratch.path(),
        &support::report_and_exit(
            &["README.md"],
            "completed",
            "workspace listed successfully",
            "README.md",
            0,
        ),
        &support::report_and_exit(
            &[],
            "assessment",
            "looks complete and correct",
            "",
            0,
        ),
    );

    let gateway = support::spawn_gateway(&agent).await;

    let created = support::call_tool(
        &gateway.mcp_url,
        "tasks_create",
        json!({
            "name": "ls-supervised-demo",
            "prompt": "list the workspace",
            "channel": "telegram",
            "target": "123",
            "auto_supervise": true,
            "supervisor_check_interval_secs": 1,
        }),
    )
    .await;
    let task_id = created["task_id"].as_str().expect("task_id").to_string();

    let tasks = gateway.tasks.clone();
    let deferred = support::wait_until(Duration::from_secs(10), || {
        let tasks = tasks.clone();
        let task_id = task_id.clone();
        async move {
            tasks
                .get(&task_id)
                .await
                .map(|t| t.completion_deferred)
                .unwrap_or(false)
        }
    })
    .await;
    assert!(deferred, "worker completion was never deferred for supervisor review");

    gateway.pool.request_supervisor_check(&task_id).await;

    let tasks = gateway.tasks.clone();
    let converged = support::wait_until(Duration::from_secs(10), || {
        let tasks = tasks.clone();
        let task_id = task_id.clone();
        async move {
            tasks
                .get(&task_id)
                .await
                .map(|t| t.status == orchestra::tasks::TaskStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;

    assert!(converged, "task never reached Completed after supervisor assessment");
    let task = gateway.tasks.get(&task_id).await.expect("task exists");
    assert!(!task.completion_deferred);
    assert_eq!(task.supervisor_assessment_count, 0);
    assert!(task.completion_deferred_summary.is_none());
    assert!(!gateway.pool.has_worker(&task_id).await);
    assert!(!gateway.pool.has_supervisor(&task_id).await);
}
