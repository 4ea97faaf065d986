//! A worker that exits non-zero without reporting should land the task in
//! `NeedsInput` with a retry reason describing the exit code, never silently
//! vanish.

mod support;

use std::time::Duration;

use serde_json::json;

#[tokio::test]
async fn crashing_worker_requests_retry() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let agent = support::write_fake_agent(
        scratch.path(),
        &support::echo_and_exit(&["about to crash"], 7),
        &support::echo_and_exit(&[], 0),
    );

    let gateway = support::spawn_gateway(&agent).await;

    let created = support::call_tool(
        &gateway.mcp_url,
        "tasks_create",
        json!({
            "name": "crash-demo",
            "prompt": "do something doomed",
            "channel": "telegram",
            "target": "123",
            "auto_supervise": false,
        }),
    )
    .await;
    let task_id = created["task_id"].as_str().expect("task_id").to_string();

    let tasks = gateway.tasks.clone();
    let converged = support::wait_until(Duration::from_secs(10), || {
        let tasks = tasks.clone();
        let task_id = task_id.clone();
        async move {
            tasks
                .get(&task_id)
                .await
                .map(|t| t.retry_pending)
                .unwrap_or(false)
        }
    })
    .await;

    assert!(converged, "crashing worker never set retry_pending");
    let task = gateway.tasks.get(&task_id).await.expect("task exists");
    assert_eq!(task.status, orchestra::tasks::TaskStatus::NeedsInput);
    let reason = task.retry_reason.expect("retry_reason set");
    assert!(reason.contains("ERROR (exit 7)"), "unexpected retry reason: {reason}");
    assert!(!gateway.pool.has_worker(&task_id).await);
}
