//! Direct (non-deferred) completion: a task created without auto-supervision
//! finishes as soon as the worker reports `completed`.

mod support;

use std::time::Duration;

use serde_json::json;

#[tokio::test]
async fn worker_completes_task_directly() {
    let scratch = tempfile::tempdir().expect("tempdir");
    let agent = support::write_fake_agent(
        scratch.path(),
        &support::report_and_exit(
            &["README.md"],
            "completed",
            "listed the workspace",
            "README.md",
            0,
        ),
        &support::echo_and_exit(&[], 0),
    );

    let gateway = support::spawn_gateway(&agent).await;

    let created = support::call_tool(
        &gateway.mcp_url,
        "tasks_create",
        json!({
            "name": "ls-demo",
            "prompt": "list the workspace",
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
                .map(|t| t.status == orchestra::tasks::TaskStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;

    assert!(converged, "task never reached Completed");
    let task = gateway.tasks.get(&task_id).await.expect("task exists");
    assert!(!task.completion_deferred);
    assert!(!gateway.pool.has_worker(&task_id).await);
}
