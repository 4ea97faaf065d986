//! Shared fixtures for end-to-end tests: an in-process gateway serving the
//! real MCP tool surface over HTTP, plus a scriptable fake agent executable
//! that stands in for the external CLI agent `AgentRunner` would otherwise
//! spawn.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use orchestra::agent_runner::{AgentRunner, AgentRunnerConfig};
use orchestra::config::ChannelCredentials;
use orchestra::events::EventRegistry;
use orchestra::pool::WorkerPool;
use orchestra::scheduler::Scheduler;
use orchestra::tasks::TaskManager;
use orchestra::toolserver::{self, ToolServer};

/// A fully wired gateway listening on an ephemeral port, backed by a fresh
/// temp directory that is removed when the `TempDir` is dropped. The HTTP
/// server task is aborted on drop.
pub struct TestGateway {
    pub mcp_url: String,
    pub tasks: Arc<TaskManager>,
    pub pool: Arc<WorkerPool>,
    #[allow(dead_code)]
    pub tool_server: Arc<ToolServer>,
    #[allow(dead_code)]
    pub data_dir: tempfile::TempDir,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Build a gateway whose worker/supervisor/orchestrator subprocesses all
/// invoke `agent_program`.
pub async fn spawn_gateway(agent_program: &Path) -> TestGateway {
    let data_dir = tempfile::tempdir().expect("tempdir");
    let tasks_root = data_dir.path().join("tasks");
    let workspace_dir = data_dir.path().join("workspace");
    tokio::fs::create_dir_all(&tasks_root).await.expect("create tasks root");
    tokio::fs::create_dir_all(&workspace_dir).await.expect("create workspace dir");
    tokio::fs::write(workspace_dir.join("README.md"), "demo workspace\n")
        .await
        .expect("seed workspace");

    let tasks = Arc::new(
        TaskManager::load(data_dir.path().join("tasks.json"), tasks_root.clone())
            .await
            .expect("load task manager"),
    );
    let scheduler = Arc::new(
        Scheduler::load(
            data_dir.path().join("jobs.json"),
            data_dir.path().join("job-runs.jsonl"),
        )
        .await
        .expect("load scheduler"),
    );
    let events = Arc::new(EventRegistry::new(tasks_root.clone()));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let mcp_url = format!("http://{addr}/mcp");

    let pool = Arc::new(WorkerPool::new(
        tasks.clone(),
        workspace_dir.clone(),
        tasks_root.clone(),
        mcp_url.clone(),
        agent_program.to_path_buf(),
        Duration::from_secs(30),
    ));

    let runner = Arc::new(AgentRunner::new(AgentRunnerConfig {
        program: agent_program.to_path_buf(),
        tool_server_url: mcp_url.clone(),
        extra_dirs: vec![workspace_dir.clone()],
        timeout: Duration::from_secs(30),
        session_state_dir: data_dir.path().join("orchestrator-sessions"),
    }));

    let tool_server = Arc::new(ToolServer {
        tasks: tasks.clone(),
        scheduler: scheduler.clone(),
        events: events.clone(),
        pool: pool.clone(),
        data_dir: data_dir.path().to_path_buf(),
        audit_log_path: data_dir.path().join("audit.jsonl"),
        external_servers: tokio::sync::RwLock::new(Default::default()),
        runner,
        channels: ChannelCredentials::default(),
        http: reqwest::Client::new(),
    });

    let app = toolserver::router(tool_server.clone());
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    TestGateway {
        mcp_url,
        tasks,
        pool,
        tool_server,
        data_dir,
        server,
    }
}

/// Call a tool over the gateway's MCP endpoint as the orchestrator (no task
/// context) and return the decoded JSON result.
pub async fn call_tool(mcp_url: &str, tool: &str, args: serde_json::Value) -> serde_json::Value {
    call_tool_as(mcp_url, tool, args, None, None).await
}

/// Call a tool with an explicit `task_id`/`role`, mirroring how a worker or
/// supervisor subprocess addresses the server (`/mcp?task_id=..&role=..`).
pub async fn call_tool_as(
    mcp_url: &str,
    tool: &str,
    args: serde_json::Value,
    task_id: Option<&str>,
    role: Option<&str>,
) -> serde_json::Value {
    let client = reqwest::Client::new();
    let mut url = reqwest::Url::parse(mcp_url).expect("parse mcp url");
    {
        let mut pairs = url.query_pairs_mut();
        if let Some(id) = task_id {
            pairs.append_pair("task_id", id);
        }
        if let Some(r) = role {
            pairs.append_pair("role", r);
        }
    }
    let body = serde_json::json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": { "name": tool, "arguments": args },
    });
    let response: serde_json::Value = client
        .post(url)
        .json(&body)
        .send()
        .await
        .expect("mcp http request")
        .json()
        .await
        .expect("mcp json response");
    let text = response["result"]["content"][0]["text"]
        .as_str()
        .expect("tool result text")
        .to_string();
    serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text))
}

/// Poll `check` every 100ms until it returns `true` or `timeout` elapses.
/// Returns whether it converged.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Write an executable shell script standing in for the external CLI agent.
/// The real `AgentRunner` spawns the same executable for every tier, so the
/// script branches on `--mcp-url`'s `role=` query parameter to tell a worker
/// invocation from a supervisor one.
pub fn write_fake_agent(dir: &Path, worker_body: &str, supervisor_body: &str) -> PathBuf {
    let path = dir.join("fake-agent.sh");
    let script = format!(
        "#!/bin/sh\n\
         mcp_url=\"\"\n\
         prev=\"\"\n\
         for arg in \"$@\"; do\n\
         \x20 if [ \"$prev\" = \"--mcp-url\" ]; then\n\
         \x20   mcp_url=\"$arg\"\n\
         \x20 fi\n\
         \x20 prev=\"$arg\"\n\
         done\n\
         case \"$mcp_url\" in\n\
         \x20 *role=supervisor*)\n\
         {supervisor_body}\n\
         \x20   ;;\n\
         \x20 *)\n\
         {worker_body}\n\
         \x20   ;;\n\
         esac\n"
    );
    std::fs::write(&path, script).expect("write fake agent script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).expect("stat fake agent").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod fake agent");
    }
    path
}

/// Shell snippet: echo each line, POST a `task_report` call back to the
/// tool server carried in `$mcp_url`, then exit with `exit_code`.
pub fn report_and_exit(
    lines: &[&str],
    report_type: &str,
    summary: &str,
    detail: &str,
    exit_code: i32,
) -> String {
    let echoes: String = lines.iter().map(|l| format!("    echo '{l}'\n")).collect();
    format!(
        "{echoes}    curl -s -X POST \"$mcp_url\" -H 'Content-Type: application/json' \
         -d '{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{{\"name\":\"task_report\",\
         \"arguments\":{{\"type\":\"{report_type}\",\"summary\":\"{summary}\",\"detail\":\"{detail}\"}}}}}}' \
         >/dev/null 2>&1 || true\n    exit {exit_code}"
    )
}

/// Shell snippet: echo each line and exit, without calling back into the
/// tool server.
pub fn echo_and_exit(lines: &[&str], exit_code: i32) -> String {
    let echoes: String = lines.iter().map(|l| format!("    echo '{l}'\n")).collect();
    format!("{echoes}    exit {exit_code}")
}

/// Shell snippet simulating a worker that is alive but stuck making no
/// progress, for the watchdog-restart scenario.
pub fn sleep_forever() -> String {
    "    sleep 3600".to_string()
}
