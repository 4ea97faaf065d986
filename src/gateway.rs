//! Process boot sequence: build every store, spawn the background loops,
//! bring up the HTTP surface, and run until shutdown is requested.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::agent_runner::{AgentRunner, AgentRunnerConfig};
use crate::api::ApiState;
use crate::config::Config;
use crate::daemon::DaemonPaths;
use crate::events::EventRegistry;
use crate::pairing::PairingStore;
use crate::policy::ExecutionPolicy;
use crate::pool::WorkerPool;
use crate::router::{AuditLog, Router};
use crate::scheduler::Scheduler;
use crate::session::SessionStore;
use crate::tasks::TaskManager;
use crate::toolserver::ToolServer;
use crate::watchdog::{run_watchdog_loop, WatchdogConfig};

/// Channels tried in this order when delivering the boot notification to
/// `owner_sender_id` — the config carries no per-channel "this is the
/// default" flag, so the first one with credentials wins.
const BOOT_NOTIFY_CHANNEL_PRIORITY: &[&str] = &["telegram", "slack", "teams", "whatsapp", "signal"];

pub async fn run_gateway(config: Config) -> anyhow::Result<()> {
    let config = Arc::new(config);

    tokio::fs::create_dir_all(&config.data_dir).await?;
    tokio::fs::create_dir_all(&config.log_dir).await?;
    tokio::fs::create_dir_all(&config.tasks_root()).await?;
    tokio::fs::create_dir_all(&config.workspace_dir).await?;

    if config.clear_volatile_state {
        for path in config.volatile_state_paths() {
            if path.exists() {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        tracing::info!("cleared volatile state (pairing.json preserved)");
    }

    let tasks = Arc::new(TaskManager::load(config.tasks_json_path(), config.tasks_root()).await?);
    let scheduler = Arc::new(Scheduler::load(config.jobs_json_path(), config.job_runs_path()).await?);
    let sessions = Arc::new(SessionStore::load(config.sessions_json_path()).await?);
    let pairing = Arc::new(PairingStore::load(config.pairing_json_path()).await?);
    let events = Arc::new(EventRegistry::new(config.tasks_root()));
    let policy = Arc::new(ExecutionPolicy::from_config(&config.policy));

    let tool_server_url = format!("http://{}/mcp", config.bind_addr);

    let orchestrator_runner = Arc::new(AgentRunner::new(AgentRunnerConfig {
        program: config.agent_program.clone(),
        tool_server_url: tool_server_url.clone(),
        extra_dirs: vec![config.workspace_dir.clone()],
        timeout: config.cli_timeout,
        session_state_dir: config.data_dir.join("orchestrator-sessions"),
    }));

    let pool = Arc::new(WorkerPool::new(
        tasks.clone(),
        config.workspace_dir.clone(),
        config.tasks_root(),
        tool_server_url.clone(),
        config.agent_program.clone(),
        config.cli_timeout,
    ));

    let tool_server = Arc::new(ToolServer {
        tasks: tasks.clone(),
        scheduler: scheduler.clone(),
        events: events.clone(),
        pool: pool.clone(),
        data_dir: config.data_dir.clone(),
        audit_log_path: config.audit_jsonl_path(),
        external_servers: tokio::sync::RwLock::new(Default::default()),
        runner: orchestrator_runner.clone(),
        channels: config.channels.clone(),
        http: reqwest::Client::new(),
    });

    let audit = Arc::new(AuditLog::new(config.log_dir.join("commands.log")));
    let router = Arc::new(Router {
        tasks: tasks.clone(),
        scheduler: scheduler.clone(),
        sessions: sessions.clone(),
        pairing: pairing.clone(),
        policy: policy.clone(),
        runner: orchestrator_runner.clone(),
        audit,
        pairing_mode: config.pairing_mode,
        pool: pool.clone(),
    });

    let (stop_tx, stop_rx) = watch::channel(false);

    let api_state = Arc::new(ApiState {
        config: config.clone(),
        router: router.clone(),
        tasks: tasks.clone(),
        scheduler: scheduler.clone(),
        pool: pool.clone(),
        runner: orchestrator_runner.clone(),
        http: reqwest::Client::new(),
        started_at: chrono::Utc::now(),
        shutdown_tx: stop_tx.clone(),
        restart_requested: AtomicBool::new(false),
        daemon_paths: DaemonPaths::new(&config.instance_dir),
        webhook_rate_limiter: crate::rate_limit::RateLimiter::new(
            config.webhook_rate_limit_calls,
            config.webhook_rate_limit_window,
        ),
    });

    spawn_scheduler_loop(scheduler.clone(), pool.clone(), tasks.clone(), stop_rx.clone());
    tokio::spawn(run_watchdog_loop(
        tasks.clone(),
        pool.clone(),
        WatchdogConfig::from_thresholds(config.watchdog.clone()),
        stop_rx.clone(),
    ));
    spawn_signal_poll_loop(config.clone(), api_state.clone(), stop_rx.clone());

    send_boot_notification(&config, &orchestrator_runner, &api_state).await;
    recover_stale_tasks(&tasks).await;

    let app = crate::api::build_router(api_state.clone(), tool_server.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let mut shutdown_rx = stop_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|v| *v).await;
        })
        .await?;

    pool.stop_all().await;

    if api_state.restart_requested.load(Ordering::SeqCst) {
        tracing::info!("restart requested, re-executing");
        let exe = std::env::current_exe()?;
        let args: Vec<String> = std::env::args().skip(1).collect();
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            let error = std::process::Command::new(exe).args(args).exec();
            return Err(anyhow::anyhow!("re-exec failed: {error}"));
        }
        #[cfg(not(unix))]
        {
            std::process::Command::new(exe).args(args).spawn()?;
        }
    }

    Ok(())
}

fn spawn_scheduler_loop(
    scheduler: Arc<Scheduler>,
    pool: Arc<WorkerPool>,
    tasks: Arc<TaskManager>,
    mut stop: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for job in scheduler.due(chrono::Utc::now()).await {
                        dispatch_due_job(&scheduler, &pool, &tasks, job).await;
                    }
                }
            }
        }
    });
}

async fn dispatch_due_job(
    scheduler: &Arc<Scheduler>,
    pool: &Arc<WorkerPool>,
    tasks: &Arc<TaskManager>,
    job: crate::scheduler::ScheduledJob,
) {
    let kind = job.payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let result = match kind {
        "supervisor_check" => {
            if let Some(task_id) = job.payload.get("task_id").and_then(|v| v.as_str()) {
                pool.request_supervisor_check(&task_id.to_string()).await;
            }
            Ok(())
        }
        "continuous_tick" => Ok(()),
        _ => {
            let prompt = job.payload.get("prompt").and_then(|v| v.as_str()).unwrap_or("");
            let channel = job.payload.get("channel").and_then(|v| v.as_str()).unwrap_or("");
            let target = job.payload.get("target").and_then(|v| v.as_str()).unwrap_or("");
            let service_url = job
                .payload
                .get("service_url")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string());
            let input = crate::tasks::CreateTaskInput {
                name: format!("scheduled:{}", job.name),
                prompt: prompt.to_string(),
                channel: channel.to_string(),
                target: target.to_string(),
                service_url,
                auto_supervise: true,
                supervisor_instructions: None,
                supervisor_check_interval_secs: 300,
                on_complete: None,
                proposed: false,
            };
            start_scheduled_task(tasks, pool, input).await
        }
    };
    if let Err(error) = result {
        tracing::warn!(job_id = %job.job_id, %error, "scheduled job dispatch failed");
        let _ = scheduler.log_run(&job.job_id, "error", Some(error.to_string().as_str())).await;
    } else {
        let _ = scheduler.log_run(&job.job_id, "ok", None).await;
    }
    let _ = scheduler.mark_completed(&job.job_id).await;
}

async fn start_scheduled_task(
    tasks: &Arc<TaskManager>,
    pool: &Arc<WorkerPool>,
    input: crate::tasks::CreateTaskInput,
) -> anyhow::Result<()> {
    let task = tasks.create_task(input).await?;
    if task.status == crate::tasks::TaskStatus::Pending {
        pool.start_worker(&task.task_id, &task.prompt).await?;
        if task.auto_supervise {
            pool.start_supervisor(
                &task.task_id,
                Duration::from_secs(task.supervisor_check_interval_secs),
            )
            .await?;
        }
    }
    Ok(())
}

fn spawn_signal_poll_loop(config: Arc<Config>, api_state: Arc<ApiState>, stop: watch::Receiver<bool>) {
    let Some(base_url) = config.channels.signal_cli_url.clone() else {
        return;
    };
    let Some(number) = config.owner_sender_id.clone() else {
        return;
    };
    let http = api_state.http.clone();
    tokio::spawn(crate::channels::signal::run_poll_loop(
        base_url,
        number,
        http,
        Duration::from_secs(5),
        move |req| {
            let state = api_state.clone();
            tokio::spawn(async move {
                let response = state.router.handle(req.clone()).await;
                if let Err(error) = crate::channels::send(
                    "signal",
                    &state.config.channels,
                    &state.http,
                    &req.chat_id,
                    &response.text,
                    None,
                )
                .await
                {
                    tracing::warn!(%error, "failed to deliver signal reply");
                }
            });
        },
        stop,
    ));
}

async fn send_boot_notification(config: &Config, runner: &AgentRunner, api_state: &ApiState) {
    let _ = runner
        .run_prompt("The orchestrator process has just started. No reply needed.", None, |_| {})
        .await;

    let Some(owner) = config.owner_sender_id.as_deref() else {
        return;
    };
    for channel in BOOT_NOTIFY_CHANNEL_PRIORITY {
        let configured = match *channel {
            "telegram" => config.channels.telegram_bot_token.is_some(),
            "slack" => config.channels.slack_bot_token.is_some(),
            "teams" => config.channels.teams_app_id.is_some(),
            "whatsapp" => config.channels.whatsapp_access_token.is_some(),
            "signal" => config.channels.signal_cli_url.is_some(),
            _ => false,
        };
        if !configured {
            continue;
        }
        let result = crate::channels::send(
            channel,
            &config.channels,
            &api_state.http,
            owner,
            "orchestrator is back online",
            None,
        )
        .await;
        if result.is_ok() {
            break;
        }
        tracing::warn!(channel = %channel, error = ?result.err(), "boot notification failed");
    }
}

async fn recover_stale_tasks(tasks: &Arc<TaskManager>) {
    for task in tasks.stale_active_tasks().await {
        let _ = tasks.mark_recovery_pending(&task.task_id).await;
    }
}
