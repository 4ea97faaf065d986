//! HTTP surface: health/control endpoints, the direct orchestrator
//! passthrough, and the per-channel webhook routes. The `/mcp` surface
//! itself is mounted from `crate::toolserver::router`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router as AxumRouter;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::agent_runner::AgentRunner;
use crate::channels;
use crate::config::Config;
use crate::daemon::DaemonPaths;
use crate::pool::WorkerPool;
use crate::rate_limit::RateLimiter;
use crate::router::{ChatRequest, Router};
use crate::scheduler::Scheduler;
use crate::tasks::TaskManager;
use crate::toolserver::ToolServer;

pub struct ApiState {
    pub config: Arc<Config>,
    pub router: Arc<Router>,
    pub tasks: Arc<TaskManager>,
    pub scheduler: Arc<Scheduler>,
    pub pool: Arc<WorkerPool>,
    pub runner: Arc<AgentRunner>,
    pub http: reqwest::Client,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub shutdown_tx: watch::Sender<bool>,
    pub restart_requested: AtomicBool,
    pub daemon_paths: DaemonPaths,
    pub webhook_rate_limiter: RateLimiter,
}

pub fn build_router(state: Arc<ApiState>, tool_server: Arc<ToolServer>) -> AxumRouter {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    AxumRouter::new()
        .route("/health", get(health))
        .route("/control/status", get(control_status))
        .route("/control/health", get(control_health))
        .route("/control/metrics", get(control_metrics))
        .route("/control/restart", post(control_restart))
        .route("/agent", post(agent_passthrough))
        .route("/telegram/webhook", post(telegram_webhook))
        .route(
            "/teams/api/messages",
            post(teams_webhook),
        )
        .route(
            "/whatsapp/webhook",
            get(whatsapp_verify).post(whatsapp_webhook),
        )
        .route("/slack/events", post(slack_webhook))
        .nest(
            "/mcp",
            crate::toolserver::router(tool_server)
                .layer(middleware::from_fn_with_state(state.clone(), mcp_auth)),
        )
        .layer(cors)
        .with_state(state)
}

/// Gate `/mcp` behind `X-MCP-Token`/`Authorization: Bearer`, when a token is
/// configured. Agent subprocesses are the only intended callers.
async fn mcp_auth(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    match state.config.mcp_token.as_deref() {
        Some(expected) if !mcp_auth_ok(&headers, expected) => {
            StatusCode::UNAUTHORIZED.into_response()
        }
        _ => next.run(request).await,
    }
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn control_status(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let uptime = (chrono::Utc::now() - state.started_at).num_seconds().max(0);
    Json(json!({
        "pid": std::process::id(),
        "uptime_seconds": uptime,
        "tasks": state.tasks.list().await.len(),
        "jobs": state.scheduler.list().await.len(),
    }))
}

async fn control_health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let pool_status = state.pool.status().await;
    Json(json!({
        "status": "ok",
        "active_workers": pool_status.active_workers,
        "active_supervisors": pool_status.active_supervisors,
    }))
}

async fn control_metrics(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let pool_status = state.pool.status().await;
    let tasks = state.tasks.list().await;
    let jobs = state.scheduler.list().await;

    #[cfg(feature = "metrics")]
    {
        let text = format!(
            "orchestra_active_workers {}\norchestra_active_supervisors {}\norchestra_tasks_total {}\norchestra_jobs_total {}\n",
            pool_status.active_workers,
            pool_status.active_supervisors,
            tasks.len(),
            jobs.len(),
        );
        return (
            [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response();
    }
    #[cfg(not(feature = "metrics"))]
    {
        Json(json!({
            "active_workers": pool_status.active_workers,
            "active_supervisors": pool_status.active_supervisors,
            "tasks_total": tasks.len(),
            "jobs_total": jobs.len(),
        }))
        .into_response()
    }
}

async fn control_restart(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    state.restart_requested.store(true, Ordering::SeqCst);
    let _ = state.shutdown_tx.send(true);
    (StatusCode::ACCEPTED, Json(json!({ "status": "restarting" })))
}

#[derive(Debug, Deserialize)]
struct AgentPassthroughRequest {
    prompt: String,
}

/// Bypasses the channel router entirely and talks straight to the
/// orchestrator's own `AgentRunner` — for operator tooling, not for chat
/// traffic from an external platform.
async fn agent_passthrough(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<AgentPassthroughRequest>,
) -> impl IntoResponse {
    match state.runner.run_prompt(&req.prompt, None, |_| {}).await {
        Ok(turn) => Json(json!({ "output": turn.output })).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Process a parsed `ChatRequest` in the background and post the reply back
/// out through the originating channel, so the webhook handler can ack
/// immediately without holding the platform's retry timer hostage.
/// `true` if the sender is still within the configured webhook rate limit.
async fn rate_limit_ok(state: &ApiState, channel: &str, sender_id: &str) -> bool {
    state
        .webhook_rate_limiter
        .allow(&format!("{channel}:{sender_id}"))
        .await
}

fn dispatch_and_reply(state: Arc<ApiState>, req: ChatRequest) {
    tokio::spawn(async move {
        let channel = req.channel.clone();
        let chat_id = req.chat_id.clone();
        let service_url = req.service_url.clone();
        let response = state.router.handle(req).await;
        if let Err(error) = channels::send(
            &channel,
            &state.config.channels,
            &state.http,
            &chat_id,
            &response.text,
            service_url.as_deref(),
        )
        .await
        {
            tracing::warn!(%error, channel = %channel, "failed to deliver channel reply");
        }
    });
}

fn mcp_auth_ok(headers: &HeaderMap, expected: &str) -> bool {
    if let Some(token) = headers.get("x-mcp-token").and_then(|v| v.to_str().ok()) {
        if token == expected {
            return true;
        }
    }
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(bearer) = auth.strip_prefix("Bearer ") {
            return bearer == expected;
        }
    }
    false
}

async fn telegram_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(update): Json<teloxide::types::Update>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|v| v.to_str().ok());
    if !channels::telegram::verify_secret(&state.config.channels, provided) {
        return StatusCode::UNAUTHORIZED;
    }
    if let Some(req) = channels::telegram::parse_update(&update) {
        if !rate_limit_ok(&state, &req.channel, &req.sender_id).await {
            return StatusCode::TOO_MANY_REQUESTS;
        }
        dispatch_and_reply(state, req);
    }
    StatusCode::OK
}

async fn teams_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(activity): Json<channels::teams::Activity>,
) -> impl IntoResponse {
    let authorization = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if !channels::teams::verify_authorization(&state.config.channels, authorization) {
        return StatusCode::UNAUTHORIZED;
    }
    if let Some(req) = channels::teams::parse_activity(&activity) {
        if !rate_limit_ok(&state, &req.channel, &req.sender_id).await {
            return StatusCode::TOO_MANY_REQUESTS;
        }
        dispatch_and_reply(state, req);
    }
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct WhatsAppVerifyQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

async fn whatsapp_verify(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<WhatsAppVerifyQuery>,
) -> Response {
    match channels::whatsapp::verify_subscription(
        &state.config.channels,
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
    ) {
        Some(challenge) => challenge.into_response(),
        None => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn whatsapp_webhook(
    State(state): State<Arc<ApiState>>,
    Json(payload): Json<channels::whatsapp::WebhookPayload>,
) -> impl IntoResponse {
    for req in channels::whatsapp::parse_payload(&payload) {
        if rate_limit_ok(&state, &req.channel, &req.sender_id).await {
            dispatch_and_reply(state.clone(), req);
        }
    }
    StatusCode::OK
}

async fn slack_webhook(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let Some(signing_secret) = state.config.channels.slack_signing_secret.as_deref() else {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let signature = headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if channels::slack::verify_signature(signing_secret, timestamp, &body, signature).is_err() {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: channels::slack::SlackPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };
    match payload {
        channels::slack::SlackPayload::UrlVerification { challenge } => challenge.into_response(),
        channels::slack::SlackPayload::EventCallback { event } => {
            if let Some(req) = channels::slack::parse_event(&event) {
                if rate_limit_ok(&state, &req.channel, &req.sender_id).await {
                    dispatch_and_reply(state, req);
                }
            }
            StatusCode::OK.into_response()
        }
    }
}
