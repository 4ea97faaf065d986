//! Local JSON-RPC 2.0 tool server exposed to worker/supervisor/orchestrator
//! agent subprocesses over HTTP, at `/mcp?task_id=&role=`.

pub mod tools;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::post;
use axum::Router as AxumRouter;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent_runner::AgentRunner;
use crate::config::ChannelCredentials;
use crate::events::EventRegistry;
use crate::pool::WorkerPool;
use crate::scheduler::Scheduler;
use crate::tasks::{TaskId, TaskManager, Tier};

pub use tools::ToolError;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }
    fn err(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into() }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolQuery {
    pub task_id: Option<TaskId>,
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ToolContext {
    pub task_id: Option<TaskId>,
    pub role: Option<Tier>,
}

impl From<ToolQuery> for ToolContext {
    fn from(q: ToolQuery) -> Self {
        let role = q.role.as_deref().and_then(|r| match r {
            "worker" => Some(Tier::Worker),
            "supervisor" => Some(Tier::Supervisor),
            "orchestrator" => Some(Tier::Orchestrator),
            _ => None,
        });
        Self { task_id: q.task_id, role }
    }
}

pub struct ToolServer {
    pub tasks: Arc<TaskManager>,
    pub scheduler: Arc<Scheduler>,
    pub events: Arc<EventRegistry>,
    pub pool: Arc<WorkerPool>,
    pub data_dir: std::path::PathBuf,
    pub audit_log_path: std::path::PathBuf,
    /// External tool-server URLs an agent has registered at runtime, keyed
    /// by name; merged into MCP config alongside the core server. Core
    /// always wins on name collision.
    pub external_servers: tokio::sync::RwLock<HashMap<String, String>>,
    /// Orchestrator-tier agent used to deliver the on-complete hook prompt.
    pub runner: Arc<AgentRunner>,
    pub channels: ChannelCredentials,
    pub http: reqwest::Client,
}

async fn handle_rpc(
    State(server): State<Arc<ToolServer>>,
    Query(query): Query<ToolQuery>,
    Json(req): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let ctx: ToolContext = query.into();
    let id = req.id.clone();

    let result = match req.method.as_str() {
        "initialize" => Ok(serde_json::json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": { "name": "orchestra", "version": env!("CARGO_PKG_VERSION") },
            "capabilities": { "tools": {} },
        })),
        "initialized" => Ok(Value::Null),
        "ping" => Ok(serde_json::json!({ "ok": true })),
        "tools/list" => Ok(serde_json::json!({ "tools": tools::tool_catalog() })),
        "tools/call" => {
            let params = req.params.unwrap_or(Value::Null);
            let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
            let args = params.get("arguments").cloned().unwrap_or(Value::Null);
            match server.call_tool(ctx.clone(), &name, args.clone()).await {
                Ok(value) => Ok(serde_json::json!({
                    "content": [{ "type": "text", "text": value.to_string() }],
                    "isError": false,
                })),
                Err(e) => {
                    tracing::warn!(target: "mcp_calls", tool = %name, error = %e, "tool call failed");
                    Ok(serde_json::json!({
                        "content": [{ "type": "text", "text": e.to_string() }],
                        "isError": true,
                    }))
                }
            }
        }
        other => Err((-32601, format!("method not found: {other}"))),
    };

    match result {
        Ok(value) => Json(JsonRpcResponse::ok(id, value)),
        Err((code, message)) => Json(JsonRpcResponse::err(id, code, message)),
    }
}

pub fn router(server: Arc<ToolServer>) -> AxumRouter {
    AxumRouter::new().route("/mcp", post(handle_rpc)).with_state(server)
}
