//! Top-level error types for the orchestrator.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors. Each domain
/// sub-error lives next to the module it belongs to (`ConfigError` in
/// `config.rs`, `TaskError` in `tasks/mod.rs`, and so on); this enum only
/// wires them together so call sites can use `?` across module boundaries.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Task(#[from] crate::tasks::TaskError),

    #[error(transparent)]
    Pool(#[from] crate::pool::PoolError),

    #[error(transparent)]
    AgentRunner(#[from] crate::agent_runner::AgentRunnerError),

    #[error(transparent)]
    Tool(#[from] crate::toolserver::ToolError),

    #[error(transparent)]
    Scheduler(#[from] crate::scheduler::SchedulerError),

    #[error(transparent)]
    Policy(#[from] crate::policy::PolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;
        let status = match &self {
            Error::Config(_) | Error::Policy(_) => StatusCode::BAD_REQUEST,
            Error::Task(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
