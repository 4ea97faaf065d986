//! Process configuration, loaded from the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("disclaimer not accepted: set ORCHESTRA_DISCLAIMER_ACCEPTED=1 to continue")]
    DisclaimerNotAccepted,

    #[error("missing required env var: {0}")]
    MissingEnv(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-channel credential bundle. Fields are `None` when the channel is not
/// configured; the gateway only starts adapters whose credentials are present.
#[derive(Debug, Clone, Default)]
pub struct ChannelCredentials {
    pub telegram_bot_token: Option<String>,
    pub telegram_webhook_secret: Option<String>,
    pub teams_app_id: Option<String>,
    pub teams_app_password: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_verify_token: Option<String>,
    pub whatsapp_phone_number_id: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub signal_cli_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WatchdogThresholds {
    pub grace: Duration,
    pub warn_after: Duration,
    pub restart_after: Duration,
    pub max_restarts: u32,
}

impl Default for WatchdogThresholds {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(60),
            warn_after: Duration::from_secs(10 * 60),
            restart_after: Duration::from_secs(20 * 60),
            max_restarts: 3,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub allow_all: bool,
    pub allowed_commands: Vec<String>,
    pub denied_commands: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMode {
    Pairing,
    Open,
}

/// Tracing/OTLP export settings, split out of `Config` because `daemon.rs`
/// needs them before the rest of the config (log dir, tokens) is relevant.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: std::collections::HashMap<String, String>,
    pub service_name: String,
    pub sample_rate: f64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            otlp_headers: std::collections::HashMap::new(),
            service_name: "orchestra".to_string(),
            sample_rate: 1.0,
        }
    }
}

/// Top-level process configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub disclaimer_accepted: bool,
    pub workspace_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub cli_timeout: Duration,
    pub agent_program: PathBuf,
    pub bind_addr: String,
    pub mcp_token: Option<String>,
    pub channels: ChannelCredentials,
    pub webhook_rate_limit_calls: usize,
    pub webhook_rate_limit_window: Duration,
    pub pairing_mode: PairingMode,
    pub watchdog: WatchdogThresholds,
    pub policy: PolicyConfig,
    pub backup_max_snapshots: usize,
    pub owner_sender_id: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub clear_volatile_state: bool,
    pub telemetry: TelemetryConfig,
    pub instance_dir: PathBuf,
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_var(key) {
        Some(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, ConfigError> {
    match env_var(key) {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            value: v,
        }),
        None => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    env_var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl Config {
    /// Load configuration entirely from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let disclaimer_accepted = env_bool("ORCHESTRA_DISCLAIMER_ACCEPTED", false);
        if !disclaimer_accepted {
            return Err(ConfigError::DisclaimerNotAccepted);
        }

        let default_root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orchestra");

        let data_dir = env_var("ORCHESTRA_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_root.join("data"));
        let log_dir = env_var("ORCHESTRA_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_root.join("logs"));
        let workspace_dir = env_var("ORCHESTRA_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_root.join("workspace"));

        let pairing_mode = match env_var("ORCHESTRA_PAIRING_MODE").as_deref() {
            Some("open") => PairingMode::Open,
            _ => PairingMode::Pairing,
        };

        let policy = PolicyConfig {
            allow_all: env_bool("ORCHESTRA_EXEC_ALLOW_ALL", false),
            allowed_commands: env_list("ORCHESTRA_EXEC_ALLOWED_COMMANDS"),
            denied_commands: env_list("ORCHESTRA_EXEC_DENIED_COMMANDS"),
        };

        let watchdog = WatchdogThresholds {
            grace: Duration::from_secs(env_u64("ORCHESTRA_WATCHDOG_GRACE_SECS", 60)?),
            warn_after: Duration::from_secs(env_u64("ORCHESTRA_WATCHDOG_WARN_AFTER_SECS", 600)?),
            restart_after: Duration::from_secs(env_u64(
                "ORCHESTRA_WATCHDOG_RESTART_AFTER_SECS",
                1200,
            )?),
            max_restarts: env_u64("ORCHESTRA_WATCHDOG_MAX_RESTARTS", 3)? as u32,
        };

        Ok(Self {
            disclaimer_accepted,
            workspace_dir,
            data_dir,
            log_dir,
            cli_timeout: Duration::from_secs(env_u64("ORCHESTRA_CLI_TIMEOUT_SECS", 600)?),
            agent_program: env_var("ORCHESTRA_AGENT_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("agent")),
            bind_addr: env_var("ORCHESTRA_BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8787".into()),
            mcp_token: env_var("ORCHESTRA_MCP_TOKEN"),
            channels: ChannelCredentials {
                telegram_bot_token: env_var("ORCHESTRA_TELEGRAM_BOT_TOKEN"),
                telegram_webhook_secret: env_var("ORCHESTRA_TELEGRAM_WEBHOOK_SECRET"),
                teams_app_id: env_var("ORCHESTRA_TEAMS_APP_ID"),
                teams_app_password: env_var("ORCHESTRA_TEAMS_APP_PASSWORD"),
                whatsapp_access_token: env_var("ORCHESTRA_WHATSAPP_ACCESS_TOKEN"),
                whatsapp_verify_token: env_var("ORCHESTRA_WHATSAPP_VERIFY_TOKEN"),
                whatsapp_phone_number_id: env_var("ORCHESTRA_WHATSAPP_PHONE_NUMBER_ID"),
                slack_bot_token: env_var("ORCHESTRA_SLACK_BOT_TOKEN"),
                slack_signing_secret: env_var("ORCHESTRA_SLACK_SIGNING_SECRET"),
                signal_cli_url: env_var("ORCHESTRA_SIGNAL_CLI_URL"),
            },
            webhook_rate_limit_calls: env_u64("ORCHESTRA_WEBHOOK_RATE_LIMIT_CALLS", 20)? as usize,
            webhook_rate_limit_window: Duration::from_secs(env_u64(
                "ORCHESTRA_WEBHOOK_RATE_LIMIT_WINDOW_SECS",
                60,
            )?),
            pairing_mode,
            watchdog,
            policy,
            backup_max_snapshots: env_u64("ORCHESTRA_BACKUP_MAX_SNAPSHOTS", 5)? as usize,
            owner_sender_id: env_var("ORCHESTRA_OWNER_SENDER_ID"),
            otlp_endpoint: env_var("ORCHESTRA_OTLP_ENDPOINT"),
            clear_volatile_state: env_bool("ORCHESTRA_CLEAR_VOLATILE_STATE", false),
            telemetry: TelemetryConfig {
                otlp_endpoint: env_var("ORCHESTRA_OTLP_ENDPOINT"),
                otlp_headers: std::collections::HashMap::new(),
                service_name: "orchestra".to_string(),
                sample_rate: {
                    let raw = env_var("ORCHESTRA_OTLP_SAMPLE_RATE").unwrap_or_else(|| "1.0".into());
                    raw.parse().unwrap_or(1.0)
                },
            },
            instance_dir: default_root.clone(),
        })
    }

    /// Default instance directory used by `DaemonPaths` when no explicit
    /// instance directory is configured yet (e.g. before `Config::load()`
    /// has run, such as the `stop`/`status` CLI paths).
    pub fn default_instance_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orchestra")
    }

    /// Load configuration from a TOML file, applying its keys as env var
    /// overrides (when not already set) before delegating to `load()`.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::Other(anyhow::Error::new(e)))?;
            let table: toml::Value = text
                .parse()
                .map_err(|e| ConfigError::Other(anyhow::anyhow!("invalid TOML: {e}")))?;
            if let toml::Value::Table(map) = table {
                for (key, value) in map {
                    let env_key = format!("ORCHESTRA_{}", key.to_uppercase());
                    if std::env::var(&env_key).is_err() {
                        if let Some(s) = value.as_str() {
                            unsafe { std::env::set_var(&env_key, s) };
                        } else {
                            unsafe { std::env::set_var(&env_key, value.to_string()) };
                        }
                    }
                }
            }
        }
        Self::load()
    }

    pub fn tasks_root(&self) -> PathBuf {
        self.data_dir.join("tasks")
    }

    pub fn tasks_json_path(&self) -> PathBuf {
        self.data_dir.join("tasks.json")
    }

    pub fn sessions_json_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    pub fn jobs_json_path(&self) -> PathBuf {
        self.data_dir.join("jobs.json")
    }

    pub fn job_runs_path(&self) -> PathBuf {
        self.data_dir.join("job-runs.jsonl")
    }

    pub fn pairing_json_path(&self) -> PathBuf {
        self.data_dir.join("pairing.json")
    }

    pub fn audit_jsonl_path(&self) -> PathBuf {
        self.data_dir.join("audit.jsonl")
    }

    /// Volatile state files cleared on boot when `clear_volatile_state` is
    /// set. `pairing.json` is deliberately excluded: it holds user identity.
    pub fn volatile_state_paths(&self) -> Vec<PathBuf> {
        vec![
            self.tasks_json_path(),
            self.sessions_json_path(),
            self.jobs_json_path(),
            self.job_runs_path(),
            self.audit_jsonl_path(),
            self.log_dir.join("orchestrator.log"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_bool_parses_common_truthy_values() {
        unsafe { std::env::set_var("ORCHESTRA_TEST_BOOL", "yes") };
        assert!(env_bool("ORCHESTRA_TEST_BOOL", false));
        unsafe { std::env::remove_var("ORCHESTRA_TEST_BOOL") };
    }

    #[test]
    fn env_list_splits_and_trims() {
        unsafe { std::env::set_var("ORCHESTRA_TEST_LIST", "git, npm ,cargo") };
        assert_eq!(
            env_list("ORCHESTRA_TEST_LIST"),
            vec!["git".to_string(), "npm".to_string(), "cargo".to_string()]
        );
        unsafe { std::env::remove_var("ORCHESTRA_TEST_LIST") };
    }

    #[test]
    fn load_fails_without_disclaimer() {
        unsafe { std::env::remove_var("ORCHESTRA_DISCLAIMER_ACCEPTED") };
        assert!(matches!(
            Config::load(),
            Err(ConfigError::DisclaimerNotAccepted)
        ));
    }
}
