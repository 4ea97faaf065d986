//! Shell execution policy: allow/deny by base command, plus a hard denylist.

use std::collections::BTreeSet;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

const DENIED_SUBSTRINGS: &[&str] = &["rm -rf /", ":(){:|:&};:"];
const DENIED_BASE_COMMANDS: &[&str] = &[
    "format", "dd", "timeout", "sleep", "pause", "choice", "read",
];
const DENIED_BASE_PREFIXES: &[&str] = &["mkfs"];

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("command denied: {0}")]
    Denied(String),

    #[error("command killed after {0}s")]
    TimedOut(u64),

    #[error("command exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Allow/deny decision for shell commands executed on behalf of an agent.
#[derive(Debug, Clone)]
pub struct ExecutionPolicy {
    pub allowed_commands: BTreeSet<String>,
    pub denied_commands: BTreeSet<String>,
    pub allow_all: bool,
}

impl ExecutionPolicy {
    pub fn new(allow_all: bool) -> Self {
        Self {
            allowed_commands: BTreeSet::new(),
            denied_commands: BTreeSet::new(),
            allow_all,
        }
    }

    pub fn from_config(cfg: &crate::config::PolicyConfig) -> Self {
        let mut policy = Self::new(cfg.allow_all);
        for cmd in &cfg.allowed_commands {
            policy.add_allowed(cmd);
        }
        for cmd in &cfg.denied_commands {
            policy.add_denied(cmd);
        }
        policy
    }

    pub fn add_allowed(&mut self, base_command: &str) {
        self.allowed_commands
            .insert(base_command.to_ascii_lowercase());
    }

    pub fn add_denied(&mut self, base_command: &str) {
        self.denied_commands
            .insert(base_command.to_ascii_lowercase());
    }

    /// Extract the first whitespace-delimited token after stripping leading
    /// `VAR=value` assignments.
    pub fn extract_base_command(cmd: &str) -> Option<String> {
        let mut tokens = cmd.split_whitespace();
        for token in &mut tokens {
            if token.contains('=') && !token.starts_with('=') {
                let (maybe_var, _) = token.split_once('=').unwrap();
                if maybe_var
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_')
                    && !maybe_var.is_empty()
                {
                    continue;
                }
            }
            return Some(token.to_ascii_lowercase());
        }
        None
    }

    pub fn is_allowed(&self, cmd: &str) -> Result<(), PolicyError> {
        for pattern in DENIED_SUBSTRINGS {
            if cmd.contains(pattern) {
                return Err(PolicyError::Denied(format!(
                    "command matches denied pattern: {pattern}"
                )));
            }
        }

        let base = Self::extract_base_command(cmd)
            .ok_or_else(|| PolicyError::Denied("empty command".into()))?;
        let base_name = base
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(base.as_str())
            .to_string();

        if DENIED_BASE_COMMANDS.contains(&base_name.as_str()) {
            return Err(PolicyError::Denied(format!(
                "base command '{base_name}' is denied"
            )));
        }
        if DENIED_BASE_PREFIXES
            .iter()
            .any(|prefix| base_name.starts_with(prefix))
        {
            return Err(PolicyError::Denied(format!(
                "base command '{base_name}' matches a denied prefix"
            )));
        }
        if self.denied_commands.contains(&base_name) {
            return Err(PolicyError::Denied(format!(
                "base command '{base_name}' is explicitly denied"
            )));
        }

        if self.allow_all {
            return Ok(());
        }
        if self.allowed_commands.contains(&base_name) {
            return Ok(());
        }
        Err(PolicyError::Denied(format!(
            "base command '{base_name}' is not in the allowlist"
        )))
    }
}

/// Run `cmd` through the OS shell, enforcing `policy` and `timeout`.
pub async fn run_command(
    cmd: &str,
    policy: &ExecutionPolicy,
    timeout: Duration,
    cwd: Option<&std::path::Path>,
) -> Result<String, PolicyError> {
    policy.is_allowed(cmd)?;

    let mut command = if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd.exe");
        c.arg("/C").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    command.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = command.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(PolicyError::TimedOut(timeout.as_secs())),
    };

    if !output.status.success() {
        return Err(PolicyError::NonZeroExit {
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_command_skips_env_assignments() {
        assert_eq!(
            ExecutionPolicy::extract_base_command("FOO=bar BAZ=1 git status"),
            Some("git".to_string())
        );
    }

    #[test]
    fn allow_all_permits_anything_not_denylisted() {
        let policy = ExecutionPolicy::new(true);
        assert!(policy.is_allowed("echo hi").is_ok());
    }

    #[test]
    fn allowlist_permits_only_named_commands() {
        let mut policy = ExecutionPolicy::new(false);
        policy.add_allowed("git");
        assert!(policy.is_allowed("git status").is_ok());
        assert!(policy.is_allowed("pip install foo").is_err());
    }

    #[test]
    fn mkfs_denied_in_all_modes() {
        let policy = ExecutionPolicy::new(true);
        assert!(policy.is_allowed("mkfs.ext4 /dev/sda").is_err());
    }

    #[test]
    fn dd_substring_in_path_is_not_denied() {
        let policy = ExecutionPolicy::new(true);
        assert!(policy.is_allowed("mkdir /tmp/add-stuff").is_ok());
    }

    #[test]
    fn rm_rf_root_denied() {
        let policy = ExecutionPolicy::new(true);
        assert!(policy.is_allowed("rm -rf /").is_err());
    }
}
