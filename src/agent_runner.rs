//! Wraps a single command-line agent executable and manages one
//! prompt-at-a-time interaction with it. The agent is treated as an opaque
//! external collaborator: we only observe its stdout lines, its
//! session-state directory, and its exit status.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum AgentRunnerError {
    #[error("agent executable not found: {0}")]
    NotFound(String),

    #[error("agent timed out after {0:?}")]
    TimedOut(Duration),

    #[error("agent repeated an unknown-option error {0} times, aborting")]
    RepeatedUnknownOption(u32),

    #[error("agent reported a stale resume id")]
    StaleResume,

    #[error("agent exited with code {0}")]
    NonZeroExit(i32),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Orchestrator,
    Worker,
    Supervisor,
}

#[derive(Debug, Clone)]
pub struct AgentTurn {
    pub output: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    pub program: PathBuf,
    pub tool_server_url: String,
    pub extra_dirs: Vec<PathBuf>,
    pub timeout: Duration,
    /// Directory the agent writes its own session-state files into; used
    /// for mtime-based session-id discovery after a turn.
    pub session_state_dir: PathBuf,
}

const UNKNOWN_OPTION_REPEAT_LIMIT: u32 = 3;

/// Runs prompts through a single external agent executable. Holds no shared
/// mutable state besides the last-resumed session id; each invocation owns
/// its own subprocess, so multiple callers may invoke the same runner
/// concurrently.
pub struct AgentRunner {
    config: AgentRunnerConfig,
    resume_session_id: Mutex<Option<String>>,
}

impl AgentRunner {
    pub fn new(config: AgentRunnerConfig) -> Self {
        Self {
            config,
            resume_session_id: Mutex::new(None),
        }
    }

    pub fn resume_session_id(&self) -> Option<String> {
        self.resume_session_id.lock().unwrap().clone()
    }

    fn build_command(&self, resume_id: Option<&str>) -> Command {
        let mut cmd = Command::new(&self.config.program);
        if let Some(id) = resume_id {
            cmd.arg("--resume").arg(id);
        }
        cmd.arg("--mcp-url").arg(&self.config.tool_server_url);
        for dir in &self.config.extra_dirs {
            cmd.arg("--add-dir").arg(dir);
        }
        cmd.arg("--non-interactive");
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            unsafe {
                cmd.pre_exec(|| {
                    libc::setpgid(0, 0);
                    Ok(())
                });
            }
        }
        cmd
    }

    /// Run one prompt, invoking `on_line` for every streamed stdout line.
    pub async fn run_prompt(
        &self,
        prompt: &str,
        resume_id: Option<String>,
        mut on_line: impl FnMut(&str) + Send,
    ) -> Result<AgentTurn, AgentRunnerError> {
        let mut cmd = self.build_command(resume_id.as_deref());
        cmd.arg("--prompt").arg(prompt);

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AgentRunnerError::NotFound(self.config.program.display().to_string())
            } else {
                AgentRunnerError::Io(e)
            }
        })?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut output = String::new();
        let mut repeated_unknown_option = 0u32;
        let mut last_unknown_option_line: Option<String> = None;

        let stream_fut = async {
            loop {
                tokio::select! {
                    line = stdout_lines.next_line() => {
                        match line {
                            Ok(Some(l)) => {
                                on_line(&l);
                                if is_unknown_option_line(&l) {
                                    if last_unknown_option_line.as_deref() == Some(l.as_str()) {
                                        repeated_unknown_option += 1;
                                    } else {
                                        repeated_unknown_option = 1;
                                        last_unknown_option_line = Some(l.clone());
                                    }
                                    if repeated_unknown_option >= UNKNOWN_OPTION_REPEAT_LIMIT {
                                        return Err(AgentRunnerError::RepeatedUnknownOption(repeated_unknown_option));
                                    }
                                }
                                output.push_str(&l);
                                output.push('\n');
                            }
                            Ok(None) => break,
                            Err(e) => return Err(AgentRunnerError::Io(e)),
                        }
                    }
                    line = stderr_lines.next_line() => {
                        if let Ok(Some(l)) = line {
                            on_line(&l);
                            output.push_str(&l);
                            output.push('\n');
                        }
                    }
                }
            }
            Ok(())
        };

        let timed = tokio::time::timeout(self.config.timeout, stream_fut).await;
        match timed {
            Err(_) => {
                kill_tree(&mut child).await;
                return Err(AgentRunnerError::TimedOut(self.config.timeout));
            }
            Ok(Err(e)) => {
                kill_tree(&mut child).await;
                return Err(e);
            }
            Ok(Ok(())) => {}
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(AgentRunnerError::NonZeroExit(status.code().unwrap_or(-1)));
        }

        if contains_stale_resume_error(&output) {
            return Err(AgentRunnerError::StaleResume);
        }

        let session_id = discover_latest_session_id(&self.config.session_state_dir);
        if let Some(id) = &session_id {
            *self.resume_session_id.lock().unwrap() = Some(id.clone());
        }
        Ok(AgentTurn { output, session_id })
    }
}

fn is_unknown_option_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("unknown option") || lower.contains("unrecognized option")
}

fn contains_stale_resume_error(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("stale session") || lower.contains("session not found") || lower.contains("invalid resume id")
}

/// Scan a session-state directory and return the entry with the highest
/// mtime. This mirrors how the external agent persists its own sessions;
/// no assumption is made about the file format beyond its existence.
fn discover_latest_session_id(dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut best: Option<(std::time::SystemTime, String)> = None;
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let name = entry
            .path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())?;
        match &best {
            Some((best_time, _)) if *best_time >= modified => {}
            _ => best = Some((modified, name)),
        }
    }
    best.map(|(_, name)| name)
}

async fn kill_tree(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::killpg(pid as i32, libc::SIGTERM);
            }
            tokio::time::sleep(Duration::from_secs(10)).await;
            unsafe {
                libc::killpg(pid as i32, libc::SIGKILL);
            }
        }
    }
    #[cfg(windows)]
    {
        if let Some(pid) = child.id() {
            let _ = Command::new("taskkill")
                .args(["/F", "/T", "/PID", &pid.to_string()])
                .output()
                .await;
        }
    }
    let _ = child.kill().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_unknown_option_lines_case_insensitively() {
        assert!(is_unknown_option_line("Error: Unknown option --frobnicate"));
        assert!(!is_unknown_option_line("ok"));
    }

    #[test]
    fn detects_stale_resume_errors() {
        assert!(contains_stale_resume_error("Error: Session not found for id abc"));
    }

    #[test]
    fn discover_latest_session_id_picks_newest_mtime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("older.json"), "{}").unwrap();
        std::thread::sleep(Duration::from_millis(10));
        std::fs::write(dir.path().join("newer.json"), "{}").unwrap();
        assert_eq!(
            discover_latest_session_id(dir.path()),
            Some("newer".to_string())
        );
    }
}
