//! Scoped invocation of external tools.
//!
//! [`ExecutableRunner`] is the seam detectors use to shell out. The production
//! implementation, [`ProcessRunner`], spawns through `tokio::process`, captures
//! the full stdout/stderr, enforces a timeout and observes the scan-wide
//! cancellation token. The child is created with `kill_on_drop`, so every
//! early exit (timeout, cancellation, a dropped future) terminates it.

pub mod resolver;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

pub use resolver::ExecutableResolver;

/// Default time a single tool invocation may run.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Error)]
pub enum ExecutableRunnerError {
    #[error("executable not found: {command}")]
    NotFound { command: String },

    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' timed out after {} seconds", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("'{command}' was cancelled")]
    Cancelled { command: String },

    #[error("failed waiting on '{command}': {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },
}

/// A fully described tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub working_directory: PathBuf,
    pub command: PathBuf,
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Overrides the runner's default timeout.
    pub timeout: Option<Duration>,
}

impl Executable {
    pub fn new<I, S>(working_directory: &Path, command: impl Into<PathBuf>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            working_directory: working_directory.to_path_buf(),
            command: command.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
            environment: BTreeMap::new(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Human readable command line, used in logs and error messages.
    pub fn description(&self) -> String {
        let mut parts = vec![self.command.display().to_string()];
        parts.extend(self.arguments.iter().cloned());
        parts.join(" ")
    }
}

/// Captured result of a finished process. A non-zero exit code is not an
/// error at this level; each detector interprets its own tool's codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutableOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutableOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait ExecutableRunner: Send + Sync {
    async fn execute(&self, executable: &Executable)
        -> Result<ExecutableOutput, ExecutableRunnerError>;
}

pub struct ProcessRunner {
    default_timeout: Duration,
    cancel: CancellationToken,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration, cancel: CancellationToken) -> Self {
        Self {
            default_timeout,
            cancel,
        }
    }
}

#[async_trait]
impl ExecutableRunner for ProcessRunner {
    async fn execute(
        &self,
        executable: &Executable,
    ) -> Result<ExecutableOutput, ExecutableRunnerError> {
        let description = executable.description();
        if self.cancel.is_cancelled() {
            return Err(ExecutableRunnerError::Cancelled {
                command: description,
            });
        }

        let mut cmd = Command::new(&executable.command);
        cmd.args(&executable.arguments)
            .current_dir(&executable.working_directory)
            .envs(&executable.environment)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(command = %description, dir = %executable.working_directory.display(), "Running executable");

        let child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ExecutableRunnerError::NotFound {
                    command: executable.command.display().to_string(),
                }
            } else {
                ExecutableRunnerError::Spawn {
                    command: description.clone(),
                    source,
                }
            }
        })?;

        let timeout = executable.timeout.unwrap_or(self.default_timeout);

        // Dropping `child` on the timeout and cancel branches kills it.
        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(output) => output.map_err(|source| ExecutableRunnerError::Io {
                    command: description.clone(),
                    source,
                })?,
                Err(_) => {
                    return Err(ExecutableRunnerError::Timeout {
                        command: description,
                        timeout,
                    })
                }
            },
            _ = self.cancel.cancelled() => {
                return Err(ExecutableRunnerError::Cancelled { command: description });
            }
        };

        let result = ExecutableOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        trace!(command = %description, exit_code = ?result.exit_code, "Executable finished");
        Ok(result)
    }
}

/// Scripted runner for tests: responses are keyed by the joined argument list.
#[cfg(test)]
pub mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct ScriptedRunner {
        responses: HashMap<String, ExecutableOutput>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn respond(mut self, arguments: &str, stdout: &str) -> Self {
            self.responses.insert(
                arguments.to_string(),
                ExecutableOutput {
                    exit_code: Some(0),
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                },
            );
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecutableRunner for ScriptedRunner {
        async fn execute(
            &self,
            executable: &Executable,
        ) -> Result<ExecutableOutput, ExecutableRunnerError> {
            let key = executable.arguments.join(" ");
            self.calls.lock().unwrap().push(key.clone());
            Ok(self.responses.get(&key).cloned().unwrap_or(ExecutableOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: format!("no scripted response for '{key}'"),
            }))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn runner(timeout: Duration) -> (ProcessRunner, CancellationToken) {
        let token = CancellationToken::new();
        (ProcessRunner::new(timeout, token.clone()), token)
    }

    #[tokio::test]
    async fn test_captures_output_and_exit_code() {
        let (runner, _) = runner(DEFAULT_TIMEOUT);
        let dir = tempfile::tempdir().unwrap();
        let exe = Executable::new(dir.path(), "sh", ["-c", "echo out; echo err >&2; exit 3"]);

        let output = runner.execute(&exe).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_runs_in_working_directory_with_env() {
        let (runner, _) = runner(DEFAULT_TIMEOUT);
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let exe = Executable::new(dir.path(), "sh", ["-c", "ls; echo $DETECTR_TEST"])
            .with_env("DETECTR_TEST", "hello");

        let output = runner.execute(&exe).await.unwrap();
        let lines: Vec<&str> = output.stdout.lines().collect();
        assert!(lines.contains(&"marker.txt"));
        assert!(lines.contains(&"hello"));
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let (runner, _) = runner(DEFAULT_TIMEOUT);
        let dir = tempfile::tempdir().unwrap();
        let exe = Executable::new(dir.path(), "definitely-not-a-real-tool-xyz", Vec::<String>::new());

        let err = runner.execute(&exe).await.unwrap_err();
        assert!(matches!(err, ExecutableRunnerError::NotFound { .. }));
    }

    /// Starts a shell that records its pid and then becomes a long sleep.
    fn sleeper(dir: &Path) -> Executable {
        Executable::new(dir, "sh", ["-c", "echo $$ > child.pid; exec sleep 30"])
    }

    async fn child_pid(dir: &Path) -> u32 {
        for _ in 0..100 {
            if let Ok(pid) = std::fs::read_to_string(dir.join("child.pid")) {
                if let Ok(pid) = pid.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("child never wrote its pid");
    }

    /// Gone, or a zombie waiting to be reaped. Reads procfs.
    async fn assert_killed(pid: u32) {
        for _ in 0..100 {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => return,
                Ok(stat) if stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')) => {
                    return
                }
                Ok(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        panic!("process {pid} is still running");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let (runner, _) = runner(DEFAULT_TIMEOUT);
        let dir = tempfile::tempdir().unwrap();
        let mut exe = sleeper(dir.path());
        exe.timeout = Some(Duration::from_millis(500));

        let err = runner.execute(&exe).await.unwrap_err();
        assert!(matches!(err, ExecutableRunnerError::Timeout { .. }));

        assert_killed(child_pid(dir.path()).await).await;
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let (runner, token) = runner(DEFAULT_TIMEOUT);
        let dir = tempfile::tempdir().unwrap();
        let exe = sleeper(dir.path());

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let err = runner.execute(&exe).await.unwrap_err();
        assert!(matches!(err, ExecutableRunnerError::Cancelled { .. }));

        assert_killed(child_pid(dir.path()).await).await;
    }
}
