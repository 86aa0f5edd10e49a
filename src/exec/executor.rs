use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::exec::capture;
use crate::security::{self, AllowedCommand};

/// How long reader tasks may keep draining after the process is gone
const READER_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed waiting for process: {0}")]
    Wait(#[source] io::Error),
}

/// Resource limits for one process run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub max_output_size: usize,
}

impl From<&AllowedCommand> for ExecLimits {
    fn from(command: &AllowedCommand) -> Self {
        Self {
            timeout: command.timeout(),
            max_output_size: command.max_output_size(),
        }
    }
}

/// Outcome of a bounded process run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// None when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis().min(u64::MAX as u128) as u64)
}

/// Runs commands that already passed validation
///
/// The argument type is the proof of validation: an [`AllowedCommand`] can
/// only be produced by the validator.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &AllowedCommand) -> Result<ExecutionResult, ExecError>;
}

/// Runs allowed commands through the configured shell inside the workspace
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    shell: String,
    workdir: PathBuf,
    env: Arc<Vec<(String, String)>>,
}

impl ProcessExecutor {
    /// Create an executor that forwards the allow-listed host variables
    pub fn new<P: AsRef<Path>>(shell: impl Into<String>, workdir: P) -> Self {
        Self::with_env(shell, workdir, security::sanitized_env())
    }

    pub fn with_env<P: AsRef<Path>>(
        shell: impl Into<String>,
        workdir: P,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            shell: shell.into(),
            workdir: workdir.as_ref().to_path_buf(),
            env: Arc::new(security::filter_env(env)),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }
}

#[async_trait]
impl CommandRunner for ProcessExecutor {
    async fn run(&self, command: &AllowedCommand) -> Result<ExecutionResult, ExecError> {
        let args = vec!["-c".to_string(), command.command().to_string()];
        run_bounded(&self.shell, &args, &self.workdir, &self.env, ExecLimits::from(command)).await
    }
}

/// Spawn `program` in its own process group with a cleared environment,
/// capped output capture and a hard timeout.
///
/// On timeout the whole group is killed and reaped before returning, and the
/// output gathered so far is reported with `timed_out` set. Dropping the
/// future before the process exits also kills the group.
pub async fn run_bounded(
    program: &str,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
    limits: ExecLimits,
) -> Result<ExecutionResult, ExecError> {
    let started = Instant::now();

    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(cwd)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let pid = child.id();
    let mut group = GroupGuard::new(pid);
    debug!(program = %program, pid = ?pid, "process spawned");

    let stdout_buf = capture::shared(limits.max_output_size);
    let stderr_buf = capture::shared(limits.max_output_size);
    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(tokio::spawn(capture::drain(stdout, Arc::clone(&stdout_buf))));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(tokio::spawn(capture::drain(stderr, Arc::clone(&stderr_buf))));
    }

    let (status, timed_out) = match tokio::time::timeout(limits.timeout, child.wait()).await {
        Ok(Ok(status)) => (status, false),
        Ok(Err(e)) => return Err(ExecError::Wait(e)),
        Err(_) => {
            warn!(
                program = %program,
                timeout_ms = limits.timeout.as_millis() as u64,
                "process timed out, killing process group"
            );
            kill_group(pid);
            let _ = child.start_kill();
            let status = child.wait().await.map_err(ExecError::Wait)?;
            (status, true)
        }
    };
    group.disarm();

    for reader in readers {
        let abort = reader.abort_handle();
        if tokio::time::timeout(READER_GRACE, reader).await.is_err() {
            // A descendant outside the group still holds the pipe open
            abort.abort();
        }
    }

    let (stdout, stdout_truncated) = capture::snapshot(&stdout_buf);
    let (stderr, stderr_truncated) = capture::snapshot(&stderr_buf);

    Ok(ExecutionResult {
        exit_code: status.code(),
        stdout,
        stderr,
        duration: started.elapsed(),
        timed_out,
        stdout_truncated,
        stderr_truncated,
    })
}

/// Kills the process group on drop unless the leader was reaped first
///
/// Covers early returns and callers dropping the `run_bounded` future.
struct GroupGuard {
    pid: Option<u32>,
    armed: bool,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            debug!(pid = ?self.pid, "process abandoned before exit, killing process group");
            kill_group(self.pid);
        }
    }
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else {
        return;
    };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, error = %e, "failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}
