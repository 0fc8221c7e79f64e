//! Engine process executor - runs the engine binary and captures its output.
//!
//! Every driver operation is one synchronous engine invocation. The executor picks a
//! bound from the [`ExecuteTimeout`] policy, injects the credential environment and
//! classifies the outcome:
//! - exit 0: stdout is returned as text
//! - spawn failure or non-zero exit: [`EngineError::Execution`] with captured output
//! - bound exceeded: the process is terminated and [`EngineError::Timeout`] returned;
//!   partial output is discarded

#[cfg(test)]
pub(crate) mod fake;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::utils::{EngineError, Result};

/// How long one engine invocation may block its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteTimeout {
    /// The configured bound, for metadata reads and listings
    Default,
    /// A caller-supplied bound
    Explicit(Duration),
    /// No local ceiling, for create, restore and delete which only launch remote work
    Unbounded,
}

/// Runs the engine binary. Implemented by [`ProcessExecutor`] and by test doubles.
#[async_trait]
pub trait Execute: Send + Sync {
    /// `envs` are `KEY=VALUE` entries added to the inherited environment.
    async fn execute(
        &self,
        envs: &[String],
        binary: &Path,
        args: &[String],
        timeout: ExecuteTimeout,
    ) -> Result<String>;
}

/// Executor backed by real child processes.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    default_timeout: Duration,
    terminate_grace: Duration,
}

impl ProcessExecutor {
    pub fn new(default_timeout: Duration, terminate_grace: Duration) -> Self {
        Self {
            default_timeout,
            terminate_grace,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.execute_timeout(), config.terminate_grace())
    }

    fn bound(&self, timeout: ExecuteTimeout) -> Option<Duration> {
        match timeout {
            ExecuteTimeout::Default => Some(self.default_timeout),
            ExecuteTimeout::Explicit(limit) => Some(limit),
            ExecuteTimeout::Unbounded => None,
        }
    }

    /// SIGTERM, then SIGKILL once the grace period passes.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(pid, "Failed to send SIGTERM to engine process: {}", e);
            } else if tokio::time::timeout(self.terminate_grace, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            warn!(pid, "Engine process still running after SIGTERM, killing");
        }
        if let Err(e) = child.kill().await {
            warn!("Failed to kill engine process: {}", e);
        }
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

struct Captured {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

async fn collect(child: &mut Child) -> std::io::Result<Captured> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let (status, stdout, stderr) = tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr));
    Ok(Captured {
        status: status?,
        stdout: stdout?,
        stderr: stderr?,
    })
}

#[async_trait]
impl Execute for ProcessExecutor {
    async fn execute(
        &self,
        envs: &[String],
        binary: &Path,
        args: &[String],
        timeout: ExecuteTimeout,
    ) -> Result<String> {
        let mut cmd = Command::new(binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for env in envs {
            if let Some((key, value)) = env.split_once('=') {
                cmd.env(key, value);
            }
        }

        debug!(binary = %binary.display(), ?args, ?timeout, "Executing engine binary");

        let mut child = cmd.spawn().map_err(|e| EngineError::Execution {
            binary: binary.display().to_string(),
            args: args.to_vec(),
            status: format!("spawn failed: {}", e),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        let captured = match self.bound(timeout) {
            None => collect(&mut child).await?,
            Some(limit) => {
                let waited = tokio::time::timeout(limit, collect(&mut child)).await;
                match waited {
                    Ok(captured) => captured?,
                    Err(_) => {
                        self.terminate(&mut child).await;
                        return Err(EngineError::Timeout {
                            binary: binary.display().to_string(),
                            args: args.to_vec(),
                            timeout: limit,
                        });
                    }
                }
            }
        };

        let stdout = String::from_utf8_lossy(&captured.stdout).into_owned();
        if !captured.status.success() {
            return Err(EngineError::Execution {
                binary: binary.display().to_string(),
                args: args.to_vec(),
                status: captured.status.to_string(),
                stdout,
                stderr: String::from_utf8_lossy(&captured.stderr).into_owned(),
            });
        }
        Ok(stdout)
    }
}
