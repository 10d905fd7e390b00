//! Sandboxed command execution with buffered output

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;

use crate::errors::{Result, RunnerError};
use crate::execution::command::{Invocation, SandboxRuntime};

const READ_CHUNK: usize = 8 * 1024;

/// Captured result of a command that exited with status 0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs invocations through a [`SandboxRuntime`]
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    pub(crate) runtime: Arc<dyn SandboxRuntime>,
    pub(crate) max_output_bytes: usize,
    pub(crate) kill_grace: Duration,
}

impl SandboxExecutor {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        max_output_bytes: usize,
        kill_grace: Duration,
    ) -> Self {
        Self {
            runtime,
            max_output_bytes,
            kill_grace,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.runtime
    }

    /// Run to completion and buffer both output streams.
    ///
    /// Each stream is capped at `max_output_bytes`. A process that outlives
    /// `timeout` or overflows the cap is killed before the error is returned.
    pub async fn run(&self, invocation: &Invocation, timeout: Duration) -> Result<ProcessOutput> {
        let mut child = self.spawn(invocation)?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Launch("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::Launch("stderr not captured".to_string()))?;
        let limit = self.max_output_bytes;

        let outcome = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::try_join!(
                read_capped(&mut stdout, limit),
                read_capped(&mut stderr, limit)
            )?;
            let status = child.wait().await?;
            Ok::<_, RunnerError>((out, err, status))
        })
        .await;

        let (out, err, status) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                self.force_kill(&mut child, invocation).await;
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "{} exceeded {}ms, killing",
                    invocation.name,
                    timeout.as_millis()
                );
                self.force_kill(&mut child, invocation).await;
                return Err(RunnerError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&out).into_owned();
        let stderr = String::from_utf8_lossy(&err).into_owned();
        debug!("{} finished with {}", invocation.name, status);

        match status.code() {
            Some(0) => Ok(ProcessOutput {
                stdout,
                stderr,
                exit_code: 0,
            }),
            Some(exit_code) => Err(RunnerError::Execution { exit_code, stderr }),
            None => Err(RunnerError::Signaled {
                signal: status.signal().unwrap_or_default(),
            }),
        }
    }

    pub(crate) fn spawn(&self, invocation: &Invocation) -> Result<Child> {
        let mut cmd = self.runtime.command(invocation);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "Launching {} via {} with args {:?}",
            invocation.name,
            self.runtime.name(),
            invocation.args
        );

        cmd.spawn().map_err(|e| {
            RunnerError::Launch(format!("{} failed to start: {}", self.runtime.name(), e))
        })
    }

    /// SIGTERM, then SIGKILL once `kill_grace` runs out
    pub(crate) async fn terminate(
        &self,
        child: &mut Child,
        invocation: &Invocation,
    ) -> std::io::Result<ExitStatus> {
        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!("SIGTERM to {} failed: {}", pid, e);
            }
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "{} ignored SIGTERM for {}ms, killing",
                    invocation.name,
                    self.kill_grace.as_millis()
                );
                self.force_kill(child, invocation).await;
                child.wait().await
            }
        }
    }

    /// SIGKILL, reap, then let the runtime remove leftovers
    pub(crate) async fn force_kill(&self, child: &mut Child, invocation: &Invocation) {
        if let Err(e) = child.start_kill() {
            debug!("kill of {} failed: {}", invocation.name, e);
        }
        if let Err(e) = child.wait().await {
            warn!("Failed to reap {}: {}", invocation.name, e);
        }

        if let Some(mut teardown) = self.runtime.teardown(invocation) {
            teardown
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            match teardown.status().await {
                Ok(status) if status.success() => {
                    debug!("Removed leftovers of {}", invocation.name)
                }
                Ok(status) => debug!("Teardown of {} exited with {}", invocation.name, status),
                Err(e) => warn!("Teardown of {} failed: {}", invocation.name, e),
            }
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(out);
        }
        if out.len() + n > limit {
            return Err(RunnerError::OutputLimitExceeded { limit });
        }
        out.extend_from_slice(&buf[..n]);
    }
}
