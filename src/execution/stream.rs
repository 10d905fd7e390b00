//! Stream handling for process output

use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::errors::{Result, RunnerError};
use crate::execution::command::Invocation;
use crate::execution::process::SandboxExecutor;

/// Chunks buffered between the readers and the consumer
const STREAM_BUFFER: usize = 256;
/// Longest chunk forwarded for output that never emits a newline
const MAX_CHUNK_BYTES: usize = 64 * 1024;

/// A chunk of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Data from stdout, one line including its terminator
    Stdout(String),
    /// Data from stderr, one line including its terminator
    Stderr(String),
    /// Process has exited. Always the last chunk.
    Exit {
        exit_code: Option<i32>,
        signal: Option<i32>,
        /// Termination was requested through [`ProcessStream::cancel`] or by
        /// dropping the stream
        cancelled: bool,
    },
}

/// Handle for receiving the output of a running process.
///
/// Dropping the handle terminates the process.
#[derive(Debug)]
pub struct ProcessStream {
    receiver: mpsc::Receiver<StreamChunk>,
    cancel: Option<oneshot::Sender<()>>,
    pid: Option<u32>,
}

impl ProcessStream {
    /// Receive the next chunk; `None` once the exit chunk has been taken
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.receiver.recv().await
    }

    /// Ask the process to stop: SIGTERM, then a forced kill after the grace
    /// period. Output produced meanwhile is still delivered, followed by the
    /// exit chunk.
    pub fn cancel(&mut self) {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
    }

    /// Host pid of the launched runtime process
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl Stream for ProcessStream {
    type Item = StreamChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl SandboxExecutor {
    /// Launch the invocation and forward its output line by line as it is
    /// produced. Never buffers the whole output.
    pub fn stream(&self, invocation: &Invocation) -> Result<ProcessStream> {
        let mut child = self.spawn(invocation)?;
        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RunnerError::Launch("stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::Launch("stderr not captured".to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let readers = [
            tokio::spawn(forward_lines(stdout, tx.clone(), StreamChunk::Stdout)),
            tokio::spawn(forward_lines(stderr, tx.clone(), StreamChunk::Stderr)),
        ];

        let executor = self.clone();
        let invocation = invocation.clone();
        tokio::spawn(async move {
            // An Err from the cancel channel means the handle was dropped.
            let (status, cancelled) = tokio::select! {
                status = child.wait() => (status, false),
                _ = &mut cancel_rx => {
                    info!("Terminating {}", invocation.name);
                    (executor.terminate(&mut child, &invocation).await, true)
                }
            };

            join_readers(readers, &executor, &invocation).await;

            let exit = match status {
                Ok(status) => StreamChunk::Exit {
                    exit_code: status.code(),
                    signal: status.signal(),
                    cancelled,
                },
                Err(e) => {
                    warn!("Failed to wait for {}: {}", invocation.name, e);
                    StreamChunk::Exit {
                        exit_code: None,
                        signal: None,
                        cancelled,
                    }
                }
            };
            debug!("{} finished: {:?}", invocation.name, exit);
            let _ = tx.send(exit).await;
        });

        Ok(ProcessStream {
            receiver: rx,
            cancel: Some(cancel_tx),
            pid,
        })
    }
}

/// Wait for the readers to hit EOF so the exit chunk is the last one sent.
/// Readers still blocked after the grace period (a descendant holding the
/// pipe open) are aborted.
async fn join_readers(
    readers: [JoinHandle<()>; 2],
    executor: &SandboxExecutor,
    invocation: &Invocation,
) {
    for mut reader in readers {
        if tokio::time::timeout(executor.kill_grace, &mut reader)
            .await
            .is_err()
        {
            debug!("Output of {} still open after exit", invocation.name);
            reader.abort();
        }
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<StreamChunk>, wrap: fn(String) -> StreamChunk)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let (consumed, line_done) = {
            let available = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    debug!("Output read failed: {}", e);
                    break;
                }
            };
            if available.is_empty() {
                break;
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => {
                    pending.extend_from_slice(&available[..=i]);
                    (i + 1, true)
                }
                None => {
                    pending.extend_from_slice(available);
                    (available.len(), false)
                }
            }
        };
        reader.consume(consumed);

        if line_done || pending.len() >= MAX_CHUNK_BYTES {
            let chunk = wrap(String::from_utf8_lossy(&pending).into_owned());
            pending.clear();
            if tx.send(chunk).await.is_err() {
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = tx
            .send(wrap(String::from_utf8_lossy(&pending).into_owned()))
            .await;
    }
}
