//! Job events and their server-sent-event encoding
//!
//! Per job the emitted sequence is: at most one `start`, any number of
//! `output`, then exactly one `complete` or `error`, after which the stream
//! ends.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::errors::{Result, RunnerError};

pub const START_MESSAGE: &str = "Starting Terraform operation...";
pub const SUCCESS_MESSAGE: &str = "Operation completed successfully";
pub const FAILURE_MESSAGE: &str = "Operation failed";

/// Which output stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Stdout,
    Stderr,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Stdout => f.write_str("stdout"),
            OutputKind::Stderr => f.write_str("stderr"),
        }
    }
}

/// One unit of the streaming protocol
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Start {
        message: String,
        timestamp: DateTime<Utc>,
    },
    Output {
        message: String,
        kind: OutputKind,
    },
    Complete {
        exit_code: i32,
        message: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl JobEvent {
    pub fn start() -> Self {
        JobEvent::Start {
            message: START_MESSAGE.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn output(kind: OutputKind, message: impl Into<String>) -> Self {
        JobEvent::Output {
            message: message.into(),
            kind,
        }
    }

    pub fn complete(exit_code: i32) -> Self {
        let message = if exit_code == 0 {
            SUCCESS_MESSAGE
        } else {
            FAILURE_MESSAGE
        };
        JobEvent::Complete {
            exit_code,
            message: message.to_string(),
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        JobEvent::Error {
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Start { .. } => "start",
            JobEvent::Output { .. } => "output",
            JobEvent::Complete { .. } => "complete",
            JobEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Complete { .. } | JobEvent::Error { .. })
    }

    /// JSON payload carried on the `data:` line
    pub fn data(&self) -> Value {
        match self {
            JobEvent::Start { message, timestamp } => json!({
                "message": message,
                "timestamp": iso8601(timestamp),
            }),
            JobEvent::Output { message, kind } => json!({
                "message": message,
                "type": kind,
            }),
            JobEvent::Complete {
                exit_code,
                message,
                timestamp,
            } => json!({
                "exitCode": exit_code,
                "success": *exit_code == 0,
                "message": message,
                "timestamp": iso8601(timestamp),
            }),
            JobEvent::Error { message, timestamp } => json!({
                "message": message,
                "timestamp": iso8601(timestamp),
            }),
        }
    }

    /// Encode as one SSE frame: `event: <name>\ndata: <json>\n\n`
    pub fn to_sse(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.name(), self.data())
    }
}

fn iso8601(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Sending half of a job's event stream
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<JobEvent>,
}

impl EventEmitter {
    /// Emitter plus the receiver the transport drains
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue an event, waiting for room. Fails once the receiver is gone.
    pub async fn emit(&self, event: JobEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| RunnerError::StreamClosed)
    }

    /// Resolves when the receiving side has been dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
