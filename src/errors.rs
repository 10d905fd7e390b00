//! Error types for job orchestration

use std::io;
use thiserror::Error;

use crate::job::JobStatus;

/// Result type for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Generic message shown to callers for infrastructure failures.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error while running job";

/// Errors that can occur while accepting, preparing, or running a job
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to create workspace for job {job_id}: {source}")]
    WorkspaceCreation {
        job_id: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch sandbox: {0}")]
    Launch(String),

    #[error("Command failed with exit code {exit_code}: {stderr}")]
    Execution { exit_code: i32, stderr: String },

    #[error("Command killed by signal {signal}")]
    Signaled { signal: i32 },

    #[error("Command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Command output exceeded {limit} bytes")]
    OutputLimitExceeded { limit: usize },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Event stream closed")]
    StreamClosed,
}

impl RunnerError {
    /// Message safe to hand back to the caller.
    ///
    /// Infrastructure failures collapse to [`INTERNAL_ERROR_MESSAGE`]; their
    /// detail belongs in the logs only.
    pub fn public_message(&self) -> String {
        match self {
            RunnerError::Validation(_)
            | RunnerError::Execution { .. }
            | RunnerError::Signaled { .. }
            | RunnerError::Timeout { .. }
            | RunnerError::OutputLimitExceeded { .. }
            | RunnerError::JobNotFound(_)
            | RunnerError::AccessDenied => self.to_string(),
            RunnerError::Io(_)
            | RunnerError::InvalidConfig(_)
            | RunnerError::WorkspaceCreation { .. }
            | RunnerError::Launch(_)
            | RunnerError::InvalidTransition { .. }
            | RunnerError::StreamClosed => INTERNAL_ERROR_MESSAGE.to_string(),
        }
    }

    /// Whether this error is an infrastructure fault rather than a result of the
    /// submitted configuration.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            RunnerError::Io(_)
                | RunnerError::InvalidConfig(_)
                | RunnerError::WorkspaceCreation { .. }
                | RunnerError::Launch(_)
                | RunnerError::InvalidTransition { .. }
                | RunnerError::StreamClosed
        )
    }
}
