//! Job records and their lifecycle state machine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::storage::Workspace;

/// Requested operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Plan,
    Apply,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Plan => "plan",
            JobKind::Apply => "apply",
        }
    }

    /// Arguments of the streamed step for this operation
    pub fn command(&self) -> Vec<String> {
        let args: &[&str] = match self {
            JobKind::Plan => &["plan", "-no-color", "-input=false"],
            JobKind::Apply => &["apply", "-auto-approve", "-no-color", "-input=false"],
        };
        args.iter().map(|s| s.to_string()).collect()
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state.
///
/// `Initializing -> Running -> {Completed | Failed | Error}`; `Error` is also
/// reachable straight from `Initializing`. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Initializing,
    Running,
    Completed,
    Failed,
    Error,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Error
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Initializing, Running)
                | (Initializing, Error)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Error)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Initializing => "initializing",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// A state change applied through the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobUpdate {
    /// The streamed command started
    Running,
    /// The streamed command exited normally
    Exited { exit_code: i32 },
    /// Infrastructure failure, or the command ended without an exit code
    Errored { message: String },
}

impl JobUpdate {
    pub fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Running => JobStatus::Running,
            JobUpdate::Exited { exit_code: 0 } => JobStatus::Completed,
            JobUpdate::Exited { .. } => JobStatus::Failed,
            JobUpdate::Errored { .. } => JobStatus::Error,
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    pub role: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
        }
    }

    pub fn user(name: impl Into<String>) -> Self {
        Self::new(name, "user")
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(name, "admin")
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }

    /// Owners see their own jobs, admins see every job
    pub fn can_view(&self, job: &Job) -> bool {
        self.is_admin() || job.owner == self.name
    }
}

/// A tracked plan/apply request
#[derive(Debug)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub status: JobStatus,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub security_warnings: Vec<String>,
    /// Materialized directory; taken exactly once by whoever cleans it up
    pub workspace: Option<Workspace>,
    /// Dropped together with the record
    pub(crate) eviction: Option<oneshot::Sender<()>>,
}

impl Job {
    pub fn new(id: impl Into<String>, kind: JobKind, owner: impl Into<String>) -> Self {
        Self::new_at(id, kind, owner, Utc::now())
    }

    pub fn new_at(
        id: impl Into<String>,
        kind: JobKind,
        owner: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            status: JobStatus::Initializing,
            owner: owner.into(),
            created_at,
            started_at: None,
            completed_at: None,
            exit_code: None,
            error: None,
            security_warnings: Vec::new(),
            workspace: None,
            eviction: None,
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.security_warnings = warnings;
        self
    }

    /// Receiver that resolves once this record leaves the registry, so a
    /// still-running pipeline can stop its sandbox.
    pub fn eviction_signal(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.eviction = Some(tx);
        rx
    }

    /// Milliseconds from creation to completion, once complete
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_milliseconds())
    }

    pub fn view(&self) -> JobView {
        JobView {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            user: self.owner.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms(),
            exit_code: self.exit_code,
            error: self.error.clone(),
            security_warnings: self.security_warnings.clone(),
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            user: self.owner.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms(),
        }
    }
}

/// Status representation returned on query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "duration_ms")]
    pub duration_ms: Option<i64>,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub security_warnings: Vec<String>,
}

/// Entry in a job listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub user: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "duration_ms")]
    pub duration_ms: Option<i64>,
}
