//! tfbox: sandboxed Terraform job runner
//!
//! Accepts plan/apply submissions, runs them in a throwaway container with
//! no network and capped memory and CPU, streams the output back as events,
//! and keeps a short-lived record of every job for status queries.
//!
//! # Modules
//!
//! - **security**: Advisory credential scan of submitted configuration
//! - **storage**: Per-job workspace directories
//! - **execution**: Sandbox runtimes, buffered and streaming runs
//! - **events**: Job event protocol and its SSE encoding
//! - **registry**: In-memory job table and retention sweep
//! - **controller**: Job orchestration
//!
//! # Example
//!
//! ```ignore
//! use tfbox::{JobController, JobKind, JobRequest, Principal, RunnerConfig};
//!
//! let controller = JobController::new(RunnerConfig::from_env()?)?;
//! let mut job = controller.submit(
//!     JobKind::Plan,
//!     JobRequest::new(r#"resource "null_resource" "x" {}"#),
//!     &Principal::user("alice"),
//! )?;
//! while let Some(event) = job.next_event().await {
//!     print!("{}", event.to_sse());
//! }
//! ```

// Core modules
pub mod config;
pub mod errors;
pub mod utils;

// Layered modules
pub mod events;
pub mod execution;
pub mod job;
pub mod registry;
pub mod request;
pub mod security;
pub mod storage;

// Main controller
pub mod controller;

// Public API
pub use config::{Credential, RunnerConfig, RunnerConfigBuilder};
pub use controller::{JobController, JobHandle};
pub use errors::{Result, RunnerError};
pub use events::{EventEmitter, JobEvent, OutputKind};
pub use execution::{
    DockerRuntime, Invocation, LocalRuntime, ProcessOutput, ProcessStream, SandboxExecutor,
    SandboxRuntime, StreamChunk,
};
pub use job::{Job, JobKind, JobStatus, JobSummary, JobView, Principal};
pub use registry::{JobRegistry, Sweeper};
pub use request::{ConfigFormat, JobRequest, VarValue, Variables};
pub use security::SecurityScanner;
pub use storage::{Workspace, WorkspaceBuilder};
