//! Execution layer: sandboxed command runs
//!
//! Every run goes through a [`SandboxRuntime`], which turns an [`Invocation`]
//! (name, workspace, tool arguments) into a process. The production runtime
//! launches a throwaway container with no network, a memory cap and a CPU
//! quota, with only the job's workspace mounted.
//!
//! # Features
//!
//! - **Buffered runs**: [`SandboxExecutor::run`] with a hard deadline and an
//!   output cap
//! - **Streaming runs**: [`SandboxExecutor::stream`] yields output line by line
//!   and ends with a single exit chunk
//! - **Termination**: SIGTERM, then SIGKILL after a grace period, then runtime
//!   teardown of anything left behind
//!
//! # Examples
//!
//! ```ignore
//! use tfbox::execution::{DockerRuntime, Invocation, SandboxExecutor};
//!
//! let executor = SandboxExecutor::new(Arc::new(DockerRuntime::from_config(&config)), limit, grace);
//! let out = executor.run(&Invocation::new("tfbox-1-init", ws, args), timeout).await?;
//! ```

pub mod command;
pub mod process;
pub mod stream;

pub use command::{DockerRuntime, Invocation, LocalRuntime, SandboxRuntime};
pub use process::{ProcessOutput, SandboxExecutor};
pub use stream::{ProcessStream, StreamChunk};
