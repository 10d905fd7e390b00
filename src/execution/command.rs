//! Sandbox runtime invocation
//!
//! Commands are always built as discrete argument vectors. Nothing submitted
//! by a caller, no job id and no credential value is ever joined into a
//! shell-parsed string.

use std::fmt;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::config::{Credential, RunnerConfig};
use crate::utils::format_memory_size;

/// Mount point of the workspace inside the container
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Mount point of the provider plugin directory inside the container
pub const PLUGIN_MOUNT: &str = "/providers";

/// One command to run against one workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Unique name of this run, used as the container name
    pub name: String,
    /// Host directory bound into the sandbox
    pub workspace: PathBuf,
    /// Arguments handed to the tool inside the sandbox
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new(name: impl Into<String>, workspace: impl AsRef<Path>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            workspace: workspace.as_ref().to_path_buf(),
            args,
        }
    }
}

/// Turns an invocation into a process the executor can supervise
pub trait SandboxRuntime: Send + Sync + fmt::Debug {
    /// Runtime name for diagnostics
    fn name(&self) -> &str;

    /// Command that runs the invocation
    fn command(&self, invocation: &Invocation) -> Command;

    /// Command that removes whatever the invocation left behind after a
    /// forced kill, if the runtime needs one
    fn teardown(&self, _invocation: &Invocation) -> Option<Command> {
        None
    }
}

/// Container runtime driven through its CLI (`docker run ...`)
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    pub program: String,
    pub image: String,
    pub memory_limit: u64,
    pub cpus: f64,
    pub credentials: Vec<Credential>,
    pub plugin_dir: Option<PathBuf>,
}

impl DockerRuntime {
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self {
            program: config.runtime.clone(),
            image: config.image.clone(),
            memory_limit: config.memory_limit,
            cpus: config.cpus,
            credentials: config.credentials.clone(),
            plugin_dir: config.plugin_dir.clone(),
        }
    }

    /// Full argument vector passed to the runtime CLI
    pub fn args(&self, invocation: &Invocation) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            invocation.name.clone(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            format_memory_size(self.memory_limit),
            "--cpus".to_string(),
            self.cpus.to_string(),
            "--volume".to_string(),
            format!("{}:{}:rw", invocation.workspace.display(), WORKSPACE_MOUNT),
            "--workdir".to_string(),
            WORKSPACE_MOUNT.to_string(),
        ];

        if let Some(dir) = &self.plugin_dir {
            args.push("--volume".to_string());
            args.push(format!("{}:{}:ro", dir.display(), PLUGIN_MOUNT));
        }

        // `-e NAME` without a value: the runtime copies it from its own
        // environment, so values never appear on the command line.
        for credential in &self.credentials {
            args.push("--env".to_string());
            args.push(credential.name().to_string());
        }

        args.push(self.image.clone());
        args.extend(invocation.args.iter().cloned());
        args
    }
}

impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args(invocation));
        for credential in &self.credentials {
            cmd.env(credential.name(), credential.value());
        }
        cmd
    }

    fn teardown(&self, invocation: &Invocation) -> Option<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.args(["rm", "--force", invocation.name.as_str()]);
        Some(cmd)
    }
}

/// Runs the tool directly on the host inside the workspace directory.
///
/// Provides no isolation; meant for development machines and tests.
#[derive(Debug, Clone)]
pub struct LocalRuntime {
    pub program: String,
    pub prefix_args: Vec<String>,
}

impl LocalRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args: Vec::new(),
        }
    }

    /// Arguments placed before the invocation's own arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args.extend(args.into_iter().map(Into::into));
        self
    }
}

impl SandboxRuntime for LocalRuntime {
    fn name(&self) -> &str {
        &self.program
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args)
            .args(&invocation.args)
            .current_dir(&invocation.workspace);
        cmd
    }
}
