//! Workspace materialization and removal

use log::{debug, warn};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::{Result, RunnerError};
use crate::request::{JobRequest, VarValue, Variables};

pub const VARIABLES_FILE: &str = "terraform.tfvars";
pub const PROVIDERS_FILE: &str = "providers.tf";

/// Ownership handle for one job's directory.
///
/// Not `Clone`: removal consumes the handle, so a workspace is destroyed at
/// most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the directory. A directory that is already gone counts as removed.
    pub fn remove(self) -> io::Result<()> {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                debug!("Removed workspace {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Materializes job workspaces under a root directory
#[derive(Debug, Clone)]
pub struct WorkspaceBuilder {
    root: PathBuf,
    region: String,
}

impl WorkspaceBuilder {
    pub fn new(root: impl AsRef<Path>, region: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            region: region.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a fresh directory for `job_id` and write the job's files into it.
    ///
    /// Fails if the directory already exists. A partially written directory is
    /// removed before the error is returned.
    pub fn build(&self, job_id: &str, request: &JobRequest) -> Result<Workspace> {
        let creation_error = |source: io::Error| RunnerError::WorkspaceCreation {
            job_id: job_id.to_string(),
            source,
        };

        if !is_safe_dir_name(job_id) {
            return Err(creation_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "job id is not a valid directory name",
            )));
        }

        fs::create_dir_all(&self.root).map_err(creation_error)?;

        let path = self.root.join(job_id);
        fs::create_dir(&path).map_err(creation_error)?;
        let workspace = Workspace { path };

        if let Err(e) = self.write_files(workspace.path(), request) {
            if let Err(cleanup) = fs::remove_dir_all(workspace.path()) {
                warn!(
                    "Failed to remove partial workspace {}: {}",
                    workspace.path().display(),
                    cleanup
                );
            }
            return Err(creation_error(e));
        }

        debug!(
            "Created workspace {} ({} variables)",
            workspace.path().display(),
            request.variables.len()
        );
        Ok(workspace)
    }

    fn write_files(&self, dir: &Path, request: &JobRequest) -> io::Result<()> {
        fs::write(dir.join(request.format.main_file()), &request.config)?;

        if !request.variables.is_empty() {
            fs::write(
                dir.join(VARIABLES_FILE),
                render_variables(&request.variables),
            )?;
        }

        fs::write(
            dir.join(PROVIDERS_FILE),
            render_provider_config(&self.region),
        )?;
        Ok(())
    }
}

fn is_safe_dir_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Render variables as `key = <literal>` lines
pub fn render_variables(variables: &Variables) -> String {
    let mut out = String::new();
    for (key, value) in variables {
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(&render_literal(value));
        out.push('\n');
    }
    out
}

fn render_literal(value: &VarValue) -> String {
    match value {
        VarValue::String(s) => quote(s),
        VarValue::Number(n) => n.to_string(),
        VarValue::Bool(b) => b.to_string(),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                out.push(c);
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Generated provider and backend declaration
pub fn render_provider_config(region: &str) -> String {
    format!(
        r#"terraform {{
  backend "local" {{}}

  required_providers {{
    aws = {{
      source  = "hashicorp/aws"
      version = "~> 5.0"
    }}
  }}
}}

provider "aws" {{
  region = {}
}}
"#,
        quote(region)
    )
}
