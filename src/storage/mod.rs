//! Storage layer: per-job workspace directories
//!
//! Each job gets exactly one directory under the workspace root, named by the
//! job id, holding:
//!
//! - **main.tf / main.tf.json**: the submitted configuration, verbatim
//! - **terraform.tfvars**: rendered variables, only when variables were supplied
//! - **providers.tf**: generated provider and backend declaration
//!
//! # Examples
//!
//! ```ignore
//! use tfbox::storage::WorkspaceBuilder;
//!
//! let builder = WorkspaceBuilder::new("/tmp/tfbox", "us-east-1");
//! let workspace = builder.build(&job_id, &request)?;
//! ```

pub mod workspace;
pub use workspace::{
    render_provider_config, render_variables, Workspace, WorkspaceBuilder, PROVIDERS_FILE,
    VARIABLES_FILE,
};
