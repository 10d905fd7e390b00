//! Runner configuration
//!
//! Settings come from environment variables with fallbacks to the defaults
//! below. Credential values are captured once at load time and only ever handed
//! to the sandbox process environment.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{Result, RunnerError};
use crate::utils::{parse_memory_size, parse_millis, parse_secs};

/// Environment variables forwarded into the sandbox when set on the host.
pub const CREDENTIAL_VARS: &[&str] = &[
    "AWS_ACCESS_KEY_ID",
    "AWS_SECRET_ACCESS_KEY",
    "AWS_SESSION_TOKEN",
    "AWS_DEFAULT_REGION",
];

pub const DEFAULT_IMAGE: &str = "hashicorp/terraform:latest";
pub const DEFAULT_REGION: &str = "us-east-1";

/// A pass-through environment value.
///
/// The value is opaque to the runner: it is never inspected and `Debug`
/// prints only the name.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    name: String,
    value: String,
}

impl Credential {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Container runtime CLI (e.g. "docker", "podman")
    pub runtime: String,
    /// Image providing the infrastructure-as-code tool
    pub image: String,
    /// Directory holding one workspace per job
    pub workspace_root: PathBuf,
    /// Timeout for the buffered init step
    pub init_timeout: Duration,
    /// Timeout for the streamed plan/apply step
    pub execution_timeout: Duration,
    /// Memory cap in bytes
    pub memory_limit: u64,
    /// CPU cap in cores
    pub cpus: f64,
    /// Region written into the generated provider block
    pub default_region: String,
    /// Credentials passed through to the sandbox
    pub credentials: Vec<Credential>,
    /// How long a job record is kept after creation
    pub retention: Duration,
    /// Interval between registry sweeps
    pub sweep_interval: Duration,
    /// Buffered-mode output cap in bytes
    pub max_output_bytes: usize,
    /// Time allowed between the graceful and the forceful termination signal
    pub kill_grace: Duration,
    /// Maximum accepted configuration size in bytes
    pub max_config_bytes: usize,
    /// Host directory with pre-fetched provider plugins
    pub plugin_dir: Option<PathBuf>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: DEFAULT_IMAGE.to_string(),
            workspace_root: std::env::temp_dir().join("tfbox"),
            init_timeout: Duration::from_secs(30),
            execution_timeout: Duration::from_secs(60),
            memory_limit: 512 * 1024 * 1024,
            cpus: 1.0,
            default_region: DEFAULT_REGION.to_string(),
            credentials: Vec::new(),
            retention: Duration::from_secs(60 * 60),
            sweep_interval: Duration::from_secs(5 * 60),
            max_output_bytes: 10 * 1024 * 1024,
            kill_grace: Duration::from_secs(5),
            max_config_bytes: 50_000,
            plugin_dir: None,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(runtime) = get("TFBOX_RUNTIME") {
            config.runtime = runtime;
        }
        if let Some(image) = get("DOCKER_IMAGE") {
            config.image = image;
        }
        if let Some(root) = get("TFBOX_WORKSPACE_ROOT") {
            config.workspace_root = PathBuf::from(root);
        }
        if let Some(ms) = get("TFBOX_INIT_TIMEOUT_MS") {
            config.init_timeout = parse_millis(&ms)?;
        }
        if let Some(ms) = get("EXECUTION_TIMEOUT_MS") {
            config.execution_timeout = parse_millis(&ms)?;
        }
        if let Some(size) = get("TFBOX_MEMORY_LIMIT") {
            config.memory_limit = parse_memory_size(&size)?;
        }
        if let Some(cpus) = get("TFBOX_CPUS") {
            config.cpus = cpus
                .trim()
                .parse()
                .map_err(|_| RunnerError::InvalidConfig(format!("Invalid CPU count: {}", cpus)))?;
        }
        if let Some(region) = get("AWS_DEFAULT_REGION") {
            config.default_region = region;
        }
        if let Some(secs) = get("TFBOX_JOB_RETENTION_SECS") {
            config.retention = parse_secs(&secs)?;
        }
        if let Some(secs) = get("TFBOX_SWEEP_INTERVAL_SECS") {
            config.sweep_interval = parse_secs(&secs)?;
        }
        if let Some(size) = get("TFBOX_MAX_OUTPUT") {
            let bytes = parse_memory_size(&size)?;
            config.max_output_bytes = usize::try_from(bytes).map_err(|_| {
                RunnerError::InvalidConfig(format!("Output limit too large: {}", size))
            })?;
        }
        if let Some(ms) = get("TFBOX_KILL_GRACE_MS") {
            config.kill_grace = parse_millis(&ms)?;
        }
        if let Some(dir) = get("TFBOX_PLUGIN_DIR") {
            config.plugin_dir = Some(PathBuf::from(dir));
        }

        config.credentials = CREDENTIAL_VARS
            .iter()
            .filter_map(|name| get(name).map(|value| Credential::new(*name, value)))
            .collect();

        config.validate()?;
        Ok(config)
    }

    /// Start a builder from the defaults
    pub fn builder() -> RunnerConfigBuilder {
        RunnerConfigBuilder::default()
    }

    /// Validate configuration invariants
    pub fn validate(&self) -> Result<()> {
        if self.runtime.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "Container runtime cannot be empty".to_string(),
            ));
        }

        if self.image.trim().is_empty() {
            return Err(RunnerError::InvalidConfig(
                "Sandbox image cannot be empty".to_string(),
            ));
        }

        if self.cpus.is_nan() || self.cpus <= 0.0 {
            return Err(RunnerError::InvalidConfig(
                "CPU limit must be positive".to_string(),
            ));
        }

        if self.memory_limit == 0 {
            return Err(RunnerError::InvalidConfig(
                "Memory limit must be positive".to_string(),
            ));
        }

        if self.sweep_interval.is_zero() {
            return Err(RunnerError::InvalidConfig(
                "Sweep interval must be positive".to_string(),
            ));
        }

        if self.max_config_bytes == 0 {
            return Err(RunnerError::InvalidConfig(
                "Configuration size limit must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder pattern for runner configuration
#[derive(Debug, Default)]
pub struct RunnerConfigBuilder {
    config: RunnerConfig,
}

impl RunnerConfigBuilder {
    /// Set container runtime CLI
    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.config.runtime = runtime.into();
        self
    }

    /// Set sandbox image
    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.config.image = image.into();
        self
    }

    /// Set workspace root directory
    pub fn workspace_root(mut self, path: impl AsRef<Path>) -> Self {
        self.config.workspace_root = path.as_ref().to_path_buf();
        self
    }

    /// Set init step timeout
    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Set plan/apply step timeout
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.config.execution_timeout = timeout;
        self
    }

    /// Set memory limit
    pub fn memory_limit(mut self, bytes: u64) -> Self {
        self.config.memory_limit = bytes;
        self
    }

    /// Set memory limit from string (e.g., "512M")
    pub fn memory_limit_str(self, s: &str) -> Result<Self> {
        let bytes = parse_memory_size(s)?;
        Ok(self.memory_limit(bytes))
    }

    /// Set CPU limit in cores
    pub fn cpus(mut self, cpus: f64) -> Self {
        self.config.cpus = cpus;
        self
    }

    /// Set default provider region
    pub fn default_region(mut self, region: impl Into<String>) -> Self {
        self.config.default_region = region.into();
        self
    }

    /// Add a pass-through credential
    pub fn credential(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.credentials.push(Credential::new(name, value));
        self
    }

    /// Set job retention window
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    /// Set sweep interval
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Set buffered output cap
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.config.max_output_bytes = bytes;
        self
    }

    /// Set grace period before forceful termination
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.config.kill_grace = grace;
        self
    }

    /// Set maximum configuration size
    pub fn max_config_bytes(mut self, bytes: usize) -> Self {
        self.config.max_config_bytes = bytes;
        self
    }

    /// Set provider plugin directory
    pub fn plugin_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.config.plugin_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Build configuration
    pub fn build(self) -> Result<RunnerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_runner_config_default() {
        let config = RunnerConfig::default();
        assert_eq!(config.image, DEFAULT_IMAGE);
        assert_eq!(config.memory_limit, 512 * 1024 * 1024);
        assert_eq!(config.cpus, 1.0);
        assert_eq!(config.retention, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.max_output_bytes, 10 * 1024 * 1024);
        assert!(config.credentials.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_lookup_with_empty_environment_uses_defaults() {
        let config = RunnerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.default_region, DEFAULT_REGION);
        assert_eq!(config.execution_timeout, Duration::from_secs(60));
    }

    #[test]
    fn from_lookup_reads_overrides() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("DOCKER_IMAGE", "hashicorp/terraform:1.7"),
            ("EXECUTION_TIMEOUT_MS", "1500"),
            ("TFBOX_MEMORY_LIMIT", "1G"),
            ("TFBOX_CPUS", "2.5"),
            ("AWS_DEFAULT_REGION", "eu-west-1"),
            ("TFBOX_JOB_RETENTION_SECS", "120"),
            ("TFBOX_MAX_OUTPUT", "1M"),
            ("TFBOX_PLUGIN_DIR", "/opt/providers"),
        ]))
        .unwrap();

        assert_eq!(config.image, "hashicorp/terraform:1.7");
        assert_eq!(config.execution_timeout, Duration::from_millis(1500));
        assert_eq!(config.memory_limit, 1024 * 1024 * 1024);
        assert_eq!(config.cpus, 2.5);
        assert_eq!(config.default_region, "eu-west-1");
        assert_eq!(config.retention, Duration::from_secs(120));
        assert_eq!(config.max_output_bytes, 1024 * 1024);
        assert_eq!(config.plugin_dir, Some(PathBuf::from("/opt/providers")));
    }

    #[test]
    fn from_lookup_captures_only_allow_listed_credentials() {
        let config = RunnerConfig::from_lookup(lookup_from(&[
            ("AWS_ACCESS_KEY_ID", "AKIAEXAMPLEEXAMPLE00"),
            ("AWS_SECRET_ACCESS_KEY", "shh"),
            ("GITHUB_TOKEN", "ghp_not_forwarded"),
        ]))
        .unwrap();

        let names: Vec<&str> = config.credentials.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]);
    }

    #[test]
    fn from_lookup_rejects_invalid_values() {
        assert!(RunnerConfig::from_lookup(lookup_from(&[("TFBOX_CPUS", "lots")])).is_err());
        assert!(RunnerConfig::from_lookup(lookup_from(&[("TFBOX_CPUS", "0")])).is_err());
        assert!(
            RunnerConfig::from_lookup(lookup_from(&[("EXECUTION_TIMEOUT_MS", "1m")])).is_err()
        );
        assert!(
            RunnerConfig::from_lookup(lookup_from(&[("TFBOX_SWEEP_INTERVAL_SECS", "0")]))
                .is_err()
        );
    }

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("AWS_SECRET_ACCESS_KEY", "super-secret-value");
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!rendered.contains("super-secret-value"));

        let config = RunnerConfig::builder()
            .credential("AWS_SECRET_ACCESS_KEY", "super-secret-value")
            .build()
            .unwrap();
        assert!(!format!("{:?}", config).contains("super-secret-value"));
    }

    #[test]
    fn test_builder_sets_fields() -> Result<()> {
        let config = RunnerConfig::builder()
            .image("custom/terraform:1.8")
            .memory_limit_str("256M")?
            .cpus(0.5)
            .kill_grace(Duration::from_millis(200))
            .build()?;
        assert_eq!(config.image, "custom/terraform:1.8");
        assert_eq!(config.memory_limit, 256 * 1024 * 1024);
        assert_eq!(config.cpus, 0.5);
        assert_eq!(config.kill_grace, Duration::from_millis(200));
        Ok(())
    }

    #[test]
    fn test_builder_validates() {
        assert!(RunnerConfig::builder().image("").build().is_err());
        assert!(RunnerConfig::builder().cpus(f64::NAN).build().is_err());
        assert!(RunnerConfig::builder().memory_limit(0).build().is_err());
    }
}
