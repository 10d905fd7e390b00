//! Submission payload and its validation

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, RunnerError};

/// A scalar variable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VarValue {
    Bool(bool),
    Number(serde_json::Number),
    String(String),
}

impl From<&str> for VarValue {
    fn from(value: &str) -> Self {
        VarValue::String(value.to_string())
    }
}

impl From<String> for VarValue {
    fn from(value: String) -> Self {
        VarValue::String(value)
    }
}

impl From<bool> for VarValue {
    fn from(value: bool) -> Self {
        VarValue::Bool(value)
    }
}

impl From<i64> for VarValue {
    fn from(value: i64) -> Self {
        VarValue::Number(value.into())
    }
}

/// Flat variable map, rendered in key order
pub type Variables = BTreeMap<String, VarValue>;

/// Syntax of the submitted configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigFormat {
    #[default]
    Hcl,
    Json,
}

impl ConfigFormat {
    /// File name the configuration is written to
    pub fn main_file(&self) -> &'static str {
        match self {
            ConfigFormat::Hcl => "main.tf",
            ConfigFormat::Json => "main.tf.json",
        }
    }
}

impl fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigFormat::Hcl => write!(f, "hcl"),
            ConfigFormat::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for ConfigFormat {
    type Err = RunnerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hcl" => Ok(ConfigFormat::Hcl),
            "json" => Ok(ConfigFormat::Json),
            other => Err(RunnerError::Validation(format!(
                "unknown config format: {}",
                other
            ))),
        }
    }
}

/// A plan/apply submission
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub config: String,
    #[serde(default)]
    pub format: ConfigFormat,
    #[serde(default)]
    pub variables: Variables,
}

impl JobRequest {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            ..Default::default()
        }
    }

    pub fn format(mut self, format: ConfigFormat) -> Self {
        self.format = format;
        self
    }

    pub fn variable(mut self, key: impl Into<String>, value: impl Into<VarValue>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    /// Reject payloads that must never reach a workspace
    pub fn validate(&self, max_config_bytes: usize) -> Result<()> {
        if self.config.trim().is_empty() {
            return Err(RunnerError::Validation(
                "config must not be empty".to_string(),
            ));
        }

        if self.config.len() > max_config_bytes {
            return Err(RunnerError::Validation(format!(
                "config exceeds {} bytes",
                max_config_bytes
            )));
        }

        if self.config.contains('\0') {
            return Err(RunnerError::Validation(
                "config must not contain NUL bytes".to_string(),
            ));
        }

        if self.format == ConfigFormat::Json {
            serde_json::from_str::<serde_json::Value>(&self.config).map_err(|e| {
                RunnerError::Validation(format!("config is not valid JSON: {}", e))
            })?;
        }

        for key in self.variables.keys() {
            if !is_identifier(key) {
                return Err(RunnerError::Validation(format!(
                    "invalid variable name: {:?}",
                    key
                )));
            }
        }

        Ok(())
    }
}

fn is_identifier(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
