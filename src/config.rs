//! Agent configuration loaded from an optional TOML file.
//!
//! Every field has a default so an empty file (or no file) is valid. CLI
//! flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::security::DangerPatternSet;
use crate::shell::{RetryPolicy, RunnerConfig, ShellSpec};

fn default_timeout_secs() -> u64 {
    300
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_max_output_bytes() -> usize {
    500_000
}

fn default_log_tail_lines() -> usize {
    500
}

fn default_website_timeout_secs() -> u64 {
    30
}

fn default_tool_timeout_secs() -> u64 {
    600
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

/// Timeout, retry and capture settings for the execution engine.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Interpreter override; the platform shell is used when unset.
    #[serde(default)]
    pub shell: Option<String>,
    #[serde(default)]
    pub shell_args: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            retries: 0,
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            max_output_bytes: default_max_output_bytes(),
            shell: None,
            shell_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub extra_patterns: Vec<PatternConfig>,
}

/// One user-supplied danger rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternConfig {
    pub name: String,
    pub pattern: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_log_tail_lines")]
    pub log_tail_lines: usize,
    #[serde(default = "default_website_timeout_secs")]
    pub website_timeout_secs: u64,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            log_tail_lines: default_log_tail_lines(),
            website_timeout_secs: default_website_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl AgentConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make every run fail before it starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let exec = &self.execution;
        if exec.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "execution.timeout_secs",
                message: "must be greater than zero".to_string(),
            });
        }
        if exec.backoff_cap_ms < exec.backoff_base_ms {
            return Err(ConfigError::Invalid {
                field: "execution.backoff_cap_ms",
                message: format!(
                    "cap ({}ms) is below base delay ({}ms)",
                    exec.backoff_cap_ms, exec.backoff_base_ms
                ),
            });
        }
        if exec.max_output_bytes == 0 {
            return Err(ConfigError::Invalid {
                field: "execution.max_output_bytes",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.scan.website_timeout_secs == 0 || self.scan.tool_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "scan",
                message: "scan timeouts must be greater than zero".to_string(),
            });
        }
        self.danger_patterns().map(|_| ())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.execution.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.execution.backoff_base_ms),
            Duration::from_millis(self.execution.backoff_cap_ms),
        )
    }

    pub fn runner_config(&self) -> RunnerConfig {
        let shell = match &self.execution.shell {
            Some(program) => ShellSpec::new(program.clone(), self.execution.shell_args.clone()),
            None => ShellSpec::platform_default(),
        };
        RunnerConfig {
            shell,
            retry: self.retry_policy(),
            max_output_bytes: self.execution.max_output_bytes,
        }
    }

    pub fn danger_patterns(&self) -> Result<DangerPatternSet, ConfigError> {
        DangerPatternSet::with_extra(&self.safety.extra_patterns)
    }
}
