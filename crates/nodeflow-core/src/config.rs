use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{NodeflowError, Result};

/// Top-level nodeflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: RunConfig,
    #[serde(default, rename = "loop")]
    pub loops: LoopConfig,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Hard ceiling on dispatches per run (runaway loop circuit breaker).
    #[serde(default = "default_max_dispatches")]
    pub max_dispatches: usize,
    /// Timeout for one executor call when the executor declares none.
    #[serde(default = "default_node_timeout_secs")]
    pub node_timeout_secs: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_dispatches: default_max_dispatches(),
            node_timeout_secs: default_node_timeout_secs(),
        }
    }
}

fn default_max_dispatches() -> usize { 1000 }
fn default_node_timeout_secs() -> u64 { 300 }

/// What happens when one loop iteration fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopFailurePolicy {
    /// Halt the whole run, like any other executor failure.
    #[default]
    Halt,
    /// Record the failure, feed an empty string into the merge, keep iterating.
    Continue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Upper bound on `maxIterations` regardless of node config.
    #[serde(default = "default_max_iterations_cap")]
    pub max_iterations_cap: usize,
    /// Wall-clock budget per loop node instance.
    #[serde(default = "default_loop_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub failure_policy: LoopFailurePolicy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations_cap: default_max_iterations_cap(),
            timeout_secs: default_loop_timeout_secs(),
            failure_policy: LoopFailurePolicy::default(),
        }
    }
}

fn default_max_iterations_cap() -> usize { 100 }
fn default_loop_timeout_secs() -> u64 { 30 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Upper bound on `branchCount` regardless of node config.
    #[serde(default = "default_max_branches")]
    pub max_branches: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_branches: default_max_branches(),
        }
    }
}

fn default_max_branches() -> usize { 5 }

/// JSONL run trace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Directory for trace files, one `{run_id}.jsonl` per run.
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_dir: default_log_dir(),
        }
    }
}

fn default_log_dir() -> String { "logs".to_string() }

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| NodeflowError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Parse config from TOML text, expanding `${ENV_VAR}` references first.
    pub fn from_toml(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self =
            toml::from_str(&expanded).map_err(|e| NodeflowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_dispatches == 0 {
            return Err(NodeflowError::Config(
                "engine.max_dispatches must be greater than 0".into(),
            ));
        }
        if self.parallel.max_branches == 0 {
            return Err(NodeflowError::Config(
                "parallel.max_branches must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the log directory (expand ~).
    pub fn log_dir(&self) -> PathBuf {
        let dir = &self.log.log_dir;
        if let Some(rest) = dir.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(dir)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
