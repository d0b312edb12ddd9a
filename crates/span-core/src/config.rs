use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_ignore() -> Vec<String> {
    vec![
        ".git".into(),
        "__pycache__".into(),
        ".venv".into(),
        "node_modules".into(),
        ".span".into(),
    ]
}

fn default_test_patterns() -> Vec<String> {
    vec!["tests/".to_string()]
}

fn default_max_steps() -> u64 {
    15
}

fn default_max_retries_per_step() -> u64 {
    3
}

fn default_pytest_args() -> Vec<String> {
    vec!["-x".to_string(), "--tb=short".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerificationConfig {
    pub syntax: bool,
    pub ruff: bool,
    pub mypy: bool,
    pub mypy_full: bool,
    pub pytest: bool,
    pub pytest_args: Vec<String>,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            syntax: true,
            ruff: true,
            mypy: false,
            mypy_full: true,
            pytest: true,
            pytest_args: default_pytest_args(),
        }
    }
}

/// Immutable for the duration of a session. Loaded from `span.yaml` at the
/// project root, or defaulted entirely if the file is absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,
    pub verification: VerificationConfig,
    #[serde(default = "default_test_patterns")]
    pub test_patterns: Vec<String>,
    #[serde(default)]
    pub fallback_tests: Vec<String>,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_max_retries_per_step")]
    pub max_retries_per_step: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key_env: default_api_key_env(),
            ignore: default_ignore(),
            verification: VerificationConfig::default(),
            test_patterns: default_test_patterns(),
            fallback_tests: Vec::new(),
            max_steps: default_max_steps(),
            max_retries_per_step: default_max_retries_per_step(),
        }
    }
}

impl Config {
    /// Resolve the API key from the environment variable named by
    /// `api_key_env`.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }

    pub fn default_path(project_root: &Path) -> PathBuf {
        project_root.join("span.yaml")
    }

    /// Load `span.yaml` from `project_root`, or an explicit `config_path`.
    /// When `config_path` is `None` and the default file is absent, returns
    /// the default configuration rather than erroring; an explicitly named
    /// path that is absent is an error.
    pub fn load(project_root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match config_path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(project_root), false),
        };

        if !path.exists() {
            if explicit {
                anyhow::bail!("config file not found: {}", path.display());
            }
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }
}
