//! Optional `hostforge.toml` configuration file model.

use crate::constants;
use crate::models::backup::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub backup: BackupSection,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub history: HistorySection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkSection {
    #[serde(default)]
    pub domain: Option<String>,
    /// CIDR granted access to administrative ports.
    #[serde(default)]
    pub trusted_scope: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupSection {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub sources: Option<Vec<PathBuf>>,
    #[serde(default)]
    pub exclude: Option<Vec<String>>,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

fn default_attempts() -> u32 {
    constants::DEFAULT_RETRY_ATTEMPTS
}

fn default_delay_secs() -> u64 {
    constants::DEFAULT_RETRY_DELAY_SECS
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistorySection {
    /// Forward each run summary to journald.
    #[serde(default)]
    pub journald: bool,
}
