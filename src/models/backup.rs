//! Backup configuration and repository records.

use crate::constants;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Keep-counts per period. A count of 0 disables that tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default = "default_daily")]
    pub daily: usize,
    #[serde(default = "default_weekly")]
    pub weekly: usize,
    #[serde(default = "default_monthly")]
    pub monthly: usize,
    #[serde(default = "default_yearly")]
    pub yearly: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            daily: default_daily(),
            weekly: default_weekly(),
            monthly: default_monthly(),
            yearly: default_yearly(),
        }
    }
}

impl RetentionPolicy {
    /// Upper bound on the number of snapshots a plan can keep.
    pub fn max_kept(&self) -> usize {
        self.daily + self.weekly + self.monthly + self.yearly
    }
}

fn default_daily() -> usize {
    7
}

fn default_weekly() -> usize {
    4
}

fn default_monthly() -> usize {
    6
}

fn default_yearly() -> usize {
    2
}

/// Persisted as `backup.toml`. The passphrase is referenced by secret name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupConfig {
    pub repository: String,
    pub sources: Vec<PathBuf>,
    #[serde(default)]
    pub exclude: Vec<String>,
    pub passphrase_secret: String,
    #[serde(default)]
    pub retention: RetentionPolicy,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            repository: constants::DEFAULT_BACKUP_REPOSITORY.to_string(),
            sources: vec![PathBuf::from(constants::DOCKER_VOLUME_ROOT)],
            exclude: constants::DEFAULT_BACKUP_EXCLUDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            passphrase_secret: constants::BACKUP_PASSPHRASE_SECRET.to_string(),
            retention: RetentionPolicy::default(),
        }
    }
}

impl BackupConfig {
    /// Local repositories are plain paths; remote ones carry a `backend:` prefix.
    pub fn local_repository(&self) -> Option<PathBuf> {
        if self.repository.starts_with('/') {
            Some(PathBuf::from(&self.repository))
        } else {
            None
        }
    }
}

/// One entry of `restic snapshots --json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    #[serde(default)]
    pub short_id: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Snapshot {
    pub fn display_id(&self) -> &str {
        if self.short_id.is_empty() {
            &self.id[..self.id.len().min(8)]
        } else {
            &self.short_id
        }
    }
}

/// The final `summary` message of `restic backup --json`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SnapshotSummary {
    #[serde(default)]
    pub snapshot_id: Option<String>,
    #[serde(default)]
    pub files_new: u64,
    #[serde(default)]
    pub files_changed: u64,
    #[serde(default)]
    pub files_unmodified: u64,
    #[serde(default)]
    pub data_added: u64,
    #[serde(default)]
    pub total_files_processed: u64,
    #[serde(default)]
    pub total_bytes_processed: u64,
    #[serde(default)]
    pub total_duration: f64,
}

impl SnapshotSummary {
    /// Bytes processed per second; zero when the duration is unknown.
    pub fn throughput(&self) -> f64 {
        if self.total_duration > 0.0 {
            self.total_bytes_processed as f64 / self.total_duration
        } else {
            0.0
        }
    }
}
