//! State directory resolution and the files kept inside it.

use crate::constants;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct ProvisionPaths {
    pub root: PathBuf,
    pub config: PathBuf,
    pub secrets: PathBuf,
    pub backup_config: PathBuf,
    pub inventory: PathBuf,
    pub history: PathBuf,
    pub run_lock: PathBuf,
    pub history_lock: PathBuf,
    pub unit_dir: PathBuf,
}

impl ProvisionPaths {
    /// Resolve paths from CLI arg, env var, or the default location.
    pub fn resolve(root_arg: Option<PathBuf>, config_arg: Option<PathBuf>) -> Self {
        let root = root_arg
            .or_else(|| env::var_os("HOSTFORGE_STATE_DIR").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(constants::DEFAULT_STATE_DIR));
        let mut paths = Self::from_root(root);
        if let Some(config) = config_arg.or_else(|| env::var_os("HOSTFORGE_CONFIG").map(PathBuf::from)) {
            paths.config = config;
        }
        paths
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            config: root.join("hostforge.toml"),
            secrets: root.join("secrets.toml"),
            backup_config: root.join("backup.toml"),
            inventory: root.join("inventory.toml"),
            history: root.join("history.log"),
            run_lock: root.join("run.lock"),
            history_lock: root.join("history.lock"),
            unit_dir: PathBuf::from(constants::SYSTEMD_UNIT_DIR),
            root,
        }
    }
}

impl std::fmt::Display for ProvisionPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "hostforge@{}", self.root.display())
    }
}
