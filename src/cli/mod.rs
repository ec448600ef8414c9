//! CLI routing and command dispatch.

use crate::core::history::{self, RunRecord};
use crate::core::paths::ProvisionPaths;
use crate::core::runner::SystemRunner;
use crate::core::store;
use crate::models::config::ConfigFile;
use crate::util::journald::{self, Priority};
use crate::util::privilege;
use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

pub mod backup;
pub mod doctor;
pub mod firewall;
pub mod history_cmd;
pub mod provision;
pub mod secret;

pub const JOURNAL_TAG: &str = "hostforge";

/// Shared context passed to all command handlers.
pub struct CliContext {
    pub paths: ProvisionPaths,
    pub config: ConfigFile,
    pub non_interactive: bool,
    pub runner: SystemRunner,
}

impl CliContext {
    /// Append to the run history, then mirror the summary to journald.
    pub fn record(&self, record: RunRecord) {
        match history::append(&self.paths, record) {
            Ok(stored) => self.forward(&stored),
            Err(e) => eprintln!("warning: run history not written: {:#}", e),
        }
    }

    /// Send a history entry to journald when `[history] journald` is set.
    pub fn forward(&self, record: &RunRecord) {
        if !self.config.history.journald {
            return;
        }
        let priority = if record.outcome.starts_with("aborted") {
            Priority::Warning
        } else {
            Priority::Info
        };
        journald::forward(&self.runner, JOURNAL_TAG, priority, &record.summary_line());
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "hostforge",
    version,
    about = "Provision a single host into a self-managed service platform",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    /// State directory (default /etc/hostforge)
    #[arg(long, global = true, value_name = "PATH", env = "HOSTFORGE_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Configuration file (default <state-dir>/hostforge.toml)
    #[arg(long, global = true, value_name = "FILE", env = "HOSTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(flatten)]
    pub provision: provision::ProvisionArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let root_action = self.requires_root();
        let paths = ProvisionPaths::resolve(self.state_dir, self.config);
        let config = load_config(&paths)?;

        if let Some(action) = root_action {
            privilege::require_root(action)?;
        }

        let ctx = CliContext {
            paths,
            config,
            non_interactive: self.provision.non_interactive,
            runner: SystemRunner,
        };

        match self.command {
            None => provision::run(&ctx, self.provision),
            Some(Commands::Doctor(args)) => doctor::run(&ctx, args),
            Some(Commands::Firewall { command }) => firewall::run(&ctx, command),
            Some(Commands::Backup { command }) => backup::run(&ctx, command),
            Some(Commands::Secret { command }) => secret::run(&ctx, command),
            Some(Commands::History(args)) => history_cmd::run(&ctx, args),
        }
    }

    /// Name of the action when it needs root, `None` for read-only commands.
    pub fn requires_root(&self) -> Option<&'static str> {
        match &self.command {
            None => Some("provision"),
            Some(cmd) if cmd.requires_root() => Some(cmd.name()),
            Some(_) => None,
        }
    }
}

/// Missing file means defaults; a file that does not parse is fatal.
fn load_config(paths: &ProvisionPaths) -> Result<ConfigFile> {
    let config = store::load(&paths.config)
        .with_context(|| format!("load configuration {}", paths.config.display()))?;
    Ok(config.unwrap_or_default())
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check host readiness (safe, read-only)
    Doctor(doctor::DoctorArgs),
    /// Inspect the derived firewall policy
    Firewall {
        #[command(subcommand)]
        command: firewall::FirewallCommand,
    },
    /// Snapshot, prune, or list backups
    Backup {
        #[command(subcommand)]
        command: backup::BackupCommand,
    },
    /// Inspect generated secrets
    Secret {
        #[command(subcommand)]
        command: secret::SecretCommand,
    },
    /// Show the run history
    History(history_cmd::HistoryArgs),
}

impl Commands {
    /// Whether this command requires root privileges.
    pub fn requires_root(&self) -> bool {
        matches!(
            self,
            Commands::Backup {
                command: backup::BackupCommand::Run | backup::BackupCommand::Prune(_)
            } | Commands::Secret {
                command: secret::SecretCommand::Get(_)
            }
        )
    }

    /// Command name for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Doctor(_) => "doctor",
            Commands::Firewall { .. } => "firewall",
            Commands::Backup { command } => match command {
                backup::BackupCommand::Run => "backup run",
                backup::BackupCommand::Prune(_) => "backup prune",
                backup::BackupCommand::Snapshots(_) => "backup snapshots",
            },
            Commands::Secret { command } => match command {
                secret::SecretCommand::List => "secret list",
                secret::SecretCommand::Get(_) => "secret get",
            },
            Commands::History(_) => "history",
        }
    }
}
