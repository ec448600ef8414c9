//! Encrypted, scheduled backups of container volumes through restic.

use crate::constants;
use crate::core::orchestrator::StepOutcome;
use crate::core::retention::{self, RetentionPlan};
use crate::core::runner::{CommandRunner, Invocation};
use crate::core::secret_store::SecretBundle;
use crate::core::{store, units};
use crate::models::backup::{BackupConfig, Snapshot, SnapshotSummary};
use crate::util::{privilege, systemd};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BACKUP_HEADER: &str = "# hostforge backup configuration.\n\
# The passphrase is stored in secrets.toml under `passphrase_secret`.\n\n";

/// Tag applied to a snapshot taken at `now`; sorts chronologically.
pub fn snapshot_tag(now: DateTime<Utc>) -> String {
    format!(
        "{}{}",
        constants::SNAPSHOT_TAG_PREFIX,
        now.format("%Y%m%dT%H%M%SZ")
    )
}

/// Extract the `summary` message from `restic backup --json` output.
pub fn parse_summary(stdout: &str) -> Result<SnapshotSummary> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(value) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        if value.get("message_type").and_then(Value::as_str) == Some("summary") {
            return serde_json::from_value(value).context("parse backup summary");
        }
    }
    bail!("backup output contained no summary")
}

/// Load `backup.toml`; an absent file means provisioning has not configured backups yet.
pub fn load_config(path: &Path) -> Result<BackupConfig> {
    store::load(path)?.with_context(|| {
        format!(
            "{} not found; run provisioning first to configure backups",
            path.display()
        )
    })
}

pub struct BackupManager<'a> {
    runner: &'a dyn CommandRunner,
    config_path: PathBuf,
    unit_dir: PathBuf,
    state_dir: PathBuf,
    binary: PathBuf,
    /// Hostname recorded on snapshots; retention only ever touches these.
    host: String,
}

impl<'a> BackupManager<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        config_path: PathBuf,
        unit_dir: PathBuf,
        state_dir: PathBuf,
        binary: PathBuf,
    ) -> Self {
        Self {
            runner,
            config_path,
            unit_dir,
            state_dir,
            binary,
            host: privilege::hostname().unwrap_or_else(|| "localhost".to_string()),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Whether `snapshot` was taken by this tool on this host.
    fn owns(&self, snapshot: &Snapshot) -> bool {
        snapshot.hostname == self.host
            && snapshot
                .tags
                .iter()
                .any(|t| t.starts_with(constants::SNAPSHOT_TAG_PREFIX))
    }

    fn restic(&self, config: &BackupConfig, secrets: &SecretBundle) -> Result<Invocation> {
        let passphrase = secrets
            .require(&config.passphrase_secret)
            .context("backup passphrase")?;
        Ok(Invocation::new("restic")
            .args(["-r", config.repository.as_str()])
            .env("RESTIC_PASSWORD", passphrase))
    }

    /// Persist the config, bootstrap the repository, and install the daily timer.
    pub fn ensure_schedule(&self, config: &BackupConfig, secrets: &SecretBundle) -> Result<StepOutcome> {
        store::save(&self.config_path, config, BACKUP_HEADER, constants::STATE_FILE_MODE)?;
        let initialized = self.ensure_repository(config, secrets)?;
        let scheduled = self.install_schedule()?;

        let mut detail = Vec::new();
        detail.push(if initialized {
            format!("initialized repository {}", config.repository)
        } else {
            format!("repository {} present", config.repository)
        });
        detail.push(if scheduled {
            "daily timer installed".to_string()
        } else {
            "daily timer already active".to_string()
        });
        Ok(StepOutcome::Satisfied(detail.join(", ")))
    }

    /// Create the repository unless it answers a config query. Returns whether it was created.
    pub fn ensure_repository(&self, config: &BackupConfig, secrets: &SecretBundle) -> Result<bool> {
        let probe = self.restic(config, secrets)?.args(["cat", "config"]);
        if self.runner.succeeds(&probe) {
            debug!(repository = %config.repository, "repository already initialized");
            return Ok(false);
        }
        if let Some(dir) = config.local_repository() {
            if let Some(parent) = dir.parent() {
                crate::util::fs::ensure_dir(parent, constants::STATE_DIR_MODE)?;
            }
        }
        self.runner
            .run_checked(&self.restic(config, secrets)?.arg("init"))
            .with_context(|| format!("initialize backup repository {}", config.repository))?;
        info!(repository = %config.repository, "backup repository initialized");
        Ok(true)
    }

    fn install_schedule(&self) -> Result<bool> {
        let name = constants::BACKUP_UNIT_NAME;
        let timer_unit = format!("{}.timer", name);
        let service_changed = units::install_if_changed(
            &self.unit_dir.join(format!("{}.service", name)),
            &units::backup_service(&self.binary, &self.state_dir),
        )?;
        let timer_changed = units::install_if_changed(
            &self.unit_dir.join(&timer_unit),
            &units::backup_timer(),
        )?;
        let changed = service_changed || timer_changed;
        if changed {
            systemd::daemon_reload(self.runner)?;
        }
        if changed || !systemd::is_enabled(self.runner, &timer_unit) {
            systemd::enable_now(self.runner, &timer_unit)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Take one snapshot of the configured sources.
    pub fn run_snapshot(
        &self,
        config: &BackupConfig,
        secrets: &SecretBundle,
        now: DateTime<Utc>,
    ) -> Result<SnapshotSummary> {
        if !self.runner.succeeds(&Invocation::new("docker").arg("info")) {
            bail!("container runtime is not available; refusing to snapshot its volumes");
        }
        let tag = snapshot_tag(now);
        let mut backup = self
            .restic(config, secrets)?
            .args(["backup", "--json", "--host", self.host.as_str(), "--tag", tag.as_str()]);
        for pattern in &config.exclude {
            backup = backup.args(["--exclude", pattern.as_str()]);
        }
        for source in &config.sources {
            backup = backup.arg(source.display().to_string());
        }
        let output = self
            .runner
            .run_checked(&backup)
            .with_context(|| format!("snapshot to {}", config.repository))?;
        let summary = parse_summary(&output.stdout)?;
        info!(
            tag = %tag,
            files = summary.total_files_processed,
            added = summary.data_added,
            "snapshot created"
        );
        Ok(summary)
    }

    /// Snapshots this host took. Other hosts sharing the repository are never listed.
    pub fn snapshots(&self, config: &BackupConfig, secrets: &SecretBundle) -> Result<Vec<Snapshot>> {
        let list = self
            .restic(config, secrets)?
            .args(["snapshots", "--json", "--host", self.host.as_str()]);
        let output = self.runner.run_checked(&list).context("list snapshots")?;
        let trimmed = output.stdout.trim();
        if trimmed.is_empty() || trimmed == "null" {
            return Ok(Vec::new());
        }
        let mut snapshots: Vec<Snapshot> =
            serde_json::from_str(trimmed).context("parse snapshot listing")?;
        snapshots.retain(|s| self.owns(s));
        Ok(snapshots)
    }

    /// Apply the retention policy. With `dry_run` the plan is only computed.
    pub fn prune(&self, config: &BackupConfig, secrets: &SecretBundle, dry_run: bool) -> Result<RetentionPlan> {
        let snapshots = self.snapshots(config, secrets)?;
        let plan = retention::plan(&snapshots, &config.retention);
        if dry_run || plan.forget.is_empty() {
            return Ok(plan);
        }
        let forget = self
            .restic(config, secrets)?
            .arg("forget")
            .args(plan.forget_ids());
        self.runner.run_checked(&forget).context("forget expired snapshots")?;
        self.runner
            .run_checked(&self.restic(config, secrets)?.arg("prune"))
            .context("reclaim repository space")?;
        info!(kept = plan.keep.len(), forgotten = plan.forget.len(), "retention applied");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::fake::FakeRunner;
    use crate::core::runner::CommandOutput;
    use crate::core::secret_store::SecretStore;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        secrets: SecretBundle,
        config: BackupConfig,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = SecretStore::new(dir.path().join("secrets.toml"));
        let (secrets, _) = store.ensure(&[constants::BACKUP_PASSPHRASE_SECRET]).unwrap();
        let config = BackupConfig {
            repository: dir.path().join("repo").display().to_string(),
            ..BackupConfig::default()
        };
        Fixture {
            dir,
            secrets,
            config,
        }
    }

    fn manager<'a>(runner: &'a FakeRunner, fx: &Fixture) -> BackupManager<'a> {
        BackupManager::new(
            runner,
            fx.dir.path().join("backup.toml"),
            fx.dir.path().join("units"),
            PathBuf::from("/etc/hostforge"),
            PathBuf::from("/usr/local/bin/hostforge"),
        )
        .with_host("box")
    }

    const SUMMARY: &str = r#"{"message_type":"status","percent_done":0.5}
{"message_type":"summary","files_new":3,"files_changed":1,"files_unmodified":40,"data_added":2048,"total_files_processed":44,"total_bytes_processed":10240,"total_duration":2.0,"snapshot_id":"9a8b7c6d"}
"#;

    #[test]
    fn test_snapshot_tag_format() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 2, 5, 9).unwrap();
        assert_eq!(snapshot_tag(now), "hostforge-20261019T020509Z");
    }

    #[test]
    fn test_parse_summary() {
        let summary = parse_summary(SUMMARY).unwrap();
        assert_eq!(summary.snapshot_id.as_deref(), Some("9a8b7c6d"));
        assert_eq!(summary.total_files_processed, 44);
        assert_eq!(summary.throughput(), 5120.0);
        assert!(parse_summary("{\"message_type\":\"status\"}\n").is_err());
    }

    #[test]
    fn test_ensure_schedule_initializes_once() {
        let fx = fixture();
        let runner = FakeRunner::new();
        runner.respond(
            "restic -r",
            vec![CommandOutput::failed(10, "repository does not exist"), CommandOutput::ok("")],
        );
        runner.respond("systemctl is-enabled", vec![CommandOutput::ok("")]);
        let mgr = manager(&runner, &fx);

        mgr.ensure_schedule(&fx.config, &fx.secrets).unwrap();
        assert!(runner.lines().iter().any(|l| l.ends_with(" init")));
        assert_eq!(runner.count("systemctl enable --now hostforge-backup.timer"), 1);

        let saved = fs::read_to_string(fx.dir.path().join("backup.toml")).unwrap();
        assert!(saved.contains("passphrase_secret = \"backup_passphrase\""));
        let passphrase = fx.secrets.require(constants::BACKUP_PASSPHRASE_SECRET).unwrap();
        assert!(!saved.contains(passphrase));

        let second = mgr.ensure_schedule(&fx.config, &fx.secrets).unwrap();
        assert_eq!(
            runner.lines().iter().filter(|l| l.ends_with(" init")).count(),
            1
        );
        assert_eq!(runner.count("systemctl enable --now"), 1);
        match second {
            StepOutcome::Satisfied(detail) => assert!(detail.contains("already active")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_passphrase_travels_in_environment() {
        let fx = fixture();
        let runner = FakeRunner::new();
        manager(&runner, &fx)
            .run_snapshot(&fx.config, &fx.secrets, Utc::now())
            .unwrap_err();
        let restic = runner
            .calls()
            .into_iter()
            .find(|c| c.program() == "restic")
            .unwrap();
        assert_eq!(restic.env_keys().collect::<Vec<_>>(), vec!["RESTIC_PASSWORD"]);
        let passphrase = fx.secrets.require(constants::BACKUP_PASSPHRASE_SECRET).unwrap();
        assert!(!restic.command_line().contains(passphrase));
    }

    #[test]
    fn test_run_snapshot_excludes_and_tags() {
        let fx = fixture();
        let runner = FakeRunner::new();
        runner.respond("restic -r", vec![CommandOutput::ok(SUMMARY)]);
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 2, 0, 0).unwrap();
        let summary = manager(&runner, &fx)
            .run_snapshot(&fx.config, &fx.secrets, now)
            .unwrap();
        assert_eq!(summary.files_new, 3);

        let line = runner
            .lines()
            .into_iter()
            .find(|l| l.contains(" backup --json"))
            .unwrap();
        assert!(line.contains("--host box --tag hostforge-20261019T020000Z"));
        assert!(line.contains("--exclude **/cache"));
        assert!(line.ends_with("/var/lib/docker/volumes"));
    }

    #[test]
    fn test_run_snapshot_requires_runtime() {
        let fx = fixture();
        let runner = FakeRunner::new();
        runner.fail("docker info");
        let err = manager(&runner, &fx)
            .run_snapshot(&fx.config, &fx.secrets, Utc::now())
            .unwrap_err();
        assert!(err.to_string().contains("container runtime"));
        assert_eq!(runner.count("restic"), 0);
    }

    #[test]
    fn test_prune_forgets_outside_plan() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let listing = r#"[
{"id":"aaaa000000000001","short_id":"aaaa0001","time":"2026-10-18T02:00:00Z","hostname":"box","tags":["hostforge-20261018T020000Z"],"paths":["/v"]},
{"id":"aaaa000000000002","short_id":"aaaa0002","time":"2026-10-18T01:00:00Z","hostname":"box","tags":["hostforge-20261018T010000Z"],"paths":["/v"]}
]"#;
        runner.respond("restic -r", vec![CommandOutput::ok(listing)]);
        let mgr = manager(&runner, &fx);

        let dry = mgr.prune(&fx.config, &fx.secrets, true).unwrap();
        assert_eq!(dry.forget_ids(), vec!["aaaa000000000002"]);
        assert!(!runner.lines().iter().any(|l| l.contains(" forget")));

        mgr.prune(&fx.config, &fx.secrets, false).unwrap();
        let lines = runner.lines();
        let forget = lines.iter().position(|l| l.ends_with(" forget aaaa000000000002")).unwrap();
        let prune = lines.iter().position(|l| l.ends_with(" prune")).unwrap();
        assert!(forget < prune);
    }

    #[test]
    fn test_prune_leaves_other_hosts_alone() {
        let fx = fixture();
        let runner = FakeRunner::new();
        let listing = r#"[
{"id":"a1","time":"2026-10-18T02:10:00Z","hostname":"box","tags":["hostforge-20261018T021000Z"],"paths":["/v"]},
{"id":"b1","time":"2026-10-18T02:05:00Z","hostname":"other","tags":["hostforge-20261018T020500Z"],"paths":["/v"]},
{"id":"c1","time":"2026-10-18T02:01:00Z","hostname":"box","tags":["manual"],"paths":["/v"]}
]"#;
        runner.respond("restic -r", vec![CommandOutput::ok(listing)]);
        let mgr = manager(&runner, &fx);

        let plan = mgr.prune(&fx.config, &fx.secrets, false).unwrap();
        assert_eq!(plan.keep.len(), 1);
        assert_eq!(plan.keep[0].snapshot.id, "a1");
        assert!(plan.forget.is_empty());
        assert!(!runner.lines().iter().any(|l| l.contains(" forget")));
        assert!(runner
            .lines()
            .iter()
            .any(|l| l.ends_with("snapshots --json --host box")));
    }

    #[test]
    fn test_empty_listing() {
        let fx = fixture();
        let runner = FakeRunner::new();
        runner.respond("restic -r", vec![CommandOutput::ok("null\n")]);
        let snaps = manager(&runner, &fx).snapshots(&fx.config, &fx.secrets).unwrap();
        assert!(snaps.is_empty());
    }

    #[test]
    fn test_load_config_missing() {
        let dir = TempDir::new().unwrap();
        let err = load_config(&dir.path().join("backup.toml")).unwrap_err();
        assert!(err.to_string().contains("run provisioning first"));
    }
}
