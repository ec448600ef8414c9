//! One provisioning run: builds the step pipeline, executes it under the run
//! lock, and journals the result.

use crate::constants;
use crate::core::backup::BackupManager;
use crate::core::catalogue;
use crate::core::file_lock::FileLock;
use crate::core::firewall::{FirewallConfig, FirewallConfigurator};
use crate::core::history::{self, RunRecord};
use crate::core::host_setup::{HostLayout, HostSetup};
use crate::core::inventory;
use crate::core::orchestrator::{Pipeline, RunReport, StepOutcome};
use crate::core::paths::ProvisionPaths;
use crate::core::provisioner::{ProvisionResult, ServiceProvisioner};
use crate::core::retry::{RetryExecutor, RetryPolicy, Sleeper};
use crate::core::runner::CommandRunner;
use crate::core::secret_store::{EnsureAction, SecretBundle, SecretStore};
use crate::models::backup::BackupConfig;
use crate::models::inventory::InventoryRecord;
use crate::models::service::ServiceDefinition;
use anyhow::{Context, Result};
use chrono::Utc;
use ipnetwork::IpNetwork;
use std::path::PathBuf;
use tracing::warn;

/// Fully resolved inputs of a run.
#[derive(Debug, Clone)]
pub struct ProvisionSettings {
    /// Name used in endpoints; a domain or the host name.
    pub host: String,
    pub trusted_scope: Option<IpNetwork>,
    pub enable_admin_panel: bool,
    pub enable_accelerator_drivers: bool,
    pub skip_monitoring: bool,
    pub backup: BackupConfig,
    pub retry: RetryPolicy,
}

/// The machine being provisioned.
pub struct Host<'a> {
    pub runner: &'a dyn CommandRunner,
    pub sleeper: &'a dyn Sleeper,
    pub layout: HostLayout,
    /// Binary the backup timer invokes.
    pub binary: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ProvisionSummary {
    pub report: RunReport,
    /// Optional components left out by configuration.
    pub skipped: Vec<String>,
    pub inventory: Option<InventoryRecord>,
    pub record: RunRecord,
}

#[derive(Default)]
struct RunState {
    secrets: Option<SecretBundle>,
    deployed: Vec<&'static ServiceDefinition>,
    inventory: Option<InventoryRecord>,
}

impl RunState {
    fn secrets(&self) -> Result<&SecretBundle> {
        self.secrets.as_ref().context("secrets were not loaded")
    }
}

pub fn skipped_components(settings: &ProvisionSettings) -> Vec<String> {
    let mut skipped = Vec::new();
    if settings.skip_monitoring {
        skipped.push("monitoring (prometheus, grafana)".to_string());
    }
    if !settings.enable_admin_panel {
        skipped.push("admin panel".to_string());
    }
    if !settings.enable_accelerator_drivers {
        skipped.push("accelerator drivers".to_string());
    }
    if settings.trusted_scope.is_none() {
        skipped.push("trusted-scope admin access".to_string());
    }
    skipped
}

/// Execute the full pipeline. Fails only on preconditions (state directory, lock,
/// history); step failures are reported in the summary.
pub fn run(paths: &ProvisionPaths, settings: &ProvisionSettings, host: &Host<'_>) -> Result<ProvisionSummary> {
    crate::util::fs::ensure_dir(&paths.root, constants::STATE_DIR_MODE)
        .with_context(|| format!("prepare state directory {}", paths.root.display()))?;
    let _lock = FileLock::for_run(&paths.run_lock)?;

    let retry = RetryExecutor::new(settings.retry, host.sleeper);
    let setup = HostSetup::new(host.runner, &retry, host.layout.clone());
    let provisioner = ServiceProvisioner::new(host.runner, &retry);
    let firewall = FirewallConfigurator::new(host.runner);
    let backups = BackupManager::new(
        host.runner,
        paths.backup_config.clone(),
        host.layout.unit_dir.clone(),
        paths.root.clone(),
        host.binary.clone(),
    );
    let store = SecretStore::new(paths.secrets.clone());
    let services = catalogue::selected(settings.skip_monitoring);
    let firewall_config = FirewallConfig {
        trusted_scope: settings.trusted_scope,
        panel_enabled: settings.enable_admin_panel,
    };

    let mut pipeline: Pipeline<'_, RunState> = Pipeline::new();

    pipeline.fatal("secrets", |state| {
        let (bundle, action) = store.ensure(&catalogue::required_secrets())?;
        let detail = match action {
            EnsureAction::Loaded => format!("loaded {} secrets", bundle.len()),
            EnsureAction::Generated(n) => format!("generated {} secrets", n),
            EnsureAction::Extended(names) => format!("added {}", names.join(", ")),
        };
        state.secrets = Some(bundle);
        Ok(StepOutcome::Satisfied(detail))
    });
    pipeline.fatal("host-basics", |_| setup.ensure_basics());
    pipeline.fatal("container-runtime", |_| setup.ensure_container_runtime());
    if settings.enable_accelerator_drivers {
        pipeline.recoverable("accelerator-drivers", |_| setup.ensure_accelerator());
    }
    if settings.enable_admin_panel {
        pipeline.recoverable("admin-panel", |_| setup.ensure_admin_panel());
    }

    for def in services.iter().copied() {
        let provisioner = &provisioner;
        pipeline.recoverable(format!("service:{}", def.name), move |state: &mut RunState| {
            let result = provisioner.ensure(def, state.secrets()?)?;
            state.deployed.push(def);
            let detail = match result {
                ProvisionResult::AlreadyRunning => "already running",
                ProvisionResult::Restarted => "started existing container",
                ProvisionResult::Started => "created and started",
            };
            Ok(StepOutcome::Satisfied(detail.to_string()))
        });
    }

    pipeline.recoverable("firewall", |_| firewall.apply(&firewall_config));
    pipeline.recoverable("backup", |state| {
        backups.ensure_schedule(&settings.backup, state.secrets()?)
    });
    pipeline.recoverable("inventory", |state| {
        let record = inventory::render(
            &settings.host,
            &state.deployed,
            settings.enable_admin_panel,
            &paths.secrets,
            Utc::now(),
        );
        inventory::write(&paths.inventory, &record)?;
        let detail = format!("{} entries written to {}", record.services.len(), paths.inventory.display());
        state.inventory = Some(record);
        Ok(StepOutcome::Satisfied(detail))
    });

    let mut state = RunState::default();
    let report = pipeline.run(&mut state);

    let record = history::append(paths, RunRecord::from_report(&report)).unwrap_or_else(|e| {
        warn!(error = %format!("{:#}", e), "could not record run history");
        RunRecord::from_report(&report)
    });

    Ok(ProvisionSummary {
        skipped: skipped_components(settings),
        inventory: state.inventory,
        report,
        record,
    })
}
