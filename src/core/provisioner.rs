//! Idempotent installation of one containerized service.

use crate::core::retry::RetryExecutor;
use crate::core::runner::{CommandRunner, Invocation};
use crate::core::secret_store::SecretBundle;
use crate::models::service::{EnvBinding, ServiceDefinition};
use anyhow::{Context, Result};
use tracing::{debug, info};

/// State of a service after [`ServiceProvisioner::ensure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionResult {
    AlreadyRunning,
    /// Existed but was stopped; started without re-creating.
    Restarted,
    Started,
}

/// Observed container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Missing,
    Stopped,
    Running,
}

pub struct ServiceProvisioner<'a> {
    runner: &'a dyn CommandRunner,
    retry: &'a RetryExecutor<'a>,
}

impl<'a> ServiceProvisioner<'a> {
    pub fn new(runner: &'a dyn CommandRunner, retry: &'a RetryExecutor<'a>) -> Self {
        Self { runner, retry }
    }

    pub fn container_state(&self, name: &str) -> ContainerState {
        let inspect = Invocation::new("docker").args([
            "inspect",
            "--type",
            "container",
            "--format",
            "{{.State.Running}}",
            name,
        ]);
        match self.runner.run(&inspect) {
            Ok(out) if out.success() => {
                if out.stdout.trim() == "true" {
                    ContainerState::Running
                } else {
                    ContainerState::Stopped
                }
            }
            _ => ContainerState::Missing,
        }
    }

    pub fn ensure(&self, def: &ServiceDefinition, secrets: &SecretBundle) -> Result<ProvisionResult> {
        match self.container_state(def.name) {
            ContainerState::Running => {
                debug!(service = def.name, "already running");
                return Ok(ProvisionResult::AlreadyRunning);
            }
            ContainerState::Stopped => {
                self.runner
                    .run_checked(&Invocation::new("docker").args(["start", def.name]))
                    .with_context(|| format!("start existing container {}", def.name))?;
                info!(service = def.name, "started existing container");
                return Ok(ProvisionResult::Restarted);
            }
            ContainerState::Missing => {}
        }

        // Resolve every secret before touching the host so a missing one fails cleanly.
        let run = run_invocation(def, secrets)?;

        self.retry
            .run(&format!("pull {}", def.image), |_| {
                self.runner
                    .run_checked(&Invocation::new("docker").args(["pull", def.image]))
            })?;

        for volume in def.named_volumes() {
            ensure_volume(self.runner, volume)?;
        }
        for network in def.networks {
            ensure_network(self.runner, network)?;
        }

        self.runner
            .run_checked(&run)
            .with_context(|| format!("start container {}", def.name))?;

        for network in def.networks.iter().skip(1) {
            self.runner
                .run_checked(&Invocation::new("docker").args(["network", "connect", *network, def.name]))
                .with_context(|| format!("attach {} to network {}", def.name, network))?;
        }

        info!(service = def.name, image = def.image, "container started");
        Ok(ProvisionResult::Started)
    }
}

/// `docker run` for a definition. Secret values travel in the client's
/// environment and are referenced by `-e NAME` only.
pub fn run_invocation(def: &ServiceDefinition, secrets: &SecretBundle) -> Result<Invocation> {
    let mut inv = Invocation::new("docker").args([
        "run",
        "--detach",
        "--name",
        def.name,
        "--restart",
        def.restart.as_arg(),
    ]);
    if let Some(network) = def.networks.first() {
        inv = inv.args(["--network", *network]);
    }
    for port in def.ports {
        inv = inv.args(["--publish".to_string(), port.publish_arg()]);
    }
    for volume in def.volumes {
        inv = inv.args(["--volume".to_string(), volume.mount_arg()]);
    }
    for binding in def.env {
        match binding {
            EnvBinding::Literal { var, value } => {
                inv = inv.args(["--env".to_string(), format!("{}={}", var, value)]);
            }
            EnvBinding::Secret { var, secret } => {
                let value = secrets
                    .require(secret)
                    .with_context(|| format!("service {} needs {}", def.name, var))?;
                inv = inv.args(["--env", *var]).env(var, value);
            }
        }
    }
    Ok(inv.arg(def.image))
}

/// Create a named volume; an existing one counts as success.
pub fn ensure_volume(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    let output = runner.run(&Invocation::new("docker").args(["volume", "create", name]))?;
    if output.success() || output.stderr.contains("already exists") {
        return Ok(());
    }
    anyhow::bail!("create volume {}: {}", name, output.diagnostics());
}

/// Create a network unless it is already present.
pub fn ensure_network(runner: &dyn CommandRunner, name: &str) -> Result<()> {
    if runner.succeeds(&Invocation::new("docker").args(["network", "inspect", name])) {
        return Ok(());
    }
    let output = runner.run(&Invocation::new("docker").args(["network", "create", name]))?;
    if output.success() || output.stderr.contains("already exists") {
        return Ok(());
    }
    anyhow::bail!("create network {}: {}", name, output.diagnostics());
}
