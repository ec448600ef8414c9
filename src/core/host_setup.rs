//! Host-level prerequisites: base packages, the container runtime, and the
//! optional accelerator toolkit and admin panel.
//!
//! Each `ensure_*` checks current state first and only changes what is missing.

use crate::constants;
use crate::core::orchestrator::StepOutcome;
use crate::core::retry::RetryExecutor;
use crate::core::runner::{CommandRunner, Invocation};
use crate::core::units;
use crate::util::systemd;
use anyhow::{bail, Context, Result};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

/// Filesystem locations the host setup writes to.
#[derive(Debug, Clone)]
pub struct HostLayout {
    pub os_release: PathBuf,
    pub apt_keyrings: PathBuf,
    pub apt_sources: PathBuf,
    pub unit_dir: PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
            apt_keyrings: PathBuf::from(constants::APT_KEYRING_DIR),
            apt_sources: PathBuf::from(constants::APT_SOURCES_DIR),
            unit_dir: PathBuf::from(constants::SYSTEMD_UNIT_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub codename: String,
}

/// Parse the `ID` and `VERSION_CODENAME` keys of os-release(5).
pub fn parse_os_release(content: &str) -> Result<OsRelease> {
    let mut id = None;
    let mut codename = None;
    let mut ubuntu_codename = None;
    for line in content.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key {
            "ID" => id = Some(value),
            "VERSION_CODENAME" if !value.is_empty() => codename = Some(value),
            "UBUNTU_CODENAME" if !value.is_empty() => ubuntu_codename = Some(value),
            _ => {}
        }
    }
    let id = id.context("os-release has no ID")?;
    let codename = codename
        .or(ubuntu_codename)
        .context("os-release has no VERSION_CODENAME")?;
    if id != "ubuntu" && id != "debian" {
        bail!("unsupported distribution '{}' (ubuntu or debian required)", id);
    }
    Ok(OsRelease { id, codename })
}

/// A third-party apt repository: signing key plus source list.
struct AptRepository {
    name: &'static str,
    key_url: String,
    source_line: String,
}

pub struct HostSetup<'a> {
    runner: &'a dyn CommandRunner,
    retry: &'a RetryExecutor<'a>,
    layout: HostLayout,
}

impl<'a> HostSetup<'a> {
    pub fn new(runner: &'a dyn CommandRunner, retry: &'a RetryExecutor<'a>, layout: HostLayout) -> Self {
        Self {
            runner,
            retry,
            layout,
        }
    }

    fn apt(&self, args: &[&str]) -> Invocation {
        Invocation::new("apt-get")
            .args(["-q", "-y"])
            .args(args.iter().copied())
            .env("DEBIAN_FRONTEND", "noninteractive")
    }

    fn refresh_index(&self) -> Result<()> {
        self.retry.run("package index refresh", |_| {
            self.runner.run_checked(&self.apt(&["update"]))
        })?;
        Ok(())
    }

    fn install(&self, packages: &[&str]) -> Result<()> {
        let mut args = vec!["install", "--no-install-recommends"];
        args.extend_from_slice(packages);
        self.retry
            .run(&format!("install {}", packages.join(" ")), |_| {
                self.runner.run_checked(&self.apt(&args))
            })?;
        Ok(())
    }

    pub fn is_installed(&self, package: &str) -> bool {
        let query = Invocation::new("dpkg-query").args(["-W", "-f=${Status}", package]);
        match self.runner.run(&query) {
            Ok(out) => out.success() && out.stdout.contains("install ok installed"),
            Err(_) => false,
        }
    }

    fn missing<'p>(&self, packages: &[&'p str]) -> Vec<&'p str> {
        packages
            .iter()
            .copied()
            .filter(|p| !self.is_installed(p))
            .collect()
    }

    /// Refresh the package index and install the base toolset.
    pub fn ensure_basics(&self) -> Result<StepOutcome> {
        let missing = self.missing(constants::BASE_PACKAGES);
        if missing.is_empty() {
            return Ok(StepOutcome::Satisfied("base packages already installed".into()));
        }
        info!(packages = %missing.join(","), "installing base packages");
        self.refresh_index()?;
        self.install(&missing)?;
        Ok(StepOutcome::Satisfied(format!("installed {}", missing.join(", "))))
    }

    fn os_release(&self) -> Result<OsRelease> {
        let content = fs::read_to_string(&self.layout.os_release)
            .with_context(|| format!("read {}", self.layout.os_release.display()))?;
        parse_os_release(&content)
    }

    fn architecture(&self) -> Result<String> {
        let out = self
            .runner
            .run_checked(&Invocation::new("dpkg").arg("--print-architecture"))?;
        let arch = out.stdout.trim().to_string();
        if arch.is_empty() {
            bail!("dpkg reported no architecture");
        }
        Ok(arch)
    }

    fn key_path(&self, repo: &AptRepository) -> PathBuf {
        self.layout.apt_keyrings.join(format!("{}.asc", repo.name))
    }

    /// Fetch the signing key (once) and register the source list. Returns whether anything changed.
    fn ensure_repository(&self, repo: &AptRepository) -> Result<bool> {
        crate::util::fs::ensure_dir(&self.layout.apt_keyrings, 0o755)?;
        let key_path = self.key_path(repo);
        let mut changed = false;
        if !key_path.is_file() {
            let fetch = Invocation::new("curl").args([
                "-fsSL".to_string(),
                repo.key_url.clone(),
                "-o".to_string(),
                key_path.display().to_string(),
            ]);
            self.retry
                .run(&format!("{} signing key retrieval", repo.name), |_| {
                    self.runner.run_checked(&fetch)
                })?;
            changed = true;
        }
        let list_path = self.layout.apt_sources.join(format!("{}.list", repo.name));
        let content = format!("{}\n", repo.source_line);
        if units::install_if_changed(&list_path, &content)? {
            changed = true;
        }
        Ok(changed)
    }

    fn docker_repository(&self) -> Result<AptRepository> {
        let os = self.os_release()?;
        let arch = self.architecture()?;
        let key_path = self.layout.apt_keyrings.join("docker.asc");
        Ok(AptRepository {
            name: "docker",
            key_url: format!("https://download.docker.com/linux/{}/gpg", os.id),
            source_line: format!(
                "deb [arch={} signed-by={}] https://download.docker.com/linux/{} {} stable",
                arch,
                key_path.display(),
                os.id,
                os.codename
            ),
        })
    }

    fn runtime_up(&self) -> bool {
        self.runner.succeeds(&Invocation::new("docker").arg("info"))
    }

    /// Install and start the container runtime. Every later service step depends on it.
    pub fn ensure_container_runtime(&self) -> Result<StepOutcome> {
        if self.runtime_up() {
            return Ok(StepOutcome::Satisfied("container runtime already running".into()));
        }

        let binary_present = self
            .runner
            .succeeds(&Invocation::new("docker").arg("--version"));
        if !binary_present {
            let repo = self.docker_repository()?;
            self.ensure_repository(&repo)?;
            self.refresh_index()?;
            self.install(constants::RUNTIME_PACKAGES)?;
        }

        systemd::enable_now(self.runner, "docker.service")?;
        if !self.runtime_up() {
            bail!("container runtime installed but `docker info` still fails");
        }
        let detail = if binary_present {
            "started existing container runtime"
        } else {
            "installed container runtime"
        };
        Ok(StepOutcome::Satisfied(detail.into()))
    }

    /// GPU driver and container toolkit. Best-effort: the caller treats errors as warnings.
    pub fn ensure_accelerator(&self) -> Result<StepOutcome> {
        let driver_loaded = self.runner.succeeds(&Invocation::new("nvidia-smi"));
        let toolkit_present = self
            .runner
            .succeeds(&Invocation::new("nvidia-ctk").arg("--version"));
        if driver_loaded && toolkit_present {
            return Ok(StepOutcome::Satisfied("accelerator driver and toolkit present".into()));
        }

        let mut reboot_needed = false;
        if !driver_loaded {
            if !self.is_installed("ubuntu-drivers-common") {
                self.refresh_index()?;
                self.install(&["ubuntu-drivers-common"])?;
            }
            self.retry.run("accelerator driver install", |_| {
                self.runner
                    .run_checked(&Invocation::new("ubuntu-drivers").arg("install"))
            })?;
            reboot_needed = true;
        }

        if !toolkit_present {
            let arch = self.architecture()?;
            let key_path = self.layout.apt_keyrings.join("nvidia-container-toolkit.asc");
            let repo = AptRepository {
                name: "nvidia-container-toolkit",
                key_url: "https://nvidia.github.io/libnvidia-container/gpgkey".into(),
                source_line: format!(
                    "deb [signed-by={}] https://nvidia.github.io/libnvidia-container/stable/deb/{} /",
                    key_path.display(),
                    arch
                ),
            };
            self.ensure_repository(&repo)?;
            self.refresh_index()?;
            self.install(&["nvidia-container-toolkit"])?;
            self.runner
                .run_checked(&Invocation::new("nvidia-ctk").args(["runtime", "configure", "--runtime=docker"]))
                .context("register accelerator runtime with docker")?;
            systemd::restart(self.runner, "docker.service")?;
        }

        if reboot_needed {
            warn!("accelerator driver installed; a reboot is required before GPUs are usable");
            return Ok(StepOutcome::Warned(
                "accelerator driver installed; reboot required".into(),
            ));
        }
        Ok(StepOutcome::Satisfied("accelerator toolkit configured".into()))
    }

    /// Host-admin panel (cockpit) moved to its dedicated port.
    pub fn ensure_admin_panel(&self) -> Result<StepOutcome> {
        let mut changed = false;
        if !self.is_installed("cockpit") {
            self.refresh_index()?;
            self.install(&["cockpit"])?;
            changed = true;
        }

        let dropin = self.layout.unit_dir.join("cockpit.socket.d").join("listen.conf");
        let port_changed =
            units::install_if_changed(&dropin, &units::listen_port_dropin(constants::PORT_ADMIN_PANEL))?;
        if port_changed {
            systemd::daemon_reload(self.runner)?;
            changed = true;
        }

        if !systemd::is_enabled(self.runner, "cockpit.socket") {
            systemd::enable_now(self.runner, "cockpit.socket")?;
            changed = true;
        } else if port_changed {
            systemd::restart(self.runner, "cockpit.socket")?;
        }

        Ok(StepOutcome::Satisfied(if changed {
            format!("admin panel listening on {}", constants::PORT_ADMIN_PANEL)
        } else {
            "admin panel already configured".into()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::fake::RecordingSleeper;
    use crate::core::retry::RetryPolicy;
    use crate::core::runner::fake::FakeRunner;
    use crate::core::runner::CommandOutput;
    use std::time::Duration;
    use tempfile::TempDir;

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\nVERSION_CODENAME=noble\nUBUNTU_CODENAME=noble\n";

    fn layout(dir: &TempDir) -> HostLayout {
        let os_release = dir.path().join("os-release");
        fs::write(&os_release, UBUNTU).unwrap();
        HostLayout {
            os_release,
            apt_keyrings: dir.path().join("keyrings"),
            apt_sources: dir.path().join("sources.list.d"),
            unit_dir: dir.path().join("units"),
        }
    }

    #[test]
    fn test_parse_os_release() {
        let os = parse_os_release(UBUNTU).unwrap();
        assert_eq!(os.id, "ubuntu");
        assert_eq!(os.codename, "noble");

        let debian = parse_os_release("ID=\"debian\"\nVERSION_CODENAME=bookworm\n").unwrap();
        assert_eq!(debian.codename, "bookworm");

        assert!(parse_os_release("ID=fedora\nVERSION_CODENAME=x\n").is_err());
        assert!(parse_os_release("ID=ubuntu\n").is_err());
    }

    #[test]
    fn test_basics_satisfied_when_installed() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.respond("dpkg-query", vec![CommandOutput::ok("install ok installed")]);
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let host = HostSetup::new(&runner, &retry, layout(&dir));

        let outcome = host.ensure_basics().unwrap();
        assert!(matches!(outcome, StepOutcome::Satisfied(_)));
        assert_eq!(runner.count("apt-get"), 0);
    }

    #[test]
    fn test_unreachable_mirror_fails_after_three_attempts() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail("dpkg-query");
        runner.fail("apt-get -q -y update");
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let host = HostSetup::new(&runner, &retry, layout(&dir));

        let err = host.ensure_basics().unwrap_err();
        assert!(err.to_string().contains("package index refresh failed after 3 attempt(s)"));
        assert_eq!(runner.count("apt-get -q -y update"), 3);
        assert_eq!(runner.count("apt-get -q -y install"), 0);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(5); 2]);
    }

    #[test]
    fn test_apt_runs_noninteractive() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail("dpkg-query");
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        HostSetup::new(&runner, &retry, layout(&dir))
            .ensure_basics()
            .unwrap();
        let install = runner
            .calls()
            .into_iter()
            .find(|c| c.command_line().starts_with("apt-get -q -y install"))
            .unwrap();
        assert!(install.command_line().ends_with("ca-certificates curl gnupg ufw restic"));
        assert_eq!(install.env_keys().collect::<Vec<_>>(), vec!["DEBIAN_FRONTEND"]);
    }

    #[test]
    fn test_runtime_already_running_is_noop() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let outcome = HostSetup::new(&runner, &retry, layout(&dir))
            .ensure_container_runtime()
            .unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Satisfied("container runtime already running".into())
        );
        assert_eq!(runner.lines(), vec!["docker info"]);
    }

    #[test]
    fn test_runtime_install_registers_repository() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let runner = FakeRunner::new();
        runner.respond(
            "docker info",
            vec![CommandOutput::failed(1, "cannot connect"), CommandOutput::ok("ok")],
        );
        runner.fail("docker --version");
        runner.respond("dpkg --print-architecture", vec![CommandOutput::ok("amd64\n")]);
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);

        let outcome = HostSetup::new(&runner, &retry, layout.clone())
            .ensure_container_runtime()
            .unwrap();
        assert_eq!(outcome, StepOutcome::Satisfied("installed container runtime".into()));

        let list = fs::read_to_string(layout.apt_sources.join("docker.list")).unwrap();
        assert!(list.starts_with("deb [arch=amd64 signed-by="));
        assert!(list.contains("https://download.docker.com/linux/ubuntu noble stable"));
        assert_eq!(runner.count("curl -fsSL https://download.docker.com/linux/ubuntu/gpg"), 1);
        assert_eq!(runner.count("apt-get -q -y install --no-install-recommends docker-ce"), 1);
        assert_eq!(runner.count("systemctl enable --now docker.service"), 1);
    }

    #[test]
    fn test_runtime_still_down_is_error() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail("docker info");
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let err = HostSetup::new(&runner, &retry, layout(&dir))
            .ensure_container_runtime()
            .unwrap_err();
        assert!(err.to_string().contains("docker info"));
    }

    #[test]
    fn test_admin_panel_second_run_is_noop() {
        let dir = TempDir::new().unwrap();
        let layout = layout(&dir);
        let runner = FakeRunner::new();
        runner.respond("dpkg-query", vec![CommandOutput::ok("install ok installed")]);
        runner.respond(
            "systemctl is-enabled",
            vec![CommandOutput::failed(1, ""), CommandOutput::ok("")],
        );
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let host = HostSetup::new(&runner, &retry, layout.clone());

        host.ensure_admin_panel().unwrap();
        let dropin = fs::read_to_string(layout.unit_dir.join("cockpit.socket.d/listen.conf")).unwrap();
        assert!(dropin.contains("ListenStream=9200"));

        let second = host.ensure_admin_panel().unwrap();
        assert_eq!(second, StepOutcome::Satisfied("admin panel already configured".into()));
        assert_eq!(runner.count("systemctl enable --now cockpit.socket"), 1);
        assert_eq!(runner.count("systemctl daemon-reload"), 1);
    }

    #[test]
    fn test_accelerator_warns_when_reboot_needed() {
        let dir = TempDir::new().unwrap();
        let runner = FakeRunner::new();
        runner.fail("nvidia-smi");
        runner.respond("dpkg-query", vec![CommandOutput::ok("install ok installed")]);
        let sleeper = RecordingSleeper::new();
        let retry = RetryExecutor::new(RetryPolicy::default(), &sleeper);
        let outcome = HostSetup::new(&runner, &retry, layout(&dir))
            .ensure_accelerator()
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Warned(_)));
        assert_eq!(runner.count("ubuntu-drivers install"), 1);
    }
}
