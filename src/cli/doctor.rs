//! Readiness diagnostics for provisioning and the backup schedule.

use crate::cli::CliContext;
use crate::constants;
use crate::core::runner::{is_available, CommandRunner, Invocation};
use crate::util::fs::mode_of;
use crate::util::{privilege, systemd};
use anyhow::Result;
use clap::Args;
use std::path::Path;

#[derive(Args, Debug)]
pub struct DoctorArgs {
    /// Skip checks that talk to the container runtime
    #[arg(long)]
    pub offline: bool,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Tally {
    ok: u32,
    warn: u32,
    fail: u32,
}

impl Tally {
    fn pass(&mut self, msg: impl AsRef<str>) {
        println!("  [PASS] {}", msg.as_ref());
        self.ok += 1;
    }

    fn warn(&mut self, msg: impl AsRef<str>) {
        println!("  [WARN] {}", msg.as_ref());
        self.warn += 1;
    }

    fn fail(&mut self, msg: impl AsRef<str>) {
        println!("  [FAIL] {}", msg.as_ref());
        self.fail += 1;
    }
}

fn check_mode(tally: &mut Tally, label: &str, path: &Path, expected: u32) {
    match mode_of(path) {
        Some(mode) if mode == expected => tally.pass(format!("{} mode ok: {:04o}", label, mode)),
        Some(mode) => tally.fail(format!(
            "{} mode: {:04o} (expected {:04o}): {}",
            label,
            mode,
            expected,
            path.display()
        )),
        None => tally.warn(format!("{} not readable: {}", label, path.display())),
    }
}

fn check_tools(tally: &mut Tally, runner: &dyn CommandRunner) {
    for tool in ["docker", "ufw", "restic", "systemctl", "apt-get"] {
        if is_available(runner, tool) {
            tally.pass(format!("{} available", tool));
        } else if tool == "systemctl" || tool == "apt-get" {
            tally.fail(format!("{} not found on PATH (a systemd Debian/Ubuntu host is required)", tool));
        } else {
            tally.warn(format!("{} not found on PATH (provisioning installs it)", tool));
        }
    }
}

fn check_timer(tally: &mut Tally, runner: &dyn CommandRunner) {
    let timer = format!("{}.timer", constants::BACKUP_UNIT_NAME);
    match (systemd::is_enabled(runner, &timer), systemd::is_active(runner, &timer)) {
        (true, true) => tally.pass(format!("{} enabled and active", timer)),
        (true, false) => tally.warn(format!(
            "{} enabled but not active; start it with `systemctl start {}`",
            timer, timer
        )),
        (false, _) => tally.warn(format!("{} not enabled; backups are not scheduled", timer)),
    }
}

pub fn run(ctx: &CliContext, args: DoctorArgs) -> Result<()> {
    let paths = &ctx.paths;
    let runner = &ctx.runner;
    let mut tally = Tally::default();

    println!("Doctor: {}", paths);

    if privilege::is_root() {
        tally.pass("running as root");
    } else {
        tally.warn("not running as root; provisioning and backups need sudo");
    }

    if paths.root.is_dir() {
        tally.pass(format!("state directory exists: {}", paths.root.display()));
        check_mode(&mut tally, "state directory", &paths.root, constants::STATE_DIR_MODE);
    } else {
        tally.warn(format!(
            "state directory missing: {} (created on first run)",
            paths.root.display()
        ));
    }

    for (label, path) in [
        ("secrets file", &paths.secrets),
        ("backup config", &paths.backup_config),
        ("inventory", &paths.inventory),
    ] {
        if path.is_file() {
            check_mode(&mut tally, label, path, constants::STATE_FILE_MODE);
        } else {
            tally.warn(format!("{} missing: {}", label, path.display()));
        }
    }

    check_tools(&mut tally, runner);

    if !args.offline {
        if runner.succeeds(&Invocation::new("docker").arg("info")) {
            tally.pass("container runtime reachable");
        } else {
            tally.warn("container runtime not reachable (`docker info` failed)");
        }
    }

    check_timer(&mut tally, runner);

    println!();
    println!(
        "Doctor summary: {} pass, {} warn, {} fail",
        tally.ok, tally.warn, tally.fail
    );
    if tally.fail > 0 {
        std::process::exit(1);
    }
    Ok(())
}
