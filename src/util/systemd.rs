use crate::core::runner::{CommandRunner, Invocation};
use anyhow::{Context, Result};

fn systemctl<'a>(args: impl IntoIterator<Item = &'a str>) -> Invocation {
    Invocation::new("systemctl").args(args)
}

pub fn daemon_reload(runner: &dyn CommandRunner) -> Result<()> {
    runner
        .run_checked(&systemctl(["daemon-reload"]))
        .context("systemctl daemon-reload")?;
    Ok(())
}

pub fn enable_now(runner: &dyn CommandRunner, unit: &str) -> Result<()> {
    runner
        .run_checked(&systemctl(["enable", "--now", unit]))
        .with_context(|| format!("systemctl enable --now {}", unit))?;
    Ok(())
}

pub fn restart(runner: &dyn CommandRunner, unit: &str) -> Result<()> {
    runner
        .run_checked(&systemctl(["restart", unit]))
        .with_context(|| format!("systemctl restart {}", unit))?;
    Ok(())
}

pub fn is_enabled(runner: &dyn CommandRunner, unit: &str) -> bool {
    runner.succeeds(&systemctl(["is-enabled", "--quiet", unit]))
}

pub fn is_active(runner: &dyn CommandRunner, unit: &str) -> bool {
    runner.succeeds(&systemctl(["is-active", "--quiet", unit]))
}
