//! Best-effort forwarding of run summaries to journald via `systemd-cat`.
//!
//! A missing or failing `systemd-cat` never fails the caller.

use crate::core::runner::{CommandRunner, Invocation};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Info,
    Warning,
}

impl Priority {
    fn as_arg(self) -> &'static str {
        match self {
            Priority::Info => "info",
            Priority::Warning => "warning",
        }
    }
}

/// `systemd-cat` runs `echo` and journals its output under `tag`.
pub fn invocation(tag: &str, priority: Priority, line: &str) -> Invocation {
    Invocation::new("systemd-cat")
        .args(["-t", tag, "-p", priority.as_arg(), "echo", line])
}

pub fn forward(runner: &dyn CommandRunner, tag: &str, priority: Priority, line: &str) {
    match runner.run(&invocation(tag, priority, line)) {
        Ok(out) if out.success() => {}
        Ok(out) => debug!(code = ?out.code, "journald forward failed"),
        Err(e) => debug!(error = %e, "systemd-cat unavailable"),
    }
}
