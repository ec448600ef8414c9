//! Effective-uid checks for commands that change the host.

use anyhow::{bail, Result};

pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Bail unless running as root.
pub fn require_root(action: &str) -> Result<()> {
    if !is_root() {
        bail!("'{}' changes the host and requires root privileges. Run with sudo.", action);
    }
    Ok(())
}

/// Host name used when no domain is configured.
pub fn hostname() -> Option<String> {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.trim().is_empty())
}
