//! systemd unit and drop-in generation (pure) plus change-aware installation.

use crate::constants;
use crate::core::store;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Oneshot service that snapshots then prunes. Ordered after the container runtime
/// because the snapshot source lives in container-managed storage.
pub fn backup_service(binary: &Path, state_dir: &Path) -> String {
    let bin = binary.display();
    let state = state_dir.display();
    let mut out = String::new();
    out.push_str("[Unit]\n");
    out.push_str("Description=hostforge scheduled backup\n");
    out.push_str("Requires=docker.service\n");
    out.push_str("After=docker.service network-online.target\n");
    out.push_str("Wants=network-online.target\n");
    out.push_str("\n[Service]\n");
    out.push_str("Type=oneshot\n");
    out.push_str(&format!("ExecStart={} backup run --state-dir {}\n", bin, state));
    out.push_str(&format!("ExecStart={} backup prune --state-dir {}\n", bin, state));
    out.push_str("Nice=10\n");
    out.push_str("IOSchedulingClass=idle\n");
    out.push_str("PrivateTmp=yes\n");
    out.push_str("NoNewPrivileges=yes\n");
    out
}

/// Daily timer with randomized start; catches up after downtime.
pub fn backup_timer() -> String {
    let mut out = String::new();
    out.push_str("[Unit]\n");
    out.push_str("Description=Daily hostforge backup\n");
    out.push_str("\n[Timer]\n");
    out.push_str("OnCalendar=daily\n");
    out.push_str(&format!(
        "RandomizedDelaySec={}\n",
        constants::BACKUP_TIMER_JITTER
    ));
    out.push_str("Persistent=true\n");
    out.push_str(&format!(
        "Unit={}.service\n",
        constants::BACKUP_UNIT_NAME
    ));
    out.push_str("\n[Install]\n");
    out.push_str("WantedBy=timers.target\n");
    out
}

/// Drop-in moving a socket-activated unit to a different port.
pub fn listen_port_dropin(port: u16) -> String {
    // the empty assignment clears the vendor ListenStream
    format!("[Socket]\nListenStream=\nListenStream={}\n", port)
}

/// Write `content` to `path` unless identical. Returns whether the file changed.
pub fn install_if_changed(path: &Path, content: &str) -> Result<bool> {
    if path.is_file() {
        let current = fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        if current == content {
            return Ok(false);
        }
    }
    store::write_atomic(path, content.as_bytes(), constants::UNIT_FILE_MODE)?;
    Ok(true)
}
