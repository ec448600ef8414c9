//! Host utilities: filesystem modes, privileges, journald, systemctl.

pub mod fs;
pub mod journald;
pub mod privilege;
pub mod systemd;
