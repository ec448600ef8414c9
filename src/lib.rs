//! Single-host service platform provisioner.
//!
//! Turns a fresh Debian/Ubuntu machine into a small self-managed platform:
//! generated credentials, a container runtime, a fixed catalogue of services,
//! a deterministic firewall, scheduled encrypted backups, and an inventory of
//! what was deployed. Every step is idempotent; re-running resumes.
//!
//! ## Modules
//! - `cli`: Command-line handlers
//! - `core`: Pipeline, components, and persistence
//! - `models`: Data structures
//! - `util`: Host utilities (fs, systemd, journald)

pub mod cli;
pub mod constants;
pub mod core;
pub mod logging;
pub mod models;
pub mod util;
