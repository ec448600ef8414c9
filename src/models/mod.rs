//! Data structures shared across the crate.

pub mod backup;
pub mod config;
pub mod firewall;
pub mod inventory;
pub mod service;
