//! Provisioning logic: the step pipeline and the components it sequences.

pub mod backup;
pub mod catalogue;
pub mod file_lock;
pub mod firewall;
pub mod history;
pub mod host_setup;
pub mod inventory;
pub mod orchestrator;
pub mod paths;
pub mod provision;
pub mod provisioner;
pub mod retention;
pub mod retry;
pub mod runner;
pub mod secret_store;
pub mod store;
pub mod units;
