//! Network-filtering rule model.

use crate::models::service::Protocol;
use ipnetwork::IpNetwork;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceScope {
    Open,
    Restricted(IpNetwork),
}

impl fmt::Display for SourceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceScope::Open => write!(f, "anywhere"),
            SourceScope::Restricted(net) => write!(f, "{}", net),
        }
    }
}

impl Serialize for SourceScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    pub port: u16,
    pub protocol: Protocol,
    pub source: SourceScope,
    pub label: &'static str,
}

impl FirewallRule {
    pub fn open(port: u16, label: &'static str) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            source: SourceScope::Open,
            label,
        }
    }

    pub fn restricted(port: u16, scope: IpNetwork, label: &'static str) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            source: SourceScope::Restricted(scope),
            label,
        }
    }

    /// Arguments after `ufw` that install this rule.
    pub fn ufw_args(&self) -> Vec<String> {
        let mut args = vec!["allow".to_string()];
        match self.source {
            SourceScope::Open => {
                args.push(format!("{}/{}", self.port, self.protocol));
            }
            SourceScope::Restricted(net) => {
                args.extend([
                    "from".to_string(),
                    net.to_string(),
                    "to".to_string(),
                    "any".to_string(),
                    "port".to_string(),
                    self.port.to_string(),
                    "proto".to_string(),
                    self.protocol.to_string(),
                ]);
            }
        }
        args.push("comment".to_string());
        args.push(self.label.to_string());
        args
    }
}
