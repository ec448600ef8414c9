//! Declarative description of a containerized service.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub const fn tcp(host: u16, container: u16) -> Self {
        Self {
            host,
            container,
            protocol: Protocol::Tcp,
        }
    }

    /// Argument for `docker run -p`.
    pub fn publish_arg(&self) -> String {
        format!("{}:{}/{}", self.host, self.container, self.protocol)
    }
}

/// A volume attached to a container.
///
/// A `source` starting with `/` is a host bind mount; anything else is a
/// named volume owned by the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: &'static str,
    pub target: &'static str,
}

impl VolumeMount {
    pub const fn new(source: &'static str, target: &'static str) -> Self {
        Self { source, target }
    }

    pub fn is_named(&self) -> bool {
        !self.source.starts_with('/')
    }

    pub fn mount_arg(&self) -> String {
        format!("{}:{}", self.source, self.target)
    }
}

/// Environment variable bound into a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvBinding {
    /// Value looked up in the secret bundle by name at start time.
    Secret {
        var: &'static str,
        secret: &'static str,
    },
    /// Non-credential setting.
    Literal {
        var: &'static str,
        value: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Always,
}

impl RestartPolicy {
    pub fn as_arg(&self) -> &'static str {
        match self {
            RestartPolicy::Always => "always",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceGroup {
    Core,
    /// Omitted when monitoring is skipped.
    Monitoring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

/// How an operator reaches the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Web { scheme: Scheme, port: u16 },
    /// Reachable only from containers on the platform network.
    Internal { port: u16 },
}

/// What an operator logs in with. Never a literal secret value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialRef {
    Secret(&'static str),
    /// Image ships a well-known login that must be rotated.
    DefaultLogin(&'static str),
    SetOnFirstLogin,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub image: &'static str,
    pub ports: &'static [PortMapping],
    pub volumes: &'static [VolumeMount],
    pub networks: &'static [&'static str],
    pub restart: RestartPolicy,
    pub env: &'static [EnvBinding],
    pub group: ServiceGroup,
    pub access: Access,
    pub credential: CredentialRef,
}

impl ServiceDefinition {
    /// Names of the secrets this service needs at start time.
    pub fn secret_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.env.iter().filter_map(|binding| match binding {
            EnvBinding::Secret { secret, .. } => Some(*secret),
            EnvBinding::Literal { .. } => None,
        })
    }

    pub fn named_volumes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.volumes.iter().filter(|v| v.is_named()).map(|v| v.source)
    }
}
