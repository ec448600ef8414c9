//! The fixed set of services deployed on every host.
//!
//! Adding a service is a data change here; the provisioning routine is generic.

use crate::constants::{self, PLATFORM_NETWORK};
use crate::models::service::{
    Access, CredentialRef, EnvBinding, PortMapping, RestartPolicy, Scheme, ServiceDefinition,
    ServiceGroup, VolumeMount,
};

pub const SECRET_POSTGRES: &str = "postgres_password";
pub const SECRET_CODE_SERVER: &str = "code_server_password";
pub const SECRET_GRAFANA: &str = "grafana_admin_password";

const NETWORKS: &[&str] = &[PLATFORM_NETWORK];

pub const CATALOGUE: &[ServiceDefinition] = &[
    ServiceDefinition {
        name: "nginx-proxy-manager",
        description: "Reverse proxy and TLS certificate admin UI",
        image: "jc21/nginx-proxy-manager:latest",
        ports: &[
            PortMapping::tcp(constants::PORT_HTTP, 80),
            PortMapping::tcp(constants::PORT_HTTPS, 443),
            PortMapping::tcp(constants::PORT_PROXY_ADMIN, 81),
        ],
        volumes: &[
            VolumeMount::new("npm_data", "/data"),
            VolumeMount::new("npm_letsencrypt", "/etc/letsencrypt"),
        ],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[],
        group: ServiceGroup::Core,
        access: Access::Web {
            scheme: Scheme::Http,
            port: constants::PORT_PROXY_ADMIN,
        },
        credential: CredentialRef::DefaultLogin("admin@example.com / changeme"),
    },
    ServiceDefinition {
        name: "portainer",
        description: "Container management console",
        image: "portainer/portainer-ce:latest",
        ports: &[PortMapping::tcp(constants::PORT_CONTAINER_CONSOLE, 9443)],
        volumes: &[
            VolumeMount::new("portainer_data", "/data"),
            VolumeMount::new("/var/run/docker.sock", "/var/run/docker.sock"),
        ],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[],
        group: ServiceGroup::Core,
        access: Access::Web {
            scheme: Scheme::Https,
            port: constants::PORT_CONTAINER_CONSOLE,
        },
        credential: CredentialRef::SetOnFirstLogin,
    },
    ServiceDefinition {
        name: "postgres",
        description: "Relational database",
        image: "postgres:16-alpine",
        ports: &[],
        volumes: &[VolumeMount::new("postgres_data", "/var/lib/postgresql/data")],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[
            EnvBinding::Literal {
                var: "POSTGRES_USER",
                value: "platform",
            },
            EnvBinding::Secret {
                var: "POSTGRES_PASSWORD",
                secret: SECRET_POSTGRES,
            },
        ],
        group: ServiceGroup::Core,
        access: Access::Internal { port: 5432 },
        credential: CredentialRef::Secret(SECRET_POSTGRES),
    },
    ServiceDefinition {
        name: "code-server",
        description: "Browser-based development environment",
        image: "codercom/code-server:latest",
        ports: &[PortMapping::tcp(constants::PORT_DEV_ENVIRONMENT, 8080)],
        volumes: &[VolumeMount::new("code_server_home", "/home/coder")],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[EnvBinding::Secret {
            var: "PASSWORD",
            secret: SECRET_CODE_SERVER,
        }],
        group: ServiceGroup::Core,
        access: Access::Web {
            scheme: Scheme::Http,
            port: constants::PORT_DEV_ENVIRONMENT,
        },
        credential: CredentialRef::Secret(SECRET_CODE_SERVER),
    },
    ServiceDefinition {
        name: "prometheus",
        description: "Metrics collector",
        image: "prom/prometheus:latest",
        ports: &[PortMapping::tcp(constants::PORT_METRICS_COLLECTOR, 9090)],
        volumes: &[VolumeMount::new("prometheus_data", "/prometheus")],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[],
        group: ServiceGroup::Monitoring,
        access: Access::Web {
            scheme: Scheme::Http,
            port: constants::PORT_METRICS_COLLECTOR,
        },
        credential: CredentialRef::None,
    },
    ServiceDefinition {
        name: "grafana",
        description: "Metrics dashboard",
        image: "grafana/grafana:latest",
        ports: &[PortMapping::tcp(constants::PORT_METRICS_DASHBOARD, 3000)],
        volumes: &[VolumeMount::new("grafana_data", "/var/lib/grafana")],
        networks: NETWORKS,
        restart: RestartPolicy::Always,
        env: &[
            EnvBinding::Literal {
                var: "GF_SECURITY_ADMIN_USER",
                value: "admin",
            },
            EnvBinding::Secret {
                var: "GF_SECURITY_ADMIN_PASSWORD",
                secret: SECRET_GRAFANA,
            },
        ],
        group: ServiceGroup::Monitoring,
        access: Access::Web {
            scheme: Scheme::Http,
            port: constants::PORT_METRICS_DASHBOARD,
        },
        credential: CredentialRef::Secret(SECRET_GRAFANA),
    },
];

/// Services to deploy, in order.
pub fn selected(skip_monitoring: bool) -> Vec<&'static ServiceDefinition> {
    CATALOGUE
        .iter()
        .filter(|def| !(skip_monitoring && def.group == ServiceGroup::Monitoring))
        .collect()
}

/// Every secret the installation needs, sorted and unique.
///
/// Computed over the whole catalogue so skipping monitoring now does not
/// force a secret to be added later.
pub fn required_secrets() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = CATALOGUE
        .iter()
        .flat_map(|def| def.secret_names())
        .chain(std::iter::once(constants::BACKUP_PASSPHRASE_SECRET))
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_unique() {
        let names: HashSet<_> = CATALOGUE.iter().map(|d| d.name).collect();
        assert_eq!(names.len(), CATALOGUE.len());
    }

    #[test]
    fn test_host_ports_unique() {
        let mut seen = HashSet::new();
        for def in CATALOGUE {
            for port in def.ports {
                assert!(seen.insert(port.host), "host port {} used twice", port.host);
            }
        }
        assert!(!seen.contains(&constants::PORT_ADMIN_PANEL));
    }

    #[test]
    fn test_skip_monitoring_drops_group() {
        let all = selected(false);
        let core = selected(true);
        assert_eq!(all.len(), CATALOGUE.len());
        assert!(core.iter().all(|d| d.group == ServiceGroup::Core));
        assert!(!core.iter().any(|d| d.name == "grafana"));
    }

    #[test]
    fn test_required_secrets() {
        assert_eq!(
            required_secrets(),
            vec![
                "backup_passphrase",
                "code_server_password",
                "grafana_admin_password",
                "postgres_password"
            ]
        );
    }

    #[test]
    fn test_secret_credentials_are_bound() {
        for def in CATALOGUE {
            if let CredentialRef::Secret(name) = def.credential {
                assert!(def.secret_names().any(|s| s == name), "{} does not bind {}", def.name, name);
            }
        }
    }
}
