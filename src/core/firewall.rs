//! Deterministic packet-filter policy.
//!
//! The rule set is derived from configuration alone and applied by resetting
//! the filter and rebuilding it; prior rules are never inspected.

use crate::constants;
use crate::core::orchestrator::StepOutcome;
use crate::core::runner::{CommandRunner, Invocation};
use crate::models::firewall::FirewallRule;
use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirewallConfig {
    pub trusted_scope: Option<IpNetwork>,
    pub panel_enabled: bool,
}

pub const PANEL_WARNING: &str =
    "admin panel port 9200 is open to all sources; it is not limited to the trusted scope";

/// Administrative ports reachable only from the trusted scope.
const SCOPED: &[(u16, &str)] = &[
    (constants::PORT_SSH, "ssh (trusted)"),
    (constants::PORT_CONTAINER_CONSOLE, "container console"),
    (constants::PORT_DEV_ENVIRONMENT, "dev environment"),
    (constants::PORT_METRICS_DASHBOARD, "metrics dashboard"),
    (constants::PORT_METRICS_COLLECTOR, "metrics collector"),
    (constants::PORT_PROXY_ADMIN, "proxy admin"),
];

/// The complete rule set for `config`.
pub fn derive(config: &FirewallConfig) -> Vec<FirewallRule> {
    let mut rules = vec![
        FirewallRule::open(constants::PORT_SSH, "ssh"),
        FirewallRule::open(constants::PORT_HTTP, "http"),
        FirewallRule::open(constants::PORT_HTTPS, "https"),
    ];
    if let Some(scope) = config.trusted_scope {
        rules.extend(
            SCOPED
                .iter()
                .map(|(port, label)| FirewallRule::restricted(*port, scope, label)),
        );
    }
    if config.panel_enabled {
        rules.push(FirewallRule::open(constants::PORT_ADMIN_PANEL, "admin panel"));
    }
    rules
}

fn ufw<I, S>(args: I) -> Invocation
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Invocation::new("ufw").args(args)
}

/// Every `ufw` invocation, in order, that installs `rules` from scratch.
pub fn commands(rules: &[FirewallRule]) -> Vec<Invocation> {
    let mut cmds = vec![
        ufw(["--force", "reset"]),
        ufw(["default", "deny", "incoming"]),
        ufw(["default", "allow", "outgoing"]),
    ];
    cmds.extend(rules.iter().map(|rule| ufw(rule.ufw_args())));
    cmds.push(ufw(["--force", "enable"]));
    cmds
}

pub struct FirewallConfigurator<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> FirewallConfigurator<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Reset and rebuild the filter. A rebuild that fails part-way is retried
    /// once; if it fails again the filter is left enabled with inbound ssh only.
    pub fn apply(&self, config: &FirewallConfig) -> Result<StepOutcome> {
        let rules = derive(config);
        if let Err(first) = self.rebuild(&rules) {
            warn!(error = %format!("{:#}", first), "firewall rebuild failed, retrying once");
            if let Err(second) = self.rebuild(&rules) {
                error!(error = %format!("{:#}", second), "firewall rebuild failed again");
                let fallback = [FirewallRule::open(constants::PORT_SSH, "ssh")];
                return Err(match self.rebuild(&fallback) {
                    Ok(()) => second.context("firewall rebuild failed; fell back to an ssh-only policy"),
                    Err(e) => e.context("firewall rebuild and ssh-only fallback failed; the filter may be disabled"),
                });
            }
        }
        info!(rules = rules.len(), "firewall rules applied");

        let scope = match config.trusted_scope {
            Some(net) => format!("admin ports limited to {}", net),
            None => "no trusted scope, admin ports closed".to_string(),
        };
        if config.panel_enabled {
            warn!("{}", PANEL_WARNING);
            return Ok(StepOutcome::Warned(format!(
                "{} rules, {}; {}",
                rules.len(),
                scope,
                PANEL_WARNING
            )));
        }
        Ok(StepOutcome::Satisfied(format!("{} rules, {}", rules.len(), scope)))
    }

    fn rebuild(&self, rules: &[FirewallRule]) -> Result<()> {
        for cmd in commands(rules) {
            self.runner
                .run_checked(&cmd)
                .with_context(|| format!("firewall: {}", cmd.command_line()))?;
        }
        Ok(())
    }
}

/// Parse a CIDR and normalize it to its network address (`10.0.0.7/24` → `10.0.0.0/24`).
pub fn parse_scope(raw: &str) -> Result<IpNetwork> {
    let net: IpNetwork = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid trusted scope '{}': expected CIDR like 10.0.0.0/24", raw))?;
    let normalized = IpNetwork::new(net.network(), net.prefix())
        .with_context(|| format!("invalid trusted scope '{}'", raw))?;
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::fake::FakeRunner;
    use crate::core::runner::CommandOutput;
    use crate::models::firewall::SourceScope;
    use std::collections::BTreeSet;

    fn scope() -> IpNetwork {
        "10.0.0.0/24".parse().unwrap()
    }

    fn summary(rules: &[FirewallRule]) -> (BTreeSet<u16>, BTreeSet<u16>) {
        let mut open = BTreeSet::new();
        let mut restricted = BTreeSet::new();
        for rule in rules {
            match rule.source {
                SourceScope::Open => open.insert(rule.port),
                SourceScope::Restricted(net) => {
                    assert_eq!(net, scope());
                    restricted.insert(rule.port)
                }
            };
        }
        (open, restricted)
    }

    #[test]
    fn test_trusted_scope_without_panel() {
        let rules = derive(&FirewallConfig {
            trusted_scope: Some(scope()),
            panel_enabled: false,
        });
        let (open, restricted) = summary(&rules);
        assert_eq!(open, BTreeSet::from([22, 80, 443]));
        assert_eq!(restricted, BTreeSet::from([22, 81, 3000, 8443, 9090, 9443]));
        assert_eq!(rules.len(), 9);
    }

    #[test]
    fn test_empty_scope_only_public_ports() {
        let rules = derive(&FirewallConfig::default());
        let (open, restricted) = summary(&rules);
        assert_eq!(open, BTreeSet::from([22, 80, 443]));
        assert!(restricted.is_empty());
    }

    #[test]
    fn test_panel_opens_unscoped_port() {
        let rules = derive(&FirewallConfig {
            trusted_scope: None,
            panel_enabled: true,
        });
        let (open, _) = summary(&rules);
        assert!(open.contains(&9200));
    }

    #[test]
    fn test_derive_is_deterministic() {
        let config = FirewallConfig {
            trusted_scope: Some(scope()),
            panel_enabled: true,
        };
        assert_eq!(derive(&config), derive(&config));
    }

    #[test]
    fn test_apply_resets_then_rebuilds() {
        let runner = FakeRunner::new();
        let outcome = FirewallConfigurator::new(&runner)
            .apply(&FirewallConfig::default())
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Satisfied(_)));
        assert_eq!(
            runner.lines(),
            vec![
                "ufw --force reset",
                "ufw default deny incoming",
                "ufw default allow outgoing",
                "ufw allow 22/tcp comment ssh",
                "ufw allow 80/tcp comment http",
                "ufw allow 443/tcp comment https",
                "ufw --force enable",
            ]
        );
    }

    #[test]
    fn test_apply_same_commands_regardless_of_prior_state() {
        let config = FirewallConfig {
            trusted_scope: Some(scope()),
            panel_enabled: false,
        };
        let fresh = FakeRunner::new();
        FirewallConfigurator::new(&fresh).apply(&config).unwrap();

        let dirty = FakeRunner::new();
        dirty.respond("ufw status", vec![CommandOutput::ok("Status: active\n9999 ALLOW Anywhere")]);
        FirewallConfigurator::new(&dirty).apply(&config).unwrap();
        assert_eq!(fresh.lines(), dirty.lines());
    }

    #[test]
    fn test_panel_is_warned() {
        let runner = FakeRunner::new();
        let outcome = FirewallConfigurator::new(&runner)
            .apply(&FirewallConfig {
                trusted_scope: None,
                panel_enabled: true,
            })
            .unwrap();
        match outcome {
            StepOutcome::Warned(detail) => assert!(detail.contains("9200")),
            other => panic!("expected warning, got {:?}", other),
        }
    }

    #[test]
    fn test_ufw_failure_is_error() {
        let runner = FakeRunner::new();
        runner.fail("ufw --force enable");
        let err = FirewallConfigurator::new(&runner)
            .apply(&FirewallConfig::default())
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("ufw --force enable"));
        assert!(msg.contains("the filter may be disabled"));
        assert_eq!(runner.count("ufw --force reset"), 3);
    }

    #[test]
    fn test_partial_rebuild_falls_back_to_ssh_only() {
        let runner = FakeRunner::new();
        runner.fail("ufw allow 80/tcp");
        let err = FirewallConfigurator::new(&runner)
            .apply(&FirewallConfig {
                trusted_scope: Some(scope()),
                panel_enabled: false,
            })
            .unwrap_err();
        assert!(format!("{:#}", err).contains("fell back to an ssh-only policy"));
        assert_eq!(runner.count("ufw allow 80/tcp"), 2);

        let lines = runner.lines();
        let last_reset = lines.iter().rposition(|l| l == "ufw --force reset").unwrap();
        assert_eq!(
            lines[last_reset..].to_vec(),
            vec![
                "ufw --force reset",
                "ufw default deny incoming",
                "ufw default allow outgoing",
                "ufw allow 22/tcp comment ssh",
                "ufw --force enable",
            ]
        );
    }

    #[test]
    fn test_transient_failure_recovers_on_retry() {
        let runner = FakeRunner::new();
        runner.respond(
            "ufw allow 443/tcp",
            vec![CommandOutput::failed(1, "ERROR: problem running iptables"), CommandOutput::ok("")],
        );
        let outcome = FirewallConfigurator::new(&runner)
            .apply(&FirewallConfig::default())
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Satisfied(_)));
        assert_eq!(runner.count("ufw --force reset"), 2);
        assert_eq!(runner.count("ufw --force enable"), 1);
    }

    #[test]
    fn test_parse_scope_normalizes() {
        assert_eq!(parse_scope("10.0.0.7/24").unwrap().to_string(), "10.0.0.0/24");
        assert_eq!(parse_scope(" 192.168.1.0/24 ").unwrap().to_string(), "192.168.1.0/24");
        assert!(parse_scope("not-a-network").is_err());
        assert!(parse_scope("10.0.0.0/33").is_err());
    }
}
