//! Dry-run view of the firewall policy.

use crate::cli::provision::parse_scope_arg;
use crate::cli::CliContext;
use crate::core::firewall::{self, FirewallConfig, PANEL_WARNING};
use crate::core::runner::Invocation;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};
use ipnetwork::IpNetwork;
use serde::Serialize;

#[derive(Subcommand, Debug)]
pub enum FirewallCommand {
    /// Print the rules and ufw commands a run would apply (no changes)
    Plan(PlanArgs),
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Trusted network (default: [network] trusted_scope from the config file)
    #[arg(long, value_name = "CIDR", value_parser = parse_scope_arg)]
    pub trusted_scope: Option<IpNetwork>,

    /// Include the admin panel port
    #[arg(long)]
    pub enable_admin_panel: bool,

    /// Output format: table|json
    #[arg(long, default_value = "table")]
    pub format: String,
}

#[derive(Serialize)]
struct PlanOutput<'a> {
    rules: &'a [crate::models::firewall::FirewallRule],
    commands: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<&'static str>,
}

pub fn run(ctx: &CliContext, command: FirewallCommand) -> Result<()> {
    match command {
        FirewallCommand::Plan(args) => run_plan(ctx, args),
    }
}

/// Shell rendering of an invocation; arguments with spaces are quoted.
fn shell_line(inv: &Invocation) -> String {
    let mut line = inv.program().to_string();
    for arg in inv.arguments() {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push_str(&format!("'{}'", arg));
        } else {
            line.push_str(arg);
        }
    }
    line
}

fn run_plan(ctx: &CliContext, args: PlanArgs) -> Result<()> {
    if args.format != "table" && args.format != "json" {
        bail!("invalid format: {} (use table|json)", args.format);
    }
    let trusted_scope = match (args.trusted_scope, &ctx.config.network.trusted_scope) {
        (Some(scope), _) => Some(scope),
        (None, Some(raw)) => Some(firewall::parse_scope(raw)?),
        (None, None) => None,
    };
    let config = FirewallConfig {
        trusted_scope,
        panel_enabled: args.enable_admin_panel,
    };
    let rules = firewall::derive(&config);
    let commands: Vec<String> = firewall::commands(&rules).iter().map(shell_line).collect();
    let warning = config.panel_enabled.then_some(PANEL_WARNING);

    if args.format == "json" {
        let out = PlanOutput {
            rules: &rules,
            commands,
            warning,
        };
        println!("{}", serde_json::to_string_pretty(&out).context("serialize plan")?);
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Port").add_attribute(Attribute::Bold),
        Cell::new("Proto").add_attribute(Attribute::Bold),
        Cell::new("Source").add_attribute(Attribute::Bold),
        Cell::new("Label").add_attribute(Attribute::Bold),
    ]);
    for rule in &rules {
        table.add_row(vec![
            rule.port.to_string(),
            rule.protocol.to_string(),
            rule.source.to_string(),
            rule.label.to_string(),
        ]);
    }
    println!("{}", table);
    println!("\nCommands:");
    for cmd in &commands {
        println!("  {}", cmd);
    }
    if let Some(w) = warning {
        println!("\n[WARN] {}", w);
    }
    Ok(())
}
