//! The default command: provision this host.

use crate::cli::CliContext;
use crate::core::firewall;
use crate::core::host_setup::HostLayout;
use crate::core::inventory;
use crate::core::orchestrator::{RunOutcome, StepState};
use crate::core::provision::{self as pipeline, Host, ProvisionSettings};
use crate::core::retry::{RetryPolicy, ThreadSleeper};
use crate::models::backup::BackupConfig;
use crate::models::config::{BackupSection, ConfigFile};
use crate::util::privilege;
use anyhow::{bail, Context, Result};
use clap::builder::BoolishValueParser;
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};
use dialoguer::{Confirm, Input};
use ipnetwork::IpNetwork;

#[derive(Args, Debug, Default)]
pub struct ProvisionArgs {
    /// Domain used in service endpoints (default: the host name)
    #[arg(long, env = "HOSTFORGE_DOMAIN", value_name = "DOMAIN")]
    pub domain: Option<String>,

    /// Network allowed to reach administrative ports, e.g. 10.0.0.0/24
    #[arg(long, env = "HOSTFORGE_TRUSTED_SCOPE", value_name = "CIDR", value_parser = parse_scope_arg)]
    pub trusted_scope: Option<IpNetwork>,

    /// Install the host administration panel on port 9200 (open to all sources)
    #[arg(long)]
    pub enable_admin_panel: bool,

    /// Install GPU drivers and the container toolkit
    #[arg(long)]
    pub enable_accelerator_drivers: bool,

    /// Do not deploy prometheus and grafana
    #[arg(long)]
    pub skip_monitoring: bool,

    /// Run without prompts (suitable for automation)
    #[arg(
        long,
        env = "HOSTFORGE_NON_INTERACTIVE",
        value_parser = BoolishValueParser::new()
    )]
    pub non_interactive: bool,
}

pub(crate) fn parse_scope_arg(raw: &str) -> Result<IpNetwork, String> {
    firewall::parse_scope(raw).map_err(|e| format!("{:#}", e))
}

/// Overlay the `[backup]` section on the built-in defaults.
pub fn backup_config(section: &BackupSection) -> BackupConfig {
    let mut config = BackupConfig::default();
    if let Some(repository) = &section.repository {
        config.repository = repository.clone();
    }
    if let Some(sources) = &section.sources {
        config.sources = sources.clone();
    }
    if let Some(exclude) = &section.exclude {
        config.exclude = exclude.clone();
    }
    if let Some(retention) = section.retention {
        config.retention = retention;
    }
    config
}

/// Combine flags (already merged with the environment by clap) with the
/// config file. `host` is the resolved endpoint name.
pub fn settings(args: &ProvisionArgs, config: &ConfigFile, host: String) -> Result<ProvisionSettings> {
    let trusted_scope = match (args.trusted_scope, &config.network.trusted_scope) {
        (Some(scope), _) => Some(scope),
        (None, Some(raw)) => Some(
            firewall::parse_scope(raw).context("[network] trusted_scope in configuration")?,
        ),
        (None, None) => None,
    };
    Ok(ProvisionSettings {
        host,
        trusted_scope,
        enable_admin_panel: args.enable_admin_panel,
        enable_accelerator_drivers: args.enable_accelerator_drivers,
        skip_monitoring: args.skip_monitoring,
        backup: backup_config(&config.backup),
        retry: RetryPolicy::from(&config.retry),
    })
}

fn resolve_host(args: &ProvisionArgs, config: &ConfigFile, interactive: bool) -> Result<String> {
    if let Some(domain) = args.domain.clone().or_else(|| config.network.domain.clone()) {
        let domain = domain.trim().to_string();
        if !domain.is_empty() {
            return Ok(domain);
        }
    }
    let fallback = privilege::hostname().unwrap_or_else(|| "localhost".to_string());
    if !interactive {
        return Ok(fallback);
    }
    let domain: String = Input::new()
        .with_prompt("Domain for service endpoints")
        .default(fallback)
        .interact_text()
        .context("read domain from prompt")?;
    Ok(domain.trim().to_string())
}

fn print_plan(settings: &ProvisionSettings) {
    println!("Provisioning {}", settings.host);
    match settings.trusted_scope {
        Some(scope) => println!("  trusted scope:       {}", scope),
        None => println!("  trusted scope:       none (admin ports closed)"),
    }
    println!("  monitoring:          {}", if settings.skip_monitoring { "skipped" } else { "enabled" });
    println!("  admin panel:         {}", if settings.enable_admin_panel { "enabled" } else { "disabled" });
    println!(
        "  accelerator drivers: {}",
        if settings.enable_accelerator_drivers { "enabled" } else { "disabled" }
    );
    println!("  backup repository:   {}", settings.backup.repository);
}

pub fn run(ctx: &CliContext, args: ProvisionArgs) -> Result<()> {
    let interactive = !ctx.non_interactive;
    let host_name = resolve_host(&args, &ctx.config, interactive)?;
    let settings = settings(&args, &ctx.config, host_name)?;

    print_plan(&settings);
    if interactive {
        let proceed = Confirm::new()
            .with_prompt("Apply these changes to this host?")
            .default(true)
            .interact()
            .context("read confirmation")?;
        if !proceed {
            println!("No changes made.");
            return Ok(());
        }
    }

    let binary = std::env::current_exe().context("locate hostforge binary")?;
    let sleeper = ThreadSleeper;
    let host = Host {
        runner: &ctx.runner,
        sleeper: &sleeper,
        layout: HostLayout {
            unit_dir: ctx.paths.unit_dir.clone(),
            ..HostLayout::default()
        },
        binary,
    };

    let summary = pipeline::run(&ctx.paths, &settings, &host)?;
    ctx.forward(&summary.record);

    println!();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Step").add_attribute(Attribute::Bold),
        Cell::new("State").add_attribute(Attribute::Bold),
        Cell::new("Time").add_attribute(Attribute::Bold),
        Cell::new("Detail").add_attribute(Attribute::Bold),
    ]);
    for step in &summary.report.steps {
        let state = match step.state {
            StepState::Satisfied => Cell::new(step.state).fg(Color::Green),
            StepState::Warned => Cell::new(step.state).fg(Color::Yellow),
            StepState::Failed => Cell::new(step.state).fg(Color::Red),
            _ => Cell::new(step.state),
        };
        table.add_row(vec![
            Cell::new(&step.name),
            state,
            Cell::new(format!("{:.1}s", step.elapsed.as_secs_f64())),
            Cell::new(step.detail.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{}", table);

    let warned: Vec<_> = summary.report.warned().collect();
    if !warned.is_empty() {
        println!("\nWarnings ({}):", warned.len());
        for step in warned {
            println!("  [WARN] {}: {}", step.name, step.detail.as_deref().unwrap_or("-"));
        }
    }
    if !summary.skipped.is_empty() {
        println!("\nSkipped by configuration: {}", summary.skipped.join(", "));
    }

    if let Some(record) = &summary.inventory {
        println!("\n{}", inventory::summary_table(record));
        println!("\nNext steps:");
        for (i, step) in inventory::next_steps(record).iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    match &summary.report.outcome {
        RunOutcome::Completed => {
            println!("\nProvisioning completed. Re-running is safe.");
            Ok(())
        }
        RunOutcome::Aborted { step } => {
            bail!("provisioning aborted at step '{}'; fix the cause and re-run", step)
        }
    }
}
