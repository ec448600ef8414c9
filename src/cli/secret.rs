//! Read access to generated secrets.

use crate::cli::CliContext;
use crate::core::catalogue;
use crate::core::history::RunRecord;
use crate::core::secret_store::SecretStore;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Table};
use std::io::Write;

#[derive(Subcommand, Debug)]
pub enum SecretCommand {
    /// List stored secret names (never values)
    List,
    /// Print one secret value to stdout
    Get(GetArgs),
}

#[derive(Args, Debug)]
pub struct GetArgs {
    /// Secret name
    pub name: String,

    /// Allow stdout output (dangerous)
    #[arg(long)]
    pub confirm: bool,

    /// Reason for reading the secret (recorded in the history)
    #[arg(long)]
    pub reason: Option<String>,
}

pub fn run(ctx: &CliContext, command: SecretCommand) -> Result<()> {
    let store = SecretStore::new(ctx.paths.secrets.clone());
    if !store.exists() {
        bail!(
            "{} does not exist; run provisioning first",
            store.path().display()
        );
    }
    match command {
        SecretCommand::List => run_list(&store),
        SecretCommand::Get(args) => run_get(ctx, &store, args),
    }
}

/// Which deployed services consume a secret.
fn consumers(name: &str) -> Vec<&'static str> {
    catalogue::CATALOGUE
        .iter()
        .filter(|def| def.secret_names().any(|s| s == name))
        .map(|def| def.name)
        .collect()
}

fn run_list(store: &SecretStore) -> Result<()> {
    let bundle = store.load()?;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Name").add_attribute(Attribute::Bold),
        Cell::new("Used by").add_attribute(Attribute::Bold),
    ]);
    for name in bundle.names() {
        let users = consumers(name);
        let used_by = if name == crate::constants::BACKUP_PASSPHRASE_SECRET {
            "backup repository".to_string()
        } else if users.is_empty() {
            "-".to_string()
        } else {
            users.join(",")
        };
        table.add_row(vec![name.to_string(), used_by]);
    }
    println!("{}", table);
    println!("\n{} secret(s) in {}", bundle.len(), store.path().display());
    Ok(())
}

fn run_get(ctx: &CliContext, store: &SecretStore, args: GetArgs) -> Result<()> {
    if !args.confirm {
        bail!("refusing to print secret to stdout without --confirm");
    }
    let reason = args.reason.as_deref().unwrap_or("").trim();
    if reason.is_empty() {
        bail!("--reason is required when printing to stdout");
    }

    let bundle = store.load()?;
    let value = bundle.require(&args.name)?;
    ctx.record(RunRecord::secret_read(&args.name, reason));

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", value).context("write to stdout")?;
    stdout.flush().context("flush stdout")?;
    Ok(())
}
