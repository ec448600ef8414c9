//! Backup maintenance: the operations the daily timer runs, plus listing.

use crate::cli::CliContext;
use crate::core::backup::{self, BackupManager};
use crate::core::retention::RetentionPlan;
use crate::core::secret_store::SecretStore;
use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Args, Subcommand};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Take one snapshot now
    Run,
    /// Apply the retention policy and reclaim space
    Prune(PruneArgs),
    /// List repository snapshots
    Snapshots(SnapshotsArgs),
}

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Print the keep/forget plan without changing the repository
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct SnapshotsArgs {
    /// Output format: table|json
    #[arg(long, default_value = "table")]
    pub format: String,
}

pub fn run(ctx: &CliContext, command: BackupCommand) -> Result<()> {
    let config = backup::load_config(&ctx.paths.backup_config)?;
    let secrets = SecretStore::new(ctx.paths.secrets.clone())
        .load()
        .context("load backup passphrase")?;
    let binary = std::env::current_exe().context("locate hostforge binary")?;
    let manager = BackupManager::new(
        &ctx.runner,
        ctx.paths.backup_config.clone(),
        ctx.paths.unit_dir.clone(),
        ctx.paths.root.clone(),
        binary,
    );

    match command {
        BackupCommand::Run => {
            let summary = manager.run_snapshot(&config, &secrets, Utc::now())?;
            println!(
                "Snapshot {} complete: {} files ({} new, {} changed), {} added, {} processed in {:.1}s ({}/s)",
                summary.snapshot_id.as_deref().unwrap_or("-"),
                summary.total_files_processed,
                summary.files_new,
                summary.files_changed,
                human_bytes(summary.data_added),
                human_bytes(summary.total_bytes_processed),
                summary.total_duration,
                human_bytes(summary.throughput() as u64)
            );
            Ok(())
        }
        BackupCommand::Prune(args) => {
            let plan = manager.prune(&config, &secrets, args.dry_run)?;
            print_plan(&plan, args.dry_run);
            Ok(())
        }
        BackupCommand::Snapshots(args) => {
            if args.format != "table" && args.format != "json" {
                bail!("invalid format: {} (use table|json)", args.format);
            }
            let snapshots = manager.snapshots(&config, &secrets)?;
            if args.format == "json" {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&snapshots).context("serialize snapshots")?
                );
                return Ok(());
            }
            if snapshots.is_empty() {
                println!("No snapshots in {}", config.repository);
                return Ok(());
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                Cell::new("ID").add_attribute(Attribute::Bold),
                Cell::new("Time").add_attribute(Attribute::Bold),
                Cell::new("Tags").add_attribute(Attribute::Bold),
                Cell::new("Paths").add_attribute(Attribute::Bold),
            ]);
            for snap in &snapshots {
                table.add_row(vec![
                    snap.display_id().to_string(),
                    snap.time
                        .with_timezone(&Local)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string(),
                    snap.tags.join(","),
                    snap.paths.join(","),
                ]);
            }
            println!("{}", table);
            println!("\n{} snapshot(s) in {}", snapshots.len(), config.repository);
            Ok(())
        }
    }
}

fn print_plan(plan: &RetentionPlan, dry_run: bool) {
    if plan.keep.is_empty() && plan.forget.is_empty() {
        println!("Repository has no snapshots");
        return;
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("ID").add_attribute(Attribute::Bold),
        Cell::new("Time (UTC)").add_attribute(Attribute::Bold),
        Cell::new("Decision").add_attribute(Attribute::Bold),
    ]);
    for kept in &plan.keep {
        let reasons: Vec<_> = kept.tiers.iter().map(|t| t.as_str()).collect();
        table.add_row(vec![
            Cell::new(kept.snapshot.display_id()),
            Cell::new(kept.snapshot.time.format("%Y-%m-%d %H:%M")),
            Cell::new(format!("keep ({})", reasons.join(", "))).fg(Color::Green),
        ]);
    }
    for snap in &plan.forget {
        table.add_row(vec![
            Cell::new(snap.display_id()),
            Cell::new(snap.time.format("%Y-%m-%d %H:%M")),
            Cell::new("forget").fg(Color::Red),
        ]);
    }
    println!("{}", table);
    let verb = if dry_run { "would forget" } else { "forgot" };
    println!("\nKept {}, {} {}", plan.keep.len(), verb, plan.forget.len());
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
