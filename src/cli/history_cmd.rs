//! `history`: recent runs and chain verification.

use crate::cli::CliContext;
use crate::core::history;
use anyhow::Result;
use chrono::{DateTime, Local};
use clap::Args;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, Table};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// Maximum number of entries to display
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Verify the hash chain instead of listing
    #[arg(long)]
    pub verify: bool,
}

pub fn run(ctx: &CliContext, args: HistoryArgs) -> Result<()> {
    if args.verify {
        return run_verify(ctx);
    }

    let entries = history::read(&ctx.paths, Some(args.limit))?;
    if entries.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        Cell::new("Timestamp").add_attribute(Attribute::Bold),
        Cell::new("Action").add_attribute(Attribute::Bold),
        Cell::new("Actor").add_attribute(Attribute::Bold),
        Cell::new("Outcome").add_attribute(Attribute::Bold),
        Cell::new("Warned").add_attribute(Attribute::Bold),
    ]);

    for entry in &entries {
        let local: DateTime<Local> = entry.timestamp.into();
        let outcome = if entry.outcome.starts_with("aborted") {
            Cell::new(&entry.outcome).fg(Color::Red)
        } else {
            Cell::new(&entry.outcome)
        };
        let warned: Vec<&str> = entry
            .steps
            .iter()
            .filter(|s| s.state == "warned")
            .map(|s| s.name.as_str())
            .collect();
        let reason = entry
            .reason
            .as_ref()
            .map(|r| format!("{} ({})", entry.action, r))
            .unwrap_or_else(|| entry.action.clone());
        table.add_row(vec![
            Cell::new(local.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(reason),
            Cell::new(&entry.actor),
            outcome,
            Cell::new(if warned.is_empty() { "-".to_string() } else { warned.join(",") }),
        ]);
    }

    println!("{}", table);
    println!("\n{} entries shown.", entries.len());
    Ok(())
}

fn run_verify(ctx: &CliContext) -> Result<()> {
    let (total, problems) = history::verify_chain(&ctx.paths)?;

    if total == 0 {
        println!("No history entries to verify.");
        return Ok(());
    }

    for problem in &problems {
        println!("  [FAIL] {}", problem);
    }

    println!();
    if problems.is_empty() {
        println!("History chain: {} entries verified, 0 errors", total);
    } else {
        println!("History chain: {} entries, {} errors", total, problems.len());
        std::process::exit(1);
    }
    Ok(())
}
