//! Command-line front end for a MoneyNotes ledger.
//!
//! # Responsibility
//! - Map subcommands onto `MoneyNotes` operations.
//! - Render records and totals as text or JSON.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime, TimeZone};
use clap::{Parser, Subcommand, ValueEnum};
use moneynotes_core::{
    core_version, suggested_categories, CoreConfig, MoneyNotes, NewTransaction, Transaction,
    TransactionId, TransactionKind,
};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser, Debug)]
#[command(name = "moneynotes", about = "MoneyNotes - income and expense ledger")]
struct CliArgs {
    /// Ledger database file (overrides MONEYNOTES_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (overrides MONEYNOTES_LOG_LEVEL)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Absolute directory for rolling log files (overrides MONEYNOTES_LOG_DIR)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record an income or expense
    Add {
        kind: KindArg,
        amount: String,
        #[arg(short, long)]
        category: String,
        #[arg(short, long, default_value = "")]
        note: String,
        /// Local time as "YYYY-MM-DD HH:MM" or "YYYY-MM-DD"; defaults to now
        #[arg(long)]
        at: Option<String>,
    },
    /// Delete a record by id
    Delete { id: i64 },
    /// List records, most recent first
    List {
        #[arg(short, long)]
        kind: Option<KindArg>,
        #[arg(short, long)]
        limit: Option<u32>,
    },
    /// Show income, expense and balance totals
    Summary,
    /// Show suggested categories for a kind
    Categories { kind: KindArg },
    /// Print the core version
    Version,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Income,
    Expense,
}

impl From<KindArg> for TransactionKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Income => TransactionKind::Income,
            KindArg::Expense => TransactionKind::Expense,
        }
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();

    match args.command {
        Command::Version => {
            println!("moneynotes_core version={}", core_version());
            return Ok(());
        }
        Command::Categories { kind } => {
            print_categories(kind.into(), args.json)?;
            return Ok(());
        }
        _ => {}
    }

    let config = resolve_config(&args)?;
    let notes = MoneyNotes::open(&config)
        .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?;
    log::info!("event=cli_command module=cli status=start");

    match args.command {
        Command::Add {
            kind,
            amount,
            category,
            note,
            at,
        } => {
            let amount = Decimal::from_str(amount.trim())
                .map_err(|err| anyhow!("invalid amount `{amount}`: {err}"))?;
            let mut record =
                NewTransaction::new(kind.into(), category, amount).with_note(note);
            if let Some(at) = at {
                record = record.at(parse_local_time(&at)?);
            }
            let id = notes.insert(&record)?;
            if args.json {
                println!("{}", serde_json::json!({ "id": id }));
            } else {
                println!("added #{id}");
            }
        }
        Command::Delete { id } => {
            notes.delete(TransactionId(id))?;
            if args.json {
                println!("{}", serde_json::json!({ "deleted": id }));
            } else {
                println!("deleted #{id}");
            }
        }
        Command::List { kind, limit } => {
            let records = match (kind, limit) {
                (None, Some(limit)) => notes.recent(limit)?,
                (None, None) => notes.list_all()?,
                (Some(kind), limit) => {
                    let mut records = notes.list_by_kind(kind.into())?;
                    if let Some(limit) = limit {
                        records.truncate(limit as usize);
                    }
                    records
                }
            };
            print_records(&records, args.json)?;
        }
        Command::Summary => {
            let view = notes.aggregate()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                println!("income   {}", view.total_income);
                println!("expense  {}", view.total_expense);
                println!("balance  {}", view.balance);
            }
        }
        Command::Categories { .. } | Command::Version => {}
    }

    Ok(())
}

fn resolve_config(args: &CliArgs) -> Result<CoreConfig> {
    let mut config = CoreConfig::from_env()?;
    if let Some(db) = &args.db {
        config.db_path = db.clone();
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if let Some(log_dir) = &args.log_dir {
        config.log_dir = Some(log_dir.clone());
    }
    Ok(config)
}

fn parse_local_time(value: &str) -> Result<i64> {
    let value = value.trim();
    let naive = match NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M") {
        Ok(naive) => naive,
        Err(_) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map_err(|err| anyhow!("invalid time `{value}`: {err}"))?
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid time `{value}`"))?,
    };
    match Local.from_local_datetime(&naive).earliest() {
        Some(local) => Ok(local.timestamp_millis()),
        None => bail!("time `{value}` does not exist in the local time zone"),
    }
}

fn format_local_time(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(local) => local.format("%Y-%m-%d %H:%M").to_string(),
        None => epoch_ms.to_string(),
    }
}

fn print_records(records: &[Transaction], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no records");
        return Ok(());
    }
    for record in records {
        let sign = if record.is_income() { '+' } else { '-' };
        let mut line = format!(
            "#{:<5} {}  {}{:>14}  {}",
            record.id.get(),
            format_local_time(record.occurred_at_ms),
            sign,
            record.amount,
            record.category
        );
        if !record.note.is_empty() {
            line.push_str(&format!("  ({})", record.note));
        }
        println!("{line}");
    }
    Ok(())
}

fn print_categories(kind: TransactionKind, json: bool) -> Result<()> {
    let categories = suggested_categories(kind);
    if json {
        println!("{}", serde_json::to_string(categories)?);
    } else {
        for category in categories {
            println!("{category}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_date_and_minute_precision_times() {
        let day = parse_local_time("2024-03-01").unwrap();
        let minute = parse_local_time("2024-03-01 08:30").unwrap();
        assert_eq!(minute - day, (8 * 60 + 30) * 60 * 1000);
        assert!(parse_local_time("yesterday").is_err());
    }

    #[test]
    fn cli_flags_parse_into_commands() {
        let args = CliArgs::try_parse_from([
            "moneynotes",
            "--json",
            "add",
            "expense",
            "12.50",
            "--category",
            "Makanan",
        ])
        .unwrap();
        assert!(args.json);
        assert!(matches!(
            args.command,
            Command::Add { kind: KindArg::Expense, ref amount, .. } if amount == "12.50"
        ));
    }
}
