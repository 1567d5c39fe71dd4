use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use monthfinance::core::month_key_from_date;
use monthfinance::{
    Clock, ExpenseCategory, FileAdapter, MemoryGateway, NewExpense, ReceiptCandidate,
    RemoteConfig, RemoteGateway, RestGateway, SyncConfig, SyncEngine, SystemClock, TickOutcome,
    init_tracing, spawn_reconciler,
};
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "monthfinance")]
#[command(about = "Local-first monthly expense tracker with background sync")]
struct Cli {
    /// Snapshot directory (overrides MONTHFINANCE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Never contact the remote, even when SUPABASE_URL is set
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Record an expense
    Add {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        amount: Decimal,
        #[arg(long, default_value = "OTHER")]
        category: ExpenseCategory,
        #[arg(long)]
        currency: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    /// List the active expenses of a month
    List {
        /// YYYY-MM, defaults to the current month
        #[arg(long)]
        month: Option<String>,
    },
    /// Delete an expense
    Remove {
        #[arg(long)]
        month: String,
        #[arg(long)]
        id: String,
    },
    /// Set the monthly quick amount of a category
    Quick {
        #[arg(long)]
        month: String,
        #[arg(long)]
        category: ExpenseCategory,
        #[arg(long)]
        amount: Decimal,
    },
    /// Import a receipt candidate from a JSON file
    Import {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "OTHER")]
        category: ExpenseCategory,
    },
    /// Run one reconciliation tick
    Sync {
        /// Pull up to this many extra pages after the tick
        #[arg(long, default_value_t = 0)]
        backfill: usize,
    },
    /// Reconcile in the background until Ctrl+C
    Watch,
    /// Print record, outbox and cursor state as JSON
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = SyncConfig::from_env().context("failed to read config")?;
    if let Some(dir) = cli.data_dir {
        config = config.data_dir(dir);
    }
    let engine = Arc::new(open_engine(config, cli.offline)?);

    match cli.command {
        Command::Add {
            date,
            vendor,
            amount,
            category,
            currency,
            notes,
        } => {
            let currency = currency.unwrap_or_else(|| engine.config().default_currency.clone());
            let mut draft = NewExpense::manual(date, vendor, amount, currency, category);
            if let Some(notes) = notes {
                draft = draft.with_notes(notes);
            }
            let created = engine.add_expense(draft).context("failed to add expense")?;
            println!("{} {}", created.month_key, created.id);
        }
        Command::List { month } => {
            let month = month.unwrap_or_else(|| month_key_from_date(Utc::now().date_naive()));
            for expense in engine.list_active(&month)? {
                println!(
                    "{}  {:<10} {:>10} {}  {}  {}",
                    expense.date,
                    expense.category,
                    expense.amount,
                    expense.currency,
                    expense.vendor,
                    expense.id
                );
            }
            for (currency, total) in engine.month_total(&month)? {
                println!("total {} {}", total, currency);
            }
        }
        Command::Remove { month, id } => {
            engine
                .remove_expense(&month, &id)
                .with_context(|| format!("failed to remove '{}' from {}", id, month))?;
            println!("removed {}", id);
        }
        Command::Quick {
            month,
            category,
            amount,
        } => {
            let record = engine
                .upsert_monthly_quick(&month, category, amount)
                .context("failed to set quick amount")?;
            println!("{} {} {}", record.month_key, record.category, record.amount);
        }
        Command::Import { file, category } => {
            let raw = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read '{}'", file.display()))?;
            let candidate: ReceiptCandidate = serde_json::from_str(&raw)
                .with_context(|| format!("'{}' is not a receipt candidate", file.display()))?;
            let imported = engine.import_receipt(&candidate, category)?;
            println!("{} {}", imported.month_key, imported.id);
        }
        Command::Sync { backfill } => {
            match engine.tick().await {
                TickOutcome::Completed(report) => println!("{}", report.summary()),
                TickOutcome::Skipped => println!("tick skipped"),
            }
            if backfill > 0 {
                let pages = engine.backfill(backfill).await?;
                let pulled: usize = pages.iter().map(|page| page.pulled).sum();
                println!("backfilled {} row(s) in {} page(s)", pulled, pages.len());
            }
        }
        Command::Watch => {
            let reconciler = spawn_reconciler(engine.clone());
            tokio::signal::ctrl_c()
                .await
                .context("unable to install Ctrl+C handler")?;
            reconciler.stop().await?;
        }
        Command::Status => {
            let status = engine.status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }
    Ok(())
}

fn open_engine(config: SyncConfig, offline: bool) -> Result<SyncEngine> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let adapter = FileAdapter::open(&config.data_dir)
        .with_context(|| format!("Failed to open data dir '{}'", config.data_dir.display()))?;

    let remote = if offline {
        None
    } else {
        RemoteConfig::from_env().context("invalid remote config")?
    };
    let gateway: Arc<dyn RemoteGateway> = match remote {
        Some(remote) => Arc::new(RestGateway::new(&remote, clock.clone())?),
        None => {
            tracing::info!("no remote configured; changes stay queued locally");
            let unreachable = MemoryGateway::new(clock.clone());
            unreachable.set_online(false);
            Arc::new(unreachable)
        }
    };

    SyncEngine::open(Arc::new(adapter), gateway, clock, config).context("failed to open engine")
}
