//! Wallet Replay CLI
//!
//! Entrypoint for running per-wallet ledger replays against the event store.
//!
//! Usage:
//!   cargo run --release --bin ledger_replay -- wallet --wallet 0xabc... --interval 3600
//!   cargo run --release --bin ledger_replay -- batch --wallets-file wallets.txt --concurrency 8
//!   cargo run --release --bin ledger_replay -- top --count 50
//!
//! # Exit Codes
//!
//! - 0: all replays succeeded
//! - 1: run completed but at least one wallet failed
//! - 2: configuration or validation error
//! - 3: runtime error (store, I/O)

use alloy_primitives::Address;
use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use polyledger::ledger::{
    parse_address, run_wallet_replay, ChainAddresses, LedgerStore, ReplayConfig, ReplaySummary,
    DEFAULT_SNAPSHOT_INTERVAL_SECS,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Per-wallet PnL ledger replay over the raw chain-event store.
#[derive(Parser, Debug)]
#[command(name = "ledger_replay")]
#[command(about = "Replay wallet chain events into ledger entries and snapshots")]
struct Cli {
    /// Path to the SQLite event store (defaults to $LEDGER_DB, then ./ledger.db)
    #[arg(long)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Clone)]
struct ReplayArgs {
    /// Snapshot interval in seconds
    #[arg(long, default_value_t = DEFAULT_SNAPSHOT_INTERVAL_SECS)]
    interval: i64,

    /// Replay window start (RFC3339 or unix seconds)
    #[arg(long)]
    start: Option<String>,

    /// Replay window end (RFC3339 or unix seconds)
    #[arg(long)]
    end: Option<String>,

    /// Compute everything, write nothing
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a single wallet
    Wallet {
        /// Wallet address (0x-prefixed)
        #[arg(long)]
        wallet: String,

        #[command(flatten)]
        replay: ReplayArgs,
    },

    /// Replay a list of wallets with bounded concurrency
    Batch {
        /// File with one wallet address per line
        #[arg(long)]
        wallets_file: PathBuf,

        /// Concurrent wallet replays
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        #[command(flatten)]
        replay: ReplayArgs,
    },

    /// Replay the top-N wallets from the pre-aggregated ranking table
    Top {
        /// Number of wallets to select
        #[arg(long, default_value_t = 50)]
        count: usize,

        /// Concurrent wallet replays
        #[arg(long, default_value_t = 4)]
        concurrency: usize,

        #[command(flatten)]
        replay: ReplayArgs,
    },
}

fn parse_ts(raw: &str) -> Result<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }
    let dt = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid timestamp {raw:?} (want RFC3339 or unix seconds)"))?;
    Ok(dt.timestamp())
}

fn build_config(
    wallet: Address,
    args: &ReplayArgs,
    addresses: &ChainAddresses,
) -> Result<ReplayConfig> {
    anyhow::ensure!(args.interval > 0, "--interval must be positive");
    let start_ts = args.start.as_deref().map(parse_ts).transpose()?;
    let end_ts = args.end.as_deref().map(parse_ts).transpose()?;
    if let (Some(start), Some(end)) = (start_ts, end_ts) {
        anyhow::ensure!(start <= end, "--start must not be after --end");
    }
    Ok(ReplayConfig {
        wallet,
        interval_secs: args.interval,
        start_ts,
        end_ts,
        dry_run: args.dry_run,
        addresses: addresses.clone(),
    })
}

fn print_summary(summary: &ReplaySummary) {
    println!(
        "wallet {:#x}: {} events -> {} entries, {} snapshots, realized ${:.2}, cashflow ${:.2}{}",
        summary.wallet,
        summary.events_processed,
        summary.ledger_entries,
        summary.snapshots,
        summary.realized_total,
        summary.cashflow_total,
        if summary.dry_run { " (dry run)" } else { "" },
    );
    if let Some(win_rate) = summary.stats.win_rate {
        println!(
            "  win rate {:.1}% over {} realizations, profit factor {}",
            win_rate * 100.0,
            summary.stats.realization_events,
            summary
                .stats
                .profit_factor
                .map(|pf| format!("{pf:.2}"))
                .unwrap_or_else(|| "n/a".to_string()),
        );
    }
}

/// Replay a wallet list with bounded parallelism; returns failed wallets.
async fn run_batch(
    store: &LedgerStore,
    wallets: Vec<Address>,
    concurrency: usize,
    args: &ReplayArgs,
    addresses: &ChainAddresses,
) -> Result<Vec<Address>> {
    let failures: Arc<Mutex<Vec<Address>>> = Arc::new(Mutex::new(Vec::new()));
    let total = wallets.len();

    stream::iter(wallets)
        .map(|wallet| {
            let store = store.clone();
            let failures = failures.clone();
            let cfg = build_config(wallet, args, addresses);
            async move {
                let cfg = match cfg {
                    Ok(cfg) => cfg,
                    Err(e) => {
                        error!(wallet = %format!("{wallet:#x}"), error = %e, "bad replay config");
                        failures.lock().push(wallet);
                        return;
                    }
                };
                match run_wallet_replay(&store, &cfg).await {
                    Ok(summary) => print_summary(&summary),
                    Err(e) => {
                        error!(wallet = %format!("{wallet:#x}"), error = %format!("{e:#}"), "replay failed");
                        failures.lock().push(wallet);
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect::<Vec<()>>()
        .await;

    let failed = failures.lock().clone();
    info!(total, failed = failed.len(), "batch complete");
    Ok(failed)
}

async fn run(cli: Cli) -> Result<i32> {
    let db_path = cli
        .db
        .or_else(|| std::env::var("LEDGER_DB").ok())
        .unwrap_or_else(|| "./ledger.db".to_string());
    let addresses = ChainAddresses::from_env()?;
    let store = LedgerStore::open(&db_path).with_context(|| format!("open store {db_path:?}"))?;

    match cli.command {
        Commands::Wallet { wallet, replay } => {
            let wallet = parse_address(&wallet)?;
            let cfg = build_config(wallet, &replay, &addresses)?;
            let summary = run_wallet_replay(&store, &cfg).await?;
            print_summary(&summary);
            Ok(0)
        }
        Commands::Batch {
            wallets_file,
            concurrency,
            replay,
        } => {
            let raw = std::fs::read_to_string(&wallets_file)
                .with_context(|| format!("read wallet list {wallets_file:?}"))?;
            let wallets = raw
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(parse_address)
                .collect::<Result<Vec<_>>>()?;
            anyhow::ensure!(!wallets.is_empty(), "wallet list {wallets_file:?} is empty");
            let failed = run_batch(&store, wallets, concurrency, &replay, &addresses).await?;
            Ok(if failed.is_empty() { 0 } else { 1 })
        }
        Commands::Top {
            count,
            concurrency,
            replay,
        } => {
            let wallets = store.top_wallets(count).await?;
            anyhow::ensure!(!wallets.is_empty(), "wallet_rankings table is empty");
            info!(selected = wallets.len(), "top wallets selected");
            let failed = run_batch(&store, wallets, concurrency, &replay, &addresses).await?;
            Ok(if failed.is_empty() { 0 } else { 1 })
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Clap handles --help/--version printing.
            e.print().ok();
            std::process::exit(if e.use_stderr() { 2 } else { 0 });
        }
    };

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal");
            std::process::exit(3);
        }
    }
}
