//! Per-Wallet Replay Driver
//!
//! Owns the full replay lifecycle for one wallet: bulk load, catalog build,
//! unified-stream merge, engine run with interleaved snapshots, and the
//! atomic output write. Either the whole replay commits or nothing does;
//! loader and write failures surface as per-wallet errors for the batch
//! driver to record.

use crate::ledger::conditions::ConditionCatalog;
use crate::ledger::engine::{EngineConfig, EngineOutput, LedgerEngine};
use crate::ledger::loader::load_wallet_events;
use crate::ledger::snapshots::Snapshotter;
use crate::ledger::stats::WalletStats;
use crate::ledger::store::{parse_address, LedgerStore};
use crate::ledger::stream::{index_transfers_by_tx, UnifiedStream};
use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use tracing::info;

/// Default snapshot cadence: hourly.
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: i64 = 3600;

// Mainnet defaults, overridable via environment.
const DEFAULT_EXCHANGES: &str = "0x4bfb41d5b3570defd03c39a9a4d8de6bd8b8982e,\
                                 0xc5d563a36ae78145c45a50134d48a1215220f80a";
const DEFAULT_NEG_RISK_ADAPTER: &str = "0xd91e80cf2e7be2e162c6513ced06f1dd0da35296";
const DEFAULT_NEG_RISK_WRAPPED_COLLATERAL: &str = "0x3a3bd7bb9528e159577f7c2e685cc81a765002e2";

/// Contract addresses the replay needs, sourced from the environment with
/// mainnet defaults.
#[derive(Debug, Clone)]
pub struct ChainAddresses {
    /// Exchange contracts whose operator transfers inside trade transactions
    /// are exchange-internal and must be suppressed.
    pub exchange_operators: HashSet<Address>,
    pub neg_risk_adapter: Address,
    pub neg_risk_wrapped_collateral: Address,
}

impl ChainAddresses {
    pub fn from_env() -> Result<Self> {
        let exchanges =
            env::var("EXCHANGE_ADDRESSES").unwrap_or_else(|_| DEFAULT_EXCHANGES.to_string());
        let exchange_operators = exchanges
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse_address)
            .collect::<Result<HashSet<_>>>()
            .context("parse EXCHANGE_ADDRESSES")?;
        let neg_risk_adapter = parse_address(
            &env::var("NEG_RISK_ADAPTER").unwrap_or_else(|_| DEFAULT_NEG_RISK_ADAPTER.to_string()),
        )
        .context("parse NEG_RISK_ADAPTER")?;
        let neg_risk_wrapped_collateral = parse_address(
            &env::var("NEG_RISK_WRAPPED_COLLATERAL")
                .unwrap_or_else(|_| DEFAULT_NEG_RISK_WRAPPED_COLLATERAL.to_string()),
        )
        .context("parse NEG_RISK_WRAPPED_COLLATERAL")?;
        Ok(Self {
            exchange_operators,
            neg_risk_adapter,
            neg_risk_wrapped_collateral,
        })
    }
}

/// One wallet-replay invocation.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub wallet: Address,
    pub interval_secs: i64,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    /// Compute everything, write nothing.
    pub dry_run: bool,
    pub addresses: ChainAddresses,
}

/// What a completed replay reports back to the driver/CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub wallet: Address,
    pub events_processed: usize,
    pub ledger_entries: usize,
    pub sub_events: usize,
    pub snapshots: usize,
    pub open_token_count: usize,
    pub realized_total: f64,
    pub cashflow_total: f64,
    /// Stable hash over the emitted ledger rows; identical inputs must yield
    /// identical fingerprints across runs.
    pub fingerprint: u64,
    pub stats: WalletStats,
    pub dry_run: bool,
}

/// Run one wallet's replay end to end.
pub async fn run_wallet_replay(store: &LedgerStore, cfg: &ReplayConfig) -> Result<ReplaySummary> {
    let loaded = load_wallet_events(store, cfg.wallet, cfg.end_ts)
        .await
        .with_context(|| format!("load events for {:#x}", cfg.wallet))?;

    let catalog = ConditionCatalog::new(loaded.conditions.clone(), cfg.end_ts);
    let transfers_by_tx = index_transfers_by_tx(&loaded.transfers);
    let question_counts = loaded.question_counts.clone();

    let snapshotter = Snapshotter::new(cfg.interval_secs, cfg.start_ts, cfg.end_ts);
    let mut engine = LedgerEngine::new(
        cfg.wallet,
        &catalog,
        EngineConfig {
            neg_risk_adapter: cfg.addresses.neg_risk_adapter,
            neg_risk_wrapped_collateral: cfg.addresses.neg_risk_wrapped_collateral,
        },
        transfers_by_tx,
        question_counts,
        snapshotter,
    );

    let stream = UnifiedStream::new(
        loaded,
        &catalog,
        cfg.wallet,
        cfg.addresses.exchange_operators.clone(),
    );
    let mut events_processed = 0usize;
    for event in stream {
        engine.process(&event);
        events_processed += 1;
    }
    let output = engine.finish(cfg.end_ts);

    let summary = summarize(cfg, events_processed, &output);
    if !cfg.dry_run {
        let scope_start = cfg.start_ts.unwrap_or(0);
        let scope_end = cfg
            .end_ts
            .unwrap_or_else(|| output.snapshots.last().map(|s| s.at).unwrap_or(i64::MAX));
        store
            .write_replay(
                cfg.wallet,
                scope_start,
                scope_end,
                &output.entries,
                &output.snapshots,
            )
            .await
            .with_context(|| format!("write replay output for {:#x}", cfg.wallet))?;
    }

    info!(
        wallet = %format!("{:#x}", cfg.wallet),
        events = events_processed,
        entries = summary.ledger_entries,
        snapshots = summary.snapshots,
        realized = summary.realized_total,
        fingerprint = summary.fingerprint,
        dry_run = cfg.dry_run,
        "wallet replay complete"
    );
    Ok(summary)
}

fn summarize(cfg: &ReplayConfig, events_processed: usize, output: &EngineOutput) -> ReplaySummary {
    ReplaySummary {
        wallet: cfg.wallet,
        events_processed,
        ledger_entries: output.entries.len(),
        sub_events: output.sub_events.len(),
        snapshots: output.snapshots.len(),
        open_token_count: output.inventory.open_bucket_count(),
        realized_total: output.realized_total,
        cashflow_total: output.cashflow_total,
        fingerprint: fingerprint_entries(output),
        stats: WalletStats::compute(&output.entries, &output.sub_events),
        dry_run: cfg.dry_run,
    }
}

/// FNV-1a over a canonical rendering of every ledger row and snapshot.
fn fingerprint_entries(output: &EngineOutput) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    let mut absorb = |s: &str| {
        for b in s.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(PRIME);
        }
    };
    for e in &output.entries {
        absorb(&format!(
            "{}|{}|{:.9}|{:.9}|{:.9}|{:.9}|{}",
            e.stable_id,
            e.kind.as_str(),
            e.quantity,
            e.cash_delta,
            e.cost_basis,
            e.realized_pnl,
            e.entry_ts,
        ));
    }
    for s in &output.snapshots {
        absorb(&format!(
            "snap|{}|{:.9}|{:.9}|{:.9}|{}",
            s.at, s.realized_cum, s.cashflow_cum, s.open_cost, s.open_token_count,
        ));
    }
    hash
}
