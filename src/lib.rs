//! PolyLedger Backend Library
//!
//! Per-wallet PnL ledger engine for prediction-market chain events: replays a
//! wallet's ordered event history into an append-only ledger, FIFO inventory,
//! valuation snapshots, and period PnL aggregates.

pub mod ledger;

pub use ledger::{LedgerStore, ReplayConfig, ReplaySummary};
