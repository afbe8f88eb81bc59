//! Wallet Ledger Engine
//!
//! Deterministic, replayable per-wallet PnL accounting over the raw on-chain
//! event log of a prediction-market protocol.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        ReplayDriver                             │
//! │  (per wallet: load → merge → engine → atomic write)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ EventLoader │        │ Condition   │        │ TokenId     │
//! │ (bulk SQL)  │        │ Catalog     │        │ Derivation  │
//! └──────┬──────┘        └──────┬──────┘        └──────┬──────┘
//!        │                      │                      │
//!        ▼                      │                      │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      UnifiedStream                              │
//! │  k-way merge by (ts, block, log_index, tag)                     │
//! │  + synthetic resolutions + transfer suppression                 │
//! └──────────────────────────────┬──────────────────────────────────┘
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      LedgerEngine                               │
//! │  FIFO Inventory ── ledger entries ── realized sub-events        │
//! │        │                                  │                     │
//! │        ▼                                  ▼                     │
//! │   Snapshotter                       PnL Aggregator              │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Determinism Guarantees
//!
//! - Event ordering is a total order over `(ts, block, log_index, tag)`;
//!   synthetic resolutions pin `log_index = MAX` to land last in their block.
//! - All handler state lives in the engine; two replays over the same input
//!   produce byte-identical ledger rows, snapshots, and fingerprints.
//! - Raw chain integers stay 256-bit until the final scalar conversion.

pub mod amount;
pub mod conditions;
pub mod engine;
pub mod events;
pub mod inventory;
pub mod loader;
pub mod pnl;
pub mod replay;
pub mod snapshots;
pub mod stats;
pub mod store;
pub mod stream;
pub mod token_ids;


// Re-exports for convenience
pub use amount::{
    collateral_to_token_raw, parse_u256_dec, ratio_or_zero, token_scalar, usdc_scalar,
    TOKENS_PER_COLLATERAL_UNIT, TOKEN_SCALE, USDC_SCALE,
};
pub use conditions::{Condition, ConditionCatalog};
pub use engine::{
    EngineConfig, EngineOutput, EntryKind, LedgerEngine, LedgerRecord, RealizedEvent, RealizedKind,
};
pub use events::{
    AdapterConversionRow, AdapterMergeRow, AdapterRedemptionRow, AdapterSplitRow, ChainEvent,
    EventKey, EventTag, FeeRefundRow, FeeWithdrawalRow, MergeRow, RedemptionRow, ResolutionEvent,
    SplitRow, TradeRow, TransferRow, MAX_LOG_INDEX,
};
pub use inventory::{Inventory, Lot, LotConsumption, QTY_EPSILON};
pub use loader::{load_wallet_events, LoadedEvents};
pub use pnl::{aggregate, KindTotals, PnlMode, PnlReport};
pub use replay::{
    run_wallet_replay, ChainAddresses, ReplayConfig, ReplaySummary,
    DEFAULT_SNAPSHOT_INTERVAL_SECS,
};
pub use snapshots::{Snapshot, Snapshotter};
pub use stats::WalletStats;
pub use store::{encode_address, encode_b256, parse_address, parse_b256, LedgerStore};
pub use stream::{index_transfers_by_tx, UnifiedStream};
pub use token_ids::{
    collection_id, neg_risk_condition_id, neg_risk_outcome_token_id, neg_risk_question_id,
    outcome_token_id, position_id,
};
