//! Typed Chain-Event Records
//!
//! One struct per raw event family, a `ChainEvent` sum over them, and the
//! total ordering key used by the unified stream. The loader produces these
//! rows already parsed (addresses, hashes, 256-bit amounts), so everything
//! downstream is strongly typed.
//!
//! # Ordering Key (Total Order)
//!
//! Events are ordered by a 4-level deterministic key:
//! 1. `ts` — block timestamp (seconds)
//! 2. `block` — block number
//! 3. `log_index` — position within the block
//! 4. `tag` — event-family ordinal, a stable tie-break for synthetic events
//!
//! Synthetic resolution events use `log_index = MAX_LOG_INDEX` so that a
//! resolution always processes after every real event of its block.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Log index assigned to synthetic resolution events; orders them after all
/// real logs of the block.
pub const MAX_LOG_INDEX: i64 = i64::MAX;

/// Event-family ordinal for ordering-key tie-breaks. The numeric order is
/// documented and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventTag {
    Trade = 0,
    Split = 1,
    Merge = 2,
    Redemption = 3,
    AdapterSplit = 4,
    AdapterMerge = 5,
    AdapterRedemption = 6,
    AdapterConversion = 7,
    Transfer = 8,
    FeeRefund = 9,
    FeeWithdrawal = 10,
    Resolution = 11,
}

/// The `(timestamp, block, log_index, type)` total ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventKey {
    pub ts: i64,
    pub block: i64,
    pub log_index: i64,
    pub tag: EventTag,
}

impl PartialOrd for EventKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts
            .cmp(&other.ts)
            .then_with(|| self.block.cmp(&other.block))
            .then_with(|| self.log_index.cmp(&other.log_index))
            .then_with(|| self.tag.cmp(&other.tag))
    }
}

/// An `OrderFilled` row; the wallet may appear as maker or taker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub maker: Address,
    pub taker: Address,
    pub token_id: U256,
    pub usdc_amount: U256,
    pub token_amount: U256,
    pub fee: U256,
    pub is_maker_buy: bool,
    pub is_taker_buy: bool,
}

/// Collateral locked into a full outcome basket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub stakeholder: Address,
    pub collateral: Address,
    pub parent_collection_id: B256,
    pub condition_id: B256,
    pub partition: Vec<U256>,
    pub amount: U256,
}

/// A full outcome basket burned back into collateral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub stakeholder: Address,
    pub collateral: Address,
    pub parent_collection_id: B256,
    pub condition_id: B256,
    pub partition: Vec<U256>,
    pub amount: U256,
}

/// Post-resolution payout claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedemptionRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub redeemer: Address,
    pub collateral: Address,
    pub parent_collection_id: B256,
    pub condition_id: B256,
    pub index_sets: Vec<U256>,
    pub payout: U256,
}

/// Negative-risk adapter split (wrapped collateral into a question basket).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterSplitRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub stakeholder: Address,
    pub condition_id: B256,
    pub amount: U256,
}

/// Negative-risk adapter merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterMergeRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub stakeholder: Address,
    pub condition_id: B256,
    pub amount: U256,
}

/// Negative-risk adapter redemption with explicit per-outcome amounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterRedemptionRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub redeemer: Address,
    pub condition_id: B256,
    pub amounts: Vec<U256>,
    pub payout: U256,
}

/// Negative-risk position conversion (NO set swapped for the complementary
/// YES set across a market's questions).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterConversionRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub stakeholder: Address,
    pub market_id: B256,
    pub index_set: U256,
    pub amount: U256,
}

/// Raw ERC-1155 single transfer touching the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub operator: Address,
    pub from: Address,
    pub to: Address,
    pub token_id: U256,
    pub value: U256,
}

/// Exchange fee refunded to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeRefundRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub module: Address,
    pub order_hash: Option<B256>,
    pub to: Address,
    pub token_id: U256,
    pub refund: U256,
}

/// Fee-module withdrawal paid out to the wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeWithdrawalRow {
    pub key: EventKey,
    pub tx_hash: B256,
    pub module: Address,
    pub to: Address,
    pub token_id: U256,
    pub amount: U256,
    pub fee_charged: U256,
}

/// Synthetic per-condition resolution marker injected by the stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionEvent {
    pub key: EventKey,
    pub condition_id: B256,
}

/// The polymorphic event consumed by the ledger engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChainEvent {
    Trade(TradeRow),
    Split(SplitRow),
    Merge(MergeRow),
    Redemption(RedemptionRow),
    AdapterSplit(AdapterSplitRow),
    AdapterMerge(AdapterMergeRow),
    AdapterRedemption(AdapterRedemptionRow),
    AdapterConversion(AdapterConversionRow),
    Transfer(TransferRow),
    FeeRefund(FeeRefundRow),
    FeeWithdrawal(FeeWithdrawalRow),
    Resolution(ResolutionEvent),
}

impl ChainEvent {
    pub fn key(&self) -> EventKey {
        match self {
            ChainEvent::Trade(r) => r.key,
            ChainEvent::Split(r) => r.key,
            ChainEvent::Merge(r) => r.key,
            ChainEvent::Redemption(r) => r.key,
            ChainEvent::AdapterSplit(r) => r.key,
            ChainEvent::AdapterMerge(r) => r.key,
            ChainEvent::AdapterRedemption(r) => r.key,
            ChainEvent::AdapterConversion(r) => r.key,
            ChainEvent::Transfer(r) => r.key,
            ChainEvent::FeeRefund(r) => r.key,
            ChainEvent::FeeWithdrawal(r) => r.key,
            ChainEvent::Resolution(r) => r.key,
        }
    }

    /// The transaction hash, absent for synthetic events.
    pub fn tx_hash(&self) -> Option<B256> {
        match self {
            ChainEvent::Trade(r) => Some(r.tx_hash),
            ChainEvent::Split(r) => Some(r.tx_hash),
            ChainEvent::Merge(r) => Some(r.tx_hash),
            ChainEvent::Redemption(r) => Some(r.tx_hash),
            ChainEvent::AdapterSplit(r) => Some(r.tx_hash),
            ChainEvent::AdapterMerge(r) => Some(r.tx_hash),
            ChainEvent::AdapterRedemption(r) => Some(r.tx_hash),
            ChainEvent::AdapterConversion(r) => Some(r.tx_hash),
            ChainEvent::Transfer(r) => Some(r.tx_hash),
            ChainEvent::FeeRefund(r) => Some(r.tx_hash),
            ChainEvent::FeeWithdrawal(r) => Some(r.tx_hash),
            ChainEvent::Resolution(_) => None,
        }
    }
}
