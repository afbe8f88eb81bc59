//! Ledger Engine
//!
//! The replayable state machine at the heart of the pipeline. It consumes one
//! wallet's unified event stream in order and produces:
//!
//! 1. an append-only sequence of [`LedgerRecord`]s, each carrying the
//!    cost-basis decision for its event;
//! 2. a sequence of [`RealizedEvent`] sub-events (one per realization:
//!    sell, merge, redemption, resolution loss, fee), the sole input of the
//!    PnL aggregator;
//! 3. interval snapshots via the [`Snapshotter`].
//!
//! # Accounting identity
//!
//! Every handler maintains
//! `cash_in + proceeds - cash_out - cost_basis_lost = realized_pnl`, and the
//! per-entry realized PnL always equals the sum of the realized PnL of the
//! sub-events it produced. The invariant tests enforce both.
//!
//! # Degraded behavior
//!
//! Source inconsistencies (consume against an empty bucket, missing condition
//! rows, zero payout denominators) log at `warn` and continue with the
//! documented fallback; only inventory-contract breaches panic.
//!
//! # State machine per token bucket
//!
//! ```text
//!          add-lot                    add-lot / partial consume
//!  empty ───────────▶ long  ◀──────────────────────────────────┐
//!    ▲                  │                                      │
//!    └──────────────────┴──────────────────────────────────────┘
//!         consume exhausts last lot
//! ```
//!
//! No short positions are representable; a consume against `empty` yields
//! zero cost basis.

use crate::ledger::amount::{
    collateral_to_token_raw, ratio_or_zero, token_scalar, usdc_scalar,
};
use crate::ledger::conditions::ConditionCatalog;
use crate::ledger::events::{
    AdapterConversionRow, AdapterMergeRow, AdapterRedemptionRow, AdapterSplitRow, ChainEvent,
    EventKey, FeeRefundRow, FeeWithdrawalRow, MergeRow, RedemptionRow, ResolutionEvent, SplitRow,
    TradeRow, TransferRow,
};
use crate::ledger::inventory::{Inventory, LotConsumption, QTY_EPSILON};
use crate::ledger::snapshots::{Snapshot, Snapshotter};
use crate::ledger::token_ids::neg_risk_outcome_token_id;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use tracing::warn;

// =============================================================================
// EMITTED RECORDS
// =============================================================================

/// Ledger entry taxonomy. Serialized names are the wire/storage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    TradeBuy,
    TradeSell,
    Split,
    Merge,
    Redemption,
    AdapterSplit,
    AdapterMerge,
    AdapterRedemption,
    AdapterConversion,
    Mint,
    Burn,
    TransferIn,
    TransferOut,
    FeeRefund,
    FeeWithdrawal,
    ResolutionLoss,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::TradeBuy => "trade_buy",
            EntryKind::TradeSell => "trade_sell",
            EntryKind::Split => "split",
            EntryKind::Merge => "merge",
            EntryKind::Redemption => "redemption",
            EntryKind::AdapterSplit => "adapter_split",
            EntryKind::AdapterMerge => "adapter_merge",
            EntryKind::AdapterRedemption => "adapter_redemption",
            EntryKind::AdapterConversion => "adapter_conversion",
            EntryKind::Mint => "mint",
            EntryKind::Burn => "burn",
            EntryKind::TransferIn => "transfer_in",
            EntryKind::TransferOut => "transfer_out",
            EntryKind::FeeRefund => "fee_refund",
            EntryKind::FeeWithdrawal => "fee_withdrawal",
            EntryKind::ResolutionLoss => "resolution_loss",
        }
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub stable_id: String,
    pub wallet: Address,
    pub kind: EntryKind,
    pub tx_hash: Option<B256>,
    pub log_index: i64,
    pub block_number: i64,
    pub ts: i64,
    pub token_id: Option<U256>,
    pub condition_id: Option<B256>,
    pub quantity: f64,
    pub cash_delta: f64,
    pub unit_price: f64,
    pub cost_basis: f64,
    pub realized_pnl: f64,
    /// For sells, the quantity-weighted mean open time of consumed lots;
    /// otherwise the event timestamp.
    pub entry_ts: i64,
    pub metadata: serde_json::Value,
}

/// Realization taxonomy for the sub-event feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RealizedKind {
    Sell,
    Redemption,
    Merge,
    ResolutionLoss,
    Fee,
}

/// One realization: a matched (proceeds, cost basis) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizedEvent {
    pub kind: RealizedKind,
    pub at: i64,
    /// Open time of the consumed lot; absent for fees and for proceeds not
    /// covered by any lot (empty-bucket consumption).
    pub opened_at: Option<i64>,
    pub token_id: Option<U256>,
    pub proceeds: f64,
    pub cost_basis: f64,
    pub realized_pnl: f64,
}

/// Everything a finished replay hands to the writer and the aggregator.
#[derive(Debug)]
pub struct EngineOutput {
    pub entries: Vec<LedgerRecord>,
    pub sub_events: Vec<RealizedEvent>,
    pub snapshots: Vec<Snapshot>,
    pub inventory: Inventory,
    pub last_prices: BTreeMap<U256, f64>,
    pub realized_total: f64,
    pub cashflow_total: f64,
}

// =============================================================================
// ENGINE CONFIGURATION
// =============================================================================

/// Addresses the engine needs for negative-risk token derivation.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub neg_risk_adapter: Address,
    pub neg_risk_wrapped_collateral: Address,
}

// =============================================================================
// ENGINE
// =============================================================================

pub struct LedgerEngine<'a> {
    wallet: Address,
    catalog: &'a ConditionCatalog,
    config: EngineConfig,
    /// Raw per-tx transfer legs (pre-suppression), for mint/burn discovery.
    transfers_by_tx: HashMap<B256, Vec<TransferRow>>,
    /// `market_id -> question_count` for the conversion fallback.
    question_counts: HashMap<B256, u32>,

    inventory: Inventory,
    last_prices: BTreeMap<U256, f64>,
    entries: Vec<LedgerRecord>,
    sub_events: Vec<RealizedEvent>,
    snapshotter: Snapshotter,
    snapshots: Vec<Snapshot>,
    realized_cum: f64,
    cashflow_cum: f64,
    last_event_ts: i64,
}

impl<'a> LedgerEngine<'a> {
    pub fn new(
        wallet: Address,
        catalog: &'a ConditionCatalog,
        config: EngineConfig,
        transfers_by_tx: HashMap<B256, Vec<TransferRow>>,
        question_counts: HashMap<B256, u32>,
        snapshotter: Snapshotter,
    ) -> Self {
        Self {
            wallet,
            catalog,
            config,
            transfers_by_tx,
            question_counts,
            inventory: Inventory::new(),
            last_prices: BTreeMap::new(),
            entries: Vec::new(),
            sub_events: Vec::new(),
            snapshotter,
            snapshots: Vec::new(),
            realized_cum: 0.0,
            cashflow_cum: 0.0,
            last_event_ts: 0,
        }
    }

    /// Process one event from the unified stream, emitting any due snapshots
    /// first so they reflect pre-event state.
    pub fn process(&mut self, event: &ChainEvent) {
        let key = event.key();
        for boundary in self.snapshotter.due_boundaries(key.ts) {
            let snap = self.snapshot_at(boundary);
            self.snapshots.push(snap);
        }
        self.last_event_ts = self.last_event_ts.max(key.ts);

        match event {
            ChainEvent::Trade(r) => self.on_trade(r),
            ChainEvent::Split(r) => self.on_split(r),
            ChainEvent::Merge(r) => self.on_merge(r),
            ChainEvent::Redemption(r) => self.on_redemption(r),
            ChainEvent::AdapterSplit(r) => self.on_adapter_split(r),
            ChainEvent::AdapterMerge(r) => self.on_adapter_merge(r),
            ChainEvent::AdapterRedemption(r) => self.on_adapter_redemption(r),
            ChainEvent::AdapterConversion(r) => self.on_adapter_conversion(r),
            ChainEvent::Transfer(r) => self.on_transfer(r),
            ChainEvent::FeeRefund(r) => self.on_fee_refund(r),
            ChainEvent::FeeWithdrawal(r) => self.on_fee_withdrawal(r),
            ChainEvent::Resolution(r) => self.on_resolution(r),
        }
    }

    /// Read view of the running inventory (invariant checks, diagnostics).
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Flush the final snapshot and hand over the outputs.
    pub fn finish(mut self, end_ts: Option<i64>) -> EngineOutput {
        let flush_at = end_ts.unwrap_or(self.last_event_ts);
        if flush_at > 0 {
            if let Some(boundary) = self.snapshotter.final_boundary(flush_at) {
                let snap = self.snapshot_at(boundary);
                self.snapshots.push(snap);
            }
        }
        EngineOutput {
            entries: self.entries,
            sub_events: self.sub_events,
            snapshots: self.snapshots,
            inventory: self.inventory,
            last_prices: self.last_prices,
            realized_total: self.realized_cum,
            cashflow_total: self.cashflow_cum,
        }
    }

    // =========================================================================
    // HANDLERS
    // =========================================================================

    fn on_trade(&mut self, row: &TradeRow) {
        let is_maker = row.maker == self.wallet;
        let is_taker = row.taker == self.wallet;
        let is_buy = match (is_maker, is_taker) {
            (true, true) => {
                warn!(tx = %row.tx_hash, "self-fill trade, skipping");
                return;
            }
            (true, false) => row.is_maker_buy,
            (false, true) => row.is_taker_buy,
            (false, false) => {
                warn!(tx = %row.tx_hash, "trade row without wallet participation, skipping");
                return;
            }
        };

        let qty = token_scalar(row.token_amount);
        if is_buy {
            let usd = usdc_scalar(row.usdc_amount);
            let unit_price = ratio_or_zero(usd, qty);
            self.inventory.add(row.token_id, qty, unit_price, row.key.ts);
            self.note_trade_price(row.token_id, unit_price);
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(&row.key, EntryKind::TradeBuy, None),
                wallet: self.wallet,
                kind: EntryKind::TradeBuy,
                tx_hash: Some(row.tx_hash),
                log_index: row.key.log_index,
                block_number: row.key.block,
                ts: row.key.ts,
                token_id: Some(row.token_id),
                condition_id: self.catalog.lookup_token(row.token_id).map(|(c, _)| c),
                quantity: qty,
                cash_delta: -usd,
                unit_price,
                cost_basis: usd,
                realized_pnl: 0.0,
                entry_ts: row.key.ts,
                metadata: serde_json::Value::Null,
            });
        } else {
            // Proceeds net of fee, subtracted on the raw integers.
            let proceeds = usdc_scalar(row.usdc_amount.saturating_sub(row.fee));
            let unit_price = ratio_or_zero(proceeds, qty);
            let (cost_basis, consumed) = self.consume_logged(row.token_id, qty, &row.key);
            let entry_ts = weighted_open_ts(&consumed).unwrap_or(row.key.ts);
            self.emit_realizations(
                RealizedKind::Sell,
                row.key.ts,
                row.token_id,
                qty,
                proceeds,
                &consumed,
            );
            self.note_trade_price(row.token_id, unit_price);
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(&row.key, EntryKind::TradeSell, None),
                wallet: self.wallet,
                kind: EntryKind::TradeSell,
                tx_hash: Some(row.tx_hash),
                log_index: row.key.log_index,
                block_number: row.key.block,
                ts: row.key.ts,
                token_id: Some(row.token_id),
                condition_id: self.catalog.lookup_token(row.token_id).map(|(c, _)| c),
                quantity: qty,
                cash_delta: proceeds,
                unit_price,
                cost_basis,
                realized_pnl: proceeds - cost_basis,
                entry_ts,
                metadata: serde_json::Value::Null,
            });
        }
    }

    fn on_split(&mut self, row: &SplitRow) {
        let minted = self.split_minted_quantities(
            row.tx_hash,
            row.condition_id,
            Some(&row.partition),
            row.amount,
        );
        self.apply_split(
            EntryKind::Split,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.amount,
            minted,
            json!({ "partition": row.partition }),
        );
    }

    fn on_adapter_split(&mut self, row: &AdapterSplitRow) {
        let minted =
            self.split_minted_quantities(row.tx_hash, row.condition_id, None, row.amount);
        self.apply_split(
            EntryKind::AdapterSplit,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.amount,
            minted,
            serde_json::Value::Null,
        );
    }

    /// Minted quantities per token: same-tx mints to the wallet when present,
    /// else the partition/basket fallback at `amount * 10^12` per token.
    fn split_minted_quantities(
        &self,
        tx_hash: B256,
        condition_id: B256,
        partition: Option<&[U256]>,
        amount: U256,
    ) -> BTreeMap<U256, f64> {
        let minted = self.same_tx_mints(tx_hash, Some(condition_id));
        if !minted.is_empty() {
            return minted;
        }

        let mut fallback = BTreeMap::new();
        let per_token = token_scalar(collateral_to_token_raw(amount));
        match (partition, self.catalog.tokens_of(condition_id)) {
            (Some(partition), Some(tokens)) => {
                for index_set in partition {
                    let outcome = index_set_outcome(*index_set);
                    match tokens.get(outcome as usize) {
                        Some(token) => {
                            *fallback.entry(*token).or_insert(0.0) += per_token;
                        }
                        None => warn!(
                            condition = %condition_id,
                            outcome,
                            "partition references outcome beyond slot count"
                        ),
                    }
                }
            }
            (None, Some(tokens)) => {
                for token in tokens {
                    *fallback.entry(*token).or_insert(0.0) += per_token;
                }
            }
            (_, None) => {
                warn!(condition = %condition_id, "split for unknown condition, no basket fallback");
            }
        }
        fallback
    }

    fn apply_split(
        &mut self,
        kind: EntryKind,
        key: &EventKey,
        tx_hash: B256,
        condition_id: B256,
        amount: U256,
        minted: BTreeMap<U256, f64>,
        metadata: serde_json::Value,
    ) {
        let cost = usdc_scalar(amount);
        let total_minted: f64 = minted.values().sum();
        let unit_cost = ratio_or_zero(cost, total_minted);
        for (token, qty) in &minted {
            self.inventory.add(*token, *qty, unit_cost, key.ts);
        }
        self.push_entry(LedgerRecord {
            stable_id: self.stable_id(key, kind, None),
            wallet: self.wallet,
            kind,
            tx_hash: Some(tx_hash),
            log_index: key.log_index,
            block_number: key.block,
            ts: key.ts,
            token_id: None,
            condition_id: Some(condition_id),
            quantity: total_minted,
            cash_delta: -cost,
            unit_price: unit_cost,
            cost_basis: cost,
            realized_pnl: 0.0,
            entry_ts: key.ts,
            metadata,
        });
    }

    fn on_merge(&mut self, row: &MergeRow) {
        let burned = self.merge_burned_quantities(row.tx_hash, row.condition_id, row.amount);
        self.apply_merge(
            EntryKind::Merge,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.amount,
            burned,
        );
    }

    fn on_adapter_merge(&mut self, row: &AdapterMergeRow) {
        let burned = self.merge_burned_quantities(row.tx_hash, row.condition_id, row.amount);
        self.apply_merge(
            EntryKind::AdapterMerge,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.amount,
            burned,
        );
    }

    /// Burned quantities per token: same-tx burns from the wallet when
    /// present, else the full-basket fallback over all outcome tokens.
    fn merge_burned_quantities(
        &self,
        tx_hash: B256,
        condition_id: B256,
        amount: U256,
    ) -> BTreeMap<U256, f64> {
        let burned = self.same_tx_burns(tx_hash, Some(condition_id));
        if !burned.is_empty() {
            return burned;
        }
        let mut fallback = BTreeMap::new();
        let per_token = token_scalar(collateral_to_token_raw(amount));
        match self.catalog.tokens_of(condition_id) {
            Some(tokens) => {
                for token in tokens {
                    *fallback.entry(*token).or_insert(0.0) += per_token;
                }
            }
            None => {
                warn!(condition = %condition_id, "merge for unknown condition, no basket fallback");
            }
        }
        fallback
    }

    fn apply_merge(
        &mut self,
        kind: EntryKind,
        key: &EventKey,
        tx_hash: B256,
        condition_id: B256,
        amount: U256,
        burned: BTreeMap<U256, f64>,
    ) {
        let proceeds = usdc_scalar(amount);
        let total_burned: f64 = burned.values().sum();
        if total_burned < QTY_EPSILON {
            // Zero-quantity row by design; the accounting identity still holds
            // because no sub-events carry cost basis.
            warn!(condition = %condition_id, tx = %tx_hash, "merge with zero burned quantity");
            self.sub_events.push(RealizedEvent {
                kind: RealizedKind::Merge,
                at: key.ts,
                opened_at: None,
                token_id: None,
                proceeds,
                cost_basis: 0.0,
                realized_pnl: proceeds,
            });
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(key, kind, None),
                wallet: self.wallet,
                kind,
                tx_hash: Some(tx_hash),
                log_index: key.log_index,
                block_number: key.block,
                ts: key.ts,
                token_id: None,
                condition_id: Some(condition_id),
                quantity: 0.0,
                cash_delta: proceeds,
                unit_price: 0.0,
                cost_basis: 0.0,
                realized_pnl: proceeds,
                entry_ts: key.ts,
                metadata: serde_json::Value::Null,
            });
            return;
        }

        let unit_proceeds = ratio_or_zero(proceeds, total_burned);
        let mut cost_basis = 0.0;
        for (token, qty) in &burned {
            let (token_cost, consumed) = self.consume_logged(*token, *qty, key);
            cost_basis += token_cost;
            self.emit_realizations(
                RealizedKind::Merge,
                key.ts,
                *token,
                *qty,
                *qty * unit_proceeds,
                &consumed,
            );
        }
        self.push_entry(LedgerRecord {
            stable_id: self.stable_id(key, kind, None),
            wallet: self.wallet,
            kind,
            tx_hash: Some(tx_hash),
            log_index: key.log_index,
            block_number: key.block,
            ts: key.ts,
            token_id: None,
            condition_id: Some(condition_id),
            quantity: total_burned,
            cash_delta: proceeds,
            unit_price: unit_proceeds,
            cost_basis,
            realized_pnl: proceeds - cost_basis,
            entry_ts: key.ts,
            metadata: serde_json::Value::Null,
        });
    }

    fn on_redemption(&mut self, row: &RedemptionRow) {
        let mut burned = self.same_tx_burns(row.tx_hash, Some(row.condition_id));
        if burned.is_empty() {
            // Redeem-all semantics: the event names index sets, the wallet's
            // entire residual balance of each named token is burned.
            if let Some(tokens) = self.catalog.tokens_of(row.condition_id) {
                for index_set in &row.index_sets {
                    let outcome = index_set_outcome(*index_set);
                    if let Some(token) = tokens.get(outcome as usize) {
                        let qty = self.inventory.total_quantity(*token);
                        if qty >= QTY_EPSILON {
                            burned.insert(*token, qty);
                        }
                    }
                }
            } else {
                warn!(condition = %row.condition_id, "redemption for unknown condition");
            }
        }
        self.apply_redemption(
            EntryKind::Redemption,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.payout,
            burned,
            json!({ "index_sets": row.index_sets }),
        );
    }

    fn on_adapter_redemption(&mut self, row: &AdapterRedemptionRow) {
        let mut burned = self.same_tx_burns(row.tx_hash, Some(row.condition_id));
        if burned.is_empty() {
            // Adapter variant: explicit per-outcome amounts in the event.
            if let Some(tokens) = self.catalog.tokens_of(row.condition_id) {
                for (outcome, amount) in row.amounts.iter().enumerate() {
                    let qty = token_scalar(*amount);
                    if qty < QTY_EPSILON {
                        continue;
                    }
                    match tokens.get(outcome) {
                        Some(token) => {
                            burned.insert(*token, qty);
                        }
                        None => warn!(
                            condition = %row.condition_id,
                            outcome,
                            "redemption amount beyond outcome slot count"
                        ),
                    }
                }
            } else {
                warn!(condition = %row.condition_id, "adapter redemption for unknown condition");
            }
        }
        self.apply_redemption(
            EntryKind::AdapterRedemption,
            &row.key,
            row.tx_hash,
            row.condition_id,
            row.payout,
            burned,
            serde_json::Value::Null,
        );
    }

    fn apply_redemption(
        &mut self,
        kind: EntryKind,
        key: &EventKey,
        tx_hash: B256,
        condition_id: B256,
        payout_raw: U256,
        burned: BTreeMap<U256, f64>,
        metadata: serde_json::Value,
    ) {
        let payout = usdc_scalar(payout_raw);
        let total_burned: f64 = burned.values().sum();

        // Per-token unit proceeds follow the payout-ratio vector; when the
        // expected payout is zero (unresolved view, zero denominator) the
        // payout is distributed uniformly over burned quantity.
        let ratios: HashMap<U256, f64> = match self.catalog.get(condition_id) {
            Some(condition) => {
                let ratio_vec = self.catalog.payout_ratios(condition);
                burned
                    .keys()
                    .map(|token| {
                        let ratio = self
                            .catalog
                            .lookup_token(*token)
                            .and_then(|(_, i)| ratio_vec.get(i as usize).copied())
                            .unwrap_or(0.0);
                        (*token, ratio)
                    })
                    .collect()
            }
            None => {
                warn!(condition = %condition_id, "redemption without condition row, uniform payout");
                burned.keys().map(|t| (*t, 0.0)).collect()
            }
        };
        let expected: f64 = burned
            .iter()
            .map(|(token, qty)| qty * ratios.get(token).copied().unwrap_or(0.0))
            .sum();
        let uniform_unit = ratio_or_zero(payout, total_burned);
        let scale = if expected > 0.0 { payout / expected } else { 0.0 };

        let mut cost_basis = 0.0;
        for (token, qty) in &burned {
            let unit = if expected > 0.0 {
                ratios.get(token).copied().unwrap_or(0.0) * scale
            } else {
                uniform_unit
            };
            let (token_cost, consumed) = self.consume_logged(*token, *qty, key);
            cost_basis += token_cost;
            self.emit_realizations(
                RealizedKind::Redemption,
                key.ts,
                *token,
                *qty,
                *qty * unit,
                &consumed,
            );
        }
        self.push_entry(LedgerRecord {
            stable_id: self.stable_id(key, kind, None),
            wallet: self.wallet,
            kind,
            tx_hash: Some(tx_hash),
            log_index: key.log_index,
            block_number: key.block,
            ts: key.ts,
            token_id: None,
            condition_id: Some(condition_id),
            quantity: total_burned,
            cash_delta: payout,
            unit_price: uniform_unit,
            cost_basis,
            realized_pnl: payout - cost_basis,
            entry_ts: key.ts,
            metadata,
        });
    }

    fn on_adapter_conversion(&mut self, row: &AdapterConversionRow) {
        let mut burned = self.same_tx_burns(row.tx_hash, None);
        let mut minted = self.same_tx_mints(row.tx_hash, None);

        if burned.is_empty() && minted.is_empty() {
            // Reconstruct from the market's question table: converting an
            // index set burns the NO token of every flagged question and
            // mints the YES token of every unflagged one.
            let question_count = self.question_counts.get(&row.market_id).copied().unwrap_or(0);
            if question_count == 0 {
                warn!(
                    market = %row.market_id,
                    "conversion without transfer legs or question count, nothing to reconstruct"
                );
            }
            let qty = token_scalar(row.amount);
            for question in 0..question_count {
                let flagged = row.index_set.bit(question as usize);
                if flagged {
                    let no_token = neg_risk_outcome_token_id(
                        self.config.neg_risk_adapter,
                        self.config.neg_risk_wrapped_collateral,
                        row.market_id,
                        question as u8,
                        1,
                    );
                    *burned.entry(no_token).or_insert(0.0) += qty;
                } else {
                    let yes_token = neg_risk_outcome_token_id(
                        self.config.neg_risk_adapter,
                        self.config.neg_risk_wrapped_collateral,
                        row.market_id,
                        question as u8,
                        0,
                    );
                    *minted.entry(yes_token).or_insert(0.0) += qty;
                }
            }
        }

        let burned_qty: f64 = burned.values().sum();
        let minted_qty: f64 = minted.values().sum();

        let mut total_cost_basis = 0.0;
        for (token, qty) in &burned {
            let (cost, _) = self.consume_logged(*token, *qty, &row.key);
            total_cost_basis += cost;
        }

        // Basis shift, not a realization: the consumed basis is reallocated
        // across the minted side.
        if minted_qty >= QTY_EPSILON {
            let unit_cost = ratio_or_zero(total_cost_basis, minted_qty);
            for (token, qty) in &minted {
                let unit = if total_cost_basis > 0.0 {
                    unit_cost
                } else {
                    self.last_prices.get(token).copied().unwrap_or(0.0)
                };
                self.inventory.add(*token, *qty, unit, row.key.ts);
            }
        }

        self.push_entry(LedgerRecord {
            stable_id: self.stable_id(&row.key, EntryKind::AdapterConversion, None),
            wallet: self.wallet,
            kind: EntryKind::AdapterConversion,
            tx_hash: Some(row.tx_hash),
            log_index: row.key.log_index,
            block_number: row.key.block,
            ts: row.key.ts,
            token_id: None,
            condition_id: None,
            quantity: minted_qty,
            cash_delta: 0.0,
            unit_price: ratio_or_zero(total_cost_basis, minted_qty),
            cost_basis: total_cost_basis,
            realized_pnl: 0.0,
            entry_ts: row.key.ts,
            metadata: json!({
                "market_id": row.market_id,
                "index_set": row.index_set,
                "burned_qty": burned_qty,
                "minted_qty": minted_qty,
            }),
        });
    }

    fn on_transfer(&mut self, row: &TransferRow) {
        let qty = token_scalar(row.value);
        if row.to == self.wallet {
            let kind = if row.from == Address::ZERO {
                EntryKind::Mint
            } else {
                EntryKind::TransferIn
            };
            // Basis approximation for inbound tokens: current weighted-average
            // cost of the receiving bucket, else last traded price, else zero.
            let unit_price = if self.inventory.total_quantity(row.token_id) >= QTY_EPSILON {
                self.inventory.weighted_avg_unit_cost(row.token_id)
            } else {
                self.last_prices.get(&row.token_id).copied().unwrap_or(0.0)
            };
            self.inventory.add(row.token_id, qty, unit_price, row.key.ts);
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(&row.key, kind, None),
                wallet: self.wallet,
                kind,
                tx_hash: Some(row.tx_hash),
                log_index: row.key.log_index,
                block_number: row.key.block,
                ts: row.key.ts,
                token_id: Some(row.token_id),
                condition_id: self.catalog.lookup_token(row.token_id).map(|(c, _)| c),
                quantity: qty,
                cash_delta: 0.0,
                unit_price,
                cost_basis: qty * unit_price,
                realized_pnl: 0.0,
                entry_ts: row.key.ts,
                metadata: json!({ "from": row.from }),
            });
        } else if row.from == self.wallet {
            let kind = if row.to == Address::ZERO {
                EntryKind::Burn
            } else {
                EntryKind::TransferOut
            };
            // Gifts do not realize: the basis leaves the book at zero PnL.
            let (cost_basis, _) = self.consume_logged(row.token_id, qty, &row.key);
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(&row.key, kind, None),
                wallet: self.wallet,
                kind,
                tx_hash: Some(row.tx_hash),
                log_index: row.key.log_index,
                block_number: row.key.block,
                ts: row.key.ts,
                token_id: Some(row.token_id),
                condition_id: self.catalog.lookup_token(row.token_id).map(|(c, _)| c),
                quantity: qty,
                cash_delta: 0.0,
                unit_price: ratio_or_zero(cost_basis, qty),
                cost_basis,
                realized_pnl: 0.0,
                entry_ts: row.key.ts,
                metadata: json!({ "to": row.to }),
            });
        }
    }

    fn on_fee_refund(&mut self, row: &FeeRefundRow) {
        self.apply_fee(
            EntryKind::FeeRefund,
            &row.key,
            row.tx_hash,
            row.token_id,
            row.refund,
        );
    }

    fn on_fee_withdrawal(&mut self, row: &FeeWithdrawalRow) {
        self.apply_fee(
            EntryKind::FeeWithdrawal,
            &row.key,
            row.tx_hash,
            row.token_id,
            row.amount,
        );
    }

    fn apply_fee(
        &mut self,
        kind: EntryKind,
        key: &EventKey,
        tx_hash: B256,
        token_id: U256,
        raw: U256,
    ) {
        let amount = usdc_scalar(raw);
        self.sub_events.push(RealizedEvent {
            kind: RealizedKind::Fee,
            at: key.ts,
            opened_at: None,
            token_id: Some(token_id),
            proceeds: amount,
            cost_basis: 0.0,
            realized_pnl: amount,
        });
        self.push_entry(LedgerRecord {
            stable_id: self.stable_id(key, kind, None),
            wallet: self.wallet,
            kind,
            tx_hash: Some(tx_hash),
            log_index: key.log_index,
            block_number: key.block,
            ts: key.ts,
            token_id: Some(token_id),
            condition_id: None,
            quantity: 0.0,
            cash_delta: amount,
            unit_price: 0.0,
            cost_basis: 0.0,
            realized_pnl: amount,
            entry_ts: key.ts,
            metadata: serde_json::Value::Null,
        });
    }

    fn on_resolution(&mut self, row: &ResolutionEvent) {
        let Some(condition) = self.catalog.get(row.condition_id) else {
            warn!(condition = %row.condition_id, "resolution for unknown condition");
            return;
        };
        let ratios = self.catalog.payout_ratios(condition);
        let Some(tokens) = self.catalog.tokens_of(row.condition_id) else {
            return;
        };

        // Losing outcomes are liquidated involuntarily; winners stay open
        // until the wallet submits a redemption.
        for (outcome, token) in tokens.to_vec().into_iter().enumerate() {
            if ratios.get(outcome).copied().unwrap_or(0.0) > 0.0 {
                continue;
            }
            let qty = self.inventory.total_quantity(token);
            if qty < QTY_EPSILON {
                continue;
            }
            let (cost_basis, consumed) = self.inventory.consume(token, qty);
            for lot in &consumed {
                self.sub_events.push(RealizedEvent {
                    kind: RealizedKind::ResolutionLoss,
                    at: row.key.ts,
                    opened_at: Some(lot.opened_at),
                    token_id: Some(token),
                    proceeds: 0.0,
                    cost_basis: lot.cost_basis,
                    realized_pnl: -lot.cost_basis,
                });
            }
            self.push_entry(LedgerRecord {
                stable_id: self.stable_id(&row.key, EntryKind::ResolutionLoss, Some(token)),
                wallet: self.wallet,
                kind: EntryKind::ResolutionLoss,
                tx_hash: None,
                log_index: row.key.log_index,
                block_number: row.key.block,
                ts: row.key.ts,
                token_id: Some(token),
                condition_id: Some(row.condition_id),
                quantity: qty,
                cash_delta: 0.0,
                unit_price: ratio_or_zero(cost_basis, qty),
                cost_basis,
                realized_pnl: -cost_basis,
                entry_ts: row.key.ts,
                metadata: serde_json::Value::Null,
            });
        }
    }

    // =========================================================================
    // SHARED MACHINERY
    // =========================================================================

    fn push_entry(&mut self, entry: LedgerRecord) {
        self.realized_cum += entry.realized_pnl;
        self.cashflow_cum += entry.cash_delta;
        self.entries.push(entry);
    }

    /// Consume with the empty-bucket anomaly logged; shortfalls keep the
    /// replay alive with zero basis for the uncovered remainder.
    fn consume_logged(
        &mut self,
        token_id: U256,
        qty: f64,
        key: &EventKey,
    ) -> (f64, Vec<LotConsumption>) {
        let (cost_basis, consumed) = self.inventory.consume(token_id, qty);
        let covered: f64 = consumed.iter().map(|c| c.quantity).sum();
        if qty - covered >= QTY_EPSILON {
            warn!(
                token = %token_id,
                ts = key.ts,
                requested = qty,
                covered,
                "consume shortfall, uncovered quantity carries zero cost basis"
            );
        }
        (cost_basis, consumed)
    }

    /// One realized sub-event per consumed lot, proceeds allocated
    /// proportionally; an uncovered remainder gets a lot-less sub-event with
    /// zero basis so the entry and sub-event PnL sums stay equal.
    fn emit_realizations(
        &mut self,
        kind: RealizedKind,
        at: i64,
        token_id: U256,
        requested_qty: f64,
        total_proceeds: f64,
        consumed: &[LotConsumption],
    ) {
        if requested_qty < QTY_EPSILON {
            return;
        }
        let mut covered = 0.0;
        for lot in consumed {
            let share = total_proceeds * (lot.quantity / requested_qty);
            covered += lot.quantity;
            self.sub_events.push(RealizedEvent {
                kind,
                at,
                opened_at: Some(lot.opened_at),
                token_id: Some(token_id),
                proceeds: share,
                cost_basis: lot.cost_basis,
                realized_pnl: share - lot.cost_basis,
            });
        }
        let shortfall = requested_qty - covered;
        if shortfall >= QTY_EPSILON {
            let share = total_proceeds * (shortfall / requested_qty);
            self.sub_events.push(RealizedEvent {
                kind,
                at,
                opened_at: None,
                token_id: Some(token_id),
                proceeds: share,
                cost_basis: 0.0,
                realized_pnl: share,
            });
        }
    }

    /// Same-tx ERC-1155 mints to the wallet, optionally restricted to one
    /// condition's outcome tokens.
    fn same_tx_mints(&self, tx_hash: B256, condition: Option<B256>) -> BTreeMap<U256, f64> {
        self.same_tx_legs(tx_hash, condition, true)
    }

    /// Same-tx ERC-1155 burns from the wallet.
    fn same_tx_burns(&self, tx_hash: B256, condition: Option<B256>) -> BTreeMap<U256, f64> {
        self.same_tx_legs(tx_hash, condition, false)
    }

    fn same_tx_legs(
        &self,
        tx_hash: B256,
        condition: Option<B256>,
        inbound: bool,
    ) -> BTreeMap<U256, f64> {
        let mut legs = BTreeMap::new();
        let Some(transfers) = self.transfers_by_tx.get(&tx_hash) else {
            return legs;
        };
        for t in transfers {
            if t.from == t.to {
                continue;
            }
            let matches = if inbound {
                t.to == self.wallet
            } else {
                t.from == self.wallet
            };
            if !matches {
                continue;
            }
            if let Some(condition_id) = condition {
                match self.catalog.lookup_token(t.token_id) {
                    Some((c, _)) if c == condition_id => {}
                    _ => continue,
                }
            }
            let qty = token_scalar(t.value);
            if qty >= QTY_EPSILON {
                *legs.entry(t.token_id).or_insert(0.0) += qty;
            }
        }
        legs
    }

    fn note_trade_price(&mut self, token_id: U256, unit_price: f64) {
        if unit_price.is_finite() && unit_price > 0.0 {
            self.last_prices.insert(token_id, unit_price);
        }
    }

    fn snapshot_at(&self, at: i64) -> Snapshot {
        let open_cost = self.inventory.open_cost(None);
        let open_value = self.inventory.open_value(&self.last_prices, None);
        Snapshot {
            wallet: self.wallet,
            at,
            realized_cum: self.realized_cum,
            unrealized: open_value - open_cost,
            open_cost,
            open_value,
            cashflow_cum: self.cashflow_cum,
            open_token_count: self.inventory.open_bucket_count() as u64,
        }
    }

    fn stable_id(&self, key: &EventKey, kind: EntryKind, token: Option<U256>) -> String {
        match token {
            Some(token) => format!(
                "{:#x}:{}:{}:{}:{}:{token}",
                self.wallet,
                key.ts,
                key.block,
                key.log_index,
                kind.as_str()
            ),
            None => format!(
                "{:#x}:{}:{}:{}:{}",
                self.wallet,
                key.ts,
                key.block,
                key.log_index,
                kind.as_str()
            ),
        }
    }
}

/// Outcome index addressed by an index set: its lowest set bit.
#[inline]
fn index_set_outcome(index_set: U256) -> u32 {
    if index_set.is_zero() {
        0
    } else {
        index_set.trailing_zeros() as u32
    }
}

/// Quantity-weighted mean `opened_at` of consumed lots.
fn weighted_open_ts(consumed: &[LotConsumption]) -> Option<i64> {
    let qty: f64 = consumed.iter().map(|c| c.quantity).sum();
    if qty < QTY_EPSILON {
        return None;
    }
    let weighted: f64 = consumed
        .iter()
        .map(|c| c.quantity * c.opened_at as f64)
        .sum();
    Some((weighted / qty).round() as i64)
}
