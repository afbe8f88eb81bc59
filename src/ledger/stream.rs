//! Unified Event Stream
//!
//! Deterministic k-way merge over the per-family event vectors produced by
//! the loader. Each family arrives already sorted by its ordering key, so the
//! merge holds one head per family in a `BinaryHeap` and never materializes a
//! globally-sorted copy of all events.
//!
//! Two extra responsibilities live here because they are ordering concerns,
//! not accounting concerns:
//!
//! 1. **Synthetic resolutions**: for every condition the catalog reports as
//!    resolved (inside the replay bound), a `Resolution` event is injected at
//!    `(resolved_at, resolved_block, MAX_LOG_INDEX, Resolution)` — strictly
//!    after all real events of that block.
//!
//! 2. **Transfer suppression**: raw ERC-1155 transfers that are the token leg
//!    of a bookkeeping event (same tx hash as a split/merge/redemption or any
//!    adapter event) are dropped, as are exchange-internal transfers inside a
//!    trade transaction (operator is one of the exchange contracts) and
//!    self-transfers. The bookkeeping handlers reconstruct those token
//!    movements themselves from the per-tx transfer index.

use crate::ledger::conditions::ConditionCatalog;
use crate::ledger::events::{
    ChainEvent, EventKey, EventTag, ResolutionEvent, TransferRow, MAX_LOG_INDEX,
};
use crate::ledger::loader::LoadedEvents;
use alloy_primitives::{Address, B256};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

/// Per-tx index of every raw transfer touching the wallet, built before
/// suppression so bookkeeping handlers can see their same-tx mint/burn legs.
pub fn index_transfers_by_tx(transfers: &[TransferRow]) -> HashMap<B256, Vec<TransferRow>> {
    let mut by_tx: HashMap<B256, Vec<TransferRow>> = HashMap::new();
    for t in transfers {
        by_tx.entry(t.tx_hash).or_default().push(t.clone());
    }
    by_tx
}

/// The merged, ordered, suppression-filtered event sequence for one wallet.
pub struct UnifiedStream {
    sources: Vec<std::vec::IntoIter<ChainEvent>>,
    heads: Vec<Option<ChainEvent>>,
    heap: BinaryHeap<Reverse<(EventKey, usize)>>,
    bookkeeping_txs: HashSet<B256>,
    trade_txs: HashSet<B256>,
    exchange_operators: HashSet<Address>,
    wallet: Address,
    suppressed: u64,
}

impl UnifiedStream {
    pub fn new(
        events: LoadedEvents,
        catalog: &ConditionCatalog,
        wallet: Address,
        exchange_operators: HashSet<Address>,
    ) -> Self {
        let bookkeeping_txs: HashSet<B256> = events
            .splits
            .iter()
            .map(|r| r.tx_hash)
            .chain(events.merges.iter().map(|r| r.tx_hash))
            .chain(events.redemptions.iter().map(|r| r.tx_hash))
            .chain(events.adapter_splits.iter().map(|r| r.tx_hash))
            .chain(events.adapter_merges.iter().map(|r| r.tx_hash))
            .chain(events.adapter_redemptions.iter().map(|r| r.tx_hash))
            .chain(events.adapter_conversions.iter().map(|r| r.tx_hash))
            .collect();
        let trade_txs: HashSet<B256> = events.trades.iter().map(|r| r.tx_hash).collect();

        let mut resolutions: Vec<ChainEvent> = catalog
            .resolved_conditions()
            .map(|c| {
                ChainEvent::Resolution(ResolutionEvent {
                    key: EventKey {
                        ts: c.resolved_at,
                        block: c.resolved_block,
                        log_index: MAX_LOG_INDEX,
                        tag: EventTag::Resolution,
                    },
                    condition_id: c.condition_id,
                })
            })
            .collect();
        resolutions.sort_by_key(|e| e.key());

        let families: Vec<Vec<ChainEvent>> = vec![
            events.trades.into_iter().map(ChainEvent::Trade).collect(),
            events.splits.into_iter().map(ChainEvent::Split).collect(),
            events.merges.into_iter().map(ChainEvent::Merge).collect(),
            events
                .redemptions
                .into_iter()
                .map(ChainEvent::Redemption)
                .collect(),
            events
                .adapter_splits
                .into_iter()
                .map(ChainEvent::AdapterSplit)
                .collect(),
            events
                .adapter_merges
                .into_iter()
                .map(ChainEvent::AdapterMerge)
                .collect(),
            events
                .adapter_redemptions
                .into_iter()
                .map(ChainEvent::AdapterRedemption)
                .collect(),
            events
                .adapter_conversions
                .into_iter()
                .map(ChainEvent::AdapterConversion)
                .collect(),
            events
                .transfers
                .into_iter()
                .map(ChainEvent::Transfer)
                .collect(),
            events
                .fee_refunds
                .into_iter()
                .map(ChainEvent::FeeRefund)
                .collect(),
            events
                .fee_withdrawals
                .into_iter()
                .map(ChainEvent::FeeWithdrawal)
                .collect(),
            resolutions,
        ];

        let mut stream = Self {
            sources: families.into_iter().map(|v| v.into_iter()).collect(),
            heads: Vec::new(),
            heap: BinaryHeap::new(),
            bookkeeping_txs,
            trade_txs,
            exchange_operators,
            wallet,
            suppressed: 0,
        };
        stream.heads = (0..stream.sources.len()).map(|_| None).collect();
        for idx in 0..stream.sources.len() {
            stream.advance(idx);
        }
        stream
    }

    fn advance(&mut self, source_idx: usize) {
        if let Some(event) = self.sources[source_idx].next() {
            self.heap.push(Reverse((event.key(), source_idx)));
            self.heads[source_idx] = Some(event);
        } else {
            self.heads[source_idx] = None;
        }
    }

    /// Whether a raw transfer must be dropped from the unified sequence.
    fn is_suppressed(&self, t: &TransferRow) -> bool {
        if t.from == self.wallet && t.to == self.wallet {
            return true;
        }
        if self.bookkeeping_txs.contains(&t.tx_hash) {
            return true;
        }
        if self.trade_txs.contains(&t.tx_hash) && self.exchange_operators.contains(&t.operator) {
            return true;
        }
        false
    }

    /// Count of transfers dropped so far, for replay diagnostics.
    pub fn suppressed_transfers(&self) -> u64 {
        self.suppressed
    }
}

impl Iterator for UnifiedStream {
    type Item = ChainEvent;

    fn next(&mut self) -> Option<ChainEvent> {
        loop {
            let Reverse((_, source_idx)) = self.heap.pop()?;
            let event = self.heads[source_idx]
                .take()
                .expect("heap entry without a staged head");
            self.advance(source_idx);

            if let ChainEvent::Transfer(t) = &event {
                if self.is_suppressed(t) {
                    self.suppressed += 1;
                    continue;
                }
            }
            return Some(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::conditions::Condition;
    use alloy_primitives::U256;

    fn wallet() -> Address {
        Address::from([0xAAu8; 20])
    }

    fn tx(n: u8) -> B256 {
        B256::from([n; 32])
    }

    fn key(ts: i64, log_index: i64, tag: EventTag) -> EventKey {
        EventKey {
            ts,
            block: ts / 10,
            log_index,
            tag,
        }
    }

    fn transfer(ts: i64, log_index: i64, tx_hash: B256, operator: Address) -> TransferRow {
        TransferRow {
            key: key(ts, log_index, EventTag::Transfer),
            tx_hash,
            operator,
            from: Address::from([0xBBu8; 20]),
            to: wallet(),
            token_id: U256::from(1u64),
            value: U256::from(10u64),
        }
    }

    fn split(ts: i64, log_index: i64, tx_hash: B256) -> crate::ledger::events::SplitRow {
        crate::ledger::events::SplitRow {
            key: key(ts, log_index, EventTag::Split),
            tx_hash,
            stakeholder: wallet(),
            collateral: Address::from([2u8; 20]),
            parent_collection_id: B256::ZERO,
            condition_id: tx(9),
            partition: vec![U256::from(1u64), U256::from(2u64)],
            amount: U256::from(1_000_000u64),
        }
    }

    fn empty_catalog() -> ConditionCatalog {
        ConditionCatalog::new(vec![], None)
    }

    #[test]
    fn merge_orders_across_families() {
        let mut events = LoadedEvents::default();
        events.transfers.push(transfer(200, 0, tx(1), Address::ZERO));
        events.splits.push(split(100, 0, tx(2)));

        let keys: Vec<i64> =
            UnifiedStream::new(events, &empty_catalog(), wallet(), HashSet::new())
                .map(|e| e.key().ts)
                .collect();
        assert_eq!(keys, vec![100, 200]);
    }

    #[test]
    fn bookkeeping_leg_transfers_are_dropped() {
        let mut events = LoadedEvents::default();
        events.splits.push(split(100, 0, tx(2)));
        // Same tx as the split: token leg, suppressed.
        events.transfers.push(transfer(100, 1, tx(2), Address::ZERO));
        // Unrelated tx: survives.
        events.transfers.push(transfer(300, 0, tx(3), Address::ZERO));

        let mut stream = UnifiedStream::new(events, &empty_catalog(), wallet(), HashSet::new());
        let survivors: Vec<ChainEvent> = stream.by_ref().collect();
        assert_eq!(survivors.len(), 2);
        assert!(matches!(survivors[0], ChainEvent::Split(_)));
        assert!(matches!(&survivors[1], ChainEvent::Transfer(t) if t.key.ts == 300));
        assert_eq!(stream.suppressed_transfers(), 1);
    }

    #[test]
    fn exchange_internal_transfers_inside_trades_are_dropped() {
        let exchange = Address::from([0xEEu8; 20]);
        let mut events = LoadedEvents::default();
        events.trades.push(crate::ledger::events::TradeRow {
            key: key(100, 0, EventTag::Trade),
            tx_hash: tx(4),
            maker: Address::from([1u8; 20]),
            taker: wallet(),
            token_id: U256::from(1u64),
            usdc_amount: U256::from(1_000_000u64),
            token_amount: U256::from(2_000_000_000_000_000_000u64),
            fee: U256::ZERO,
            is_maker_buy: false,
            is_taker_buy: true,
        });
        events.transfers.push(transfer(100, 1, tx(4), exchange));
        // Same tx but a third-party operator: kept.
        events
            .transfers
            .push(transfer(100, 2, tx(4), Address::from([0x11u8; 20])));

        let survivors: Vec<ChainEvent> = UnifiedStream::new(
            events,
            &empty_catalog(),
            wallet(),
            HashSet::from([exchange]),
        )
        .collect();
        assert_eq!(survivors.len(), 2);
        assert!(matches!(survivors[0], ChainEvent::Trade(_)));
        assert!(matches!(survivors[1], ChainEvent::Transfer(_)));
    }

    #[test]
    fn self_transfers_are_dropped() {
        let mut events = LoadedEvents::default();
        let mut t = transfer(100, 0, tx(5), Address::ZERO);
        t.from = wallet();
        t.to = wallet();
        events.transfers.push(t);
        assert_eq!(
            UnifiedStream::new(events, &empty_catalog(), wallet(), HashSet::new()).count(),
            0
        );
    }

    #[test]
    fn resolution_is_injected_after_block_events() {
        let condition = Condition {
            condition_id: tx(9),
            oracle: Address::from([1u8; 20]),
            outcome_slot_count: 2,
            parent_collection_id: B256::ZERO,
            collateral_token: Address::from([2u8; 20]),
            payout_numerators: vec![1, 0],
            payout_denominator: 1,
            resolved_at: 100,
            resolved_block: 10,
            is_resolved: true,
        };
        let catalog = ConditionCatalog::new(vec![condition], None);

        let mut events = LoadedEvents::default();
        events.transfers.push(transfer(100, 500, tx(6), Address::ZERO));

        let ordered: Vec<ChainEvent> =
            UnifiedStream::new(events, &catalog, wallet(), HashSet::new()).collect();
        assert_eq!(ordered.len(), 2);
        assert!(matches!(ordered[0], ChainEvent::Transfer(_)));
        assert!(matches!(&ordered[1], ChainEvent::Resolution(r) if r.condition_id == tx(9)));
    }
}
