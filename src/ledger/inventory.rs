//! FIFO Lot Book
//!
//! Per-token inventory of open lots. Lots are never merged, so consumption
//! order preserves acquisition identity: a consume pops from the head of the
//! token's deque, producing one consumption record per lot touched. Fractional
//! consumption is allowed; a lot is dropped once its residual quantity falls
//! below [`QTY_EPSILON`].
//!
//! The book is owned by exactly one wallet replay and is never shared across
//! wallets. A consume against an empty bucket is accepted and yields zero cost
//! basis; the caller decides whether that is an anomaly worth logging.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Residual-quantity threshold below which a lot (or bucket total) is
/// considered empty.
pub const QTY_EPSILON: f64 = 1e-7;

/// An immutable quantity-at-cost-at-time record, the FIFO unit of inventory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub quantity: f64,
    pub unit_cost: f64,
    pub opened_at: i64,
}

/// One lot's contribution to a consume operation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotConsumption {
    pub quantity: f64,
    pub unit_cost: f64,
    pub cost_basis: f64,
    pub opened_at: i64,
}

/// Per-wallet FIFO inventory keyed by outcome-token id.
///
/// `BTreeMap` keeps bucket iteration order deterministic across replays, which
/// the snapshot and fingerprint paths rely on.
#[derive(Debug, Default, Clone)]
pub struct Inventory {
    buckets: BTreeMap<U256, VecDeque<Lot>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lot to the token's bucket. Zero/dust quantities are ignored.
    pub fn add(&mut self, token_id: U256, quantity: f64, unit_cost: f64, opened_at: i64) {
        if !quantity.is_finite() || quantity < QTY_EPSILON {
            return;
        }
        let unit_cost = if unit_cost.is_finite() { unit_cost } else { 0.0 };
        self.buckets.entry(token_id).or_default().push_back(Lot {
            quantity,
            unit_cost,
            opened_at,
        });
    }

    /// Pop `quantity` from the head of the token's bucket.
    ///
    /// Returns the total cost basis consumed and one record per lot touched.
    /// If the bucket holds less than `quantity`, everything available is
    /// consumed and the shortfall carries zero cost basis (the records only
    /// cover what existed).
    pub fn consume(&mut self, token_id: U256, quantity: f64) -> (f64, Vec<LotConsumption>) {
        let mut consumed = Vec::new();
        let mut cost_basis = 0.0;
        if !quantity.is_finite() || quantity < QTY_EPSILON {
            return (cost_basis, consumed);
        }

        let Some(bucket) = self.buckets.get_mut(&token_id) else {
            return (cost_basis, consumed);
        };

        let mut remaining = quantity;
        while remaining >= QTY_EPSILON {
            let Some(front) = bucket.front_mut() else { break };
            let take = front.quantity.min(remaining);
            let cost = take * front.unit_cost;
            consumed.push(LotConsumption {
                quantity: take,
                unit_cost: front.unit_cost,
                cost_basis: cost,
                opened_at: front.opened_at,
            });
            cost_basis += cost;
            remaining -= take;
            front.quantity -= take;
            if front.quantity < QTY_EPSILON {
                bucket.pop_front();
            }
        }
        if bucket.is_empty() {
            self.buckets.remove(&token_id);
        }

        (cost_basis, consumed)
    }

    /// Total open quantity for a token.
    pub fn total_quantity(&self, token_id: U256) -> f64 {
        self.buckets
            .get(&token_id)
            .map(|b| b.iter().map(|l| l.quantity).sum())
            .unwrap_or(0.0)
    }

    /// Quantity-weighted average unit cost for a token, 0.0 when empty.
    pub fn weighted_avg_unit_cost(&self, token_id: U256) -> f64 {
        let Some(bucket) = self.buckets.get(&token_id) else {
            return 0.0;
        };
        let qty: f64 = bucket.iter().map(|l| l.quantity).sum();
        if qty < QTY_EPSILON {
            return 0.0;
        }
        bucket.iter().map(|l| l.quantity * l.unit_cost).sum::<f64>() / qty
    }

    /// Every non-empty bucket with its lots, in token-id order.
    pub fn open_positions(&self) -> impl Iterator<Item = (U256, &VecDeque<Lot>)> {
        self.buckets.iter().map(|(k, v)| (*k, v))
    }

    /// Number of non-empty buckets.
    pub fn open_bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Sum of lot cost bases, optionally restricted to lots opened inside
    /// `[range.0, range.1]`.
    pub fn open_cost(&self, opened_range: Option<(i64, i64)>) -> f64 {
        self.lots_in_range(opened_range)
            .map(|(_, l)| l.quantity * l.unit_cost)
            .sum()
    }

    /// Mark-to-price value of open lots under the given price map, with the
    /// same optional opened-at restriction. A token with no known price is
    /// valued at its own unit cost, so it contributes zero unrealized.
    pub fn open_value(
        &self,
        prices: &BTreeMap<U256, f64>,
        opened_range: Option<(i64, i64)>,
    ) -> f64 {
        self.lots_in_range(opened_range)
            .map(|(token, l)| {
                let price = prices.get(&token).copied().unwrap_or(l.unit_cost);
                l.quantity * price
            })
            .sum()
    }

    fn lots_in_range(
        &self,
        opened_range: Option<(i64, i64)>,
    ) -> impl Iterator<Item = (U256, &Lot)> {
        self.buckets
            .iter()
            .flat_map(|(token, bucket)| bucket.iter().map(move |l| (*token, l)))
            .filter(move |(_, l)| match opened_range {
                Some((start, end)) => l.opened_at >= start && l.opened_at <= end,
                None => true,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn consume_is_fifo_across_lots() {
        let mut inv = Inventory::new();
        inv.add(token(1), 10.0, 0.40, 100);
        inv.add(token(1), 10.0, 0.60, 200);

        let (cost, consumed) = inv.consume(token(1), 15.0);
        assert_eq!(consumed.len(), 2);
        assert_eq!(consumed[0].opened_at, 100);
        assert_eq!(consumed[0].quantity, 10.0);
        assert_eq!(consumed[1].opened_at, 200);
        assert!((consumed[1].quantity - 5.0).abs() < 1e-12);
        assert!((cost - (10.0 * 0.40 + 5.0 * 0.60)).abs() < 1e-12);
        assert!((inv.total_quantity(token(1)) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn partial_consume_leaves_residual_lot() {
        let mut inv = Inventory::new();
        inv.add(token(1), 100.0, 0.5, 100);
        let (cost, consumed) = inv.consume(token(1), 40.0);
        assert_eq!(consumed.len(), 1);
        assert!((cost - 20.0).abs() < 1e-12);
        assert!((inv.total_quantity(token(1)) - 60.0).abs() < 1e-12);
        // The surviving lot keeps its original open time and unit cost.
        let (_, lots) = inv.open_positions().next().unwrap();
        assert_eq!(lots[0].opened_at, 100);
        assert_eq!(lots[0].unit_cost, 0.5);
    }

    #[test]
    fn empty_bucket_consume_yields_zero_basis() {
        let mut inv = Inventory::new();
        let (cost, consumed) = inv.consume(token(9), 5.0);
        assert_eq!(cost, 0.0);
        assert!(consumed.is_empty());
    }

    #[test]
    fn shortfall_consumes_only_what_exists() {
        let mut inv = Inventory::new();
        inv.add(token(1), 3.0, 1.0, 10);
        let (cost, consumed) = inv.consume(token(1), 10.0);
        assert!((cost - 3.0).abs() < 1e-12);
        let total: f64 = consumed.iter().map(|c| c.quantity).sum();
        assert!((total - 3.0).abs() < 1e-12);
        assert_eq!(inv.open_bucket_count(), 0);
    }

    #[test]
    fn dust_residual_removes_lot() {
        let mut inv = Inventory::new();
        inv.add(token(1), 1.0, 0.5, 10);
        inv.consume(token(1), 1.0 - 1e-9);
        assert_eq!(inv.total_quantity(token(1)), 0.0);
        assert_eq!(inv.open_bucket_count(), 0);
    }

    #[test]
    fn weighted_avg_cost() {
        let mut inv = Inventory::new();
        inv.add(token(1), 10.0, 0.40, 100);
        inv.add(token(1), 30.0, 0.80, 200);
        assert!((inv.weighted_avg_unit_cost(token(1)) - 0.70).abs() < 1e-12);
        assert_eq!(inv.weighted_avg_unit_cost(token(2)), 0.0);
    }

    #[test]
    fn open_cost_and_value_respect_time_filter() {
        let mut inv = Inventory::new();
        inv.add(token(1), 10.0, 0.5, 100);
        inv.add(token(1), 10.0, 0.5, 900);

        assert!((inv.open_cost(None) - 10.0).abs() < 1e-12);
        assert!((inv.open_cost(Some((0, 500))) - 5.0).abs() < 1e-12);

        let mut prices = BTreeMap::new();
        prices.insert(token(1), 0.7);
        assert!((inv.open_value(&prices, None) - 14.0).abs() < 1e-12);
        // No price known: valued at unit cost.
        assert!((inv.open_value(&BTreeMap::new(), None) - 10.0).abs() < 1e-12);
    }
}
