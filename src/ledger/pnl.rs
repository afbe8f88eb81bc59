//! PnL Aggregator
//!
//! Post-filters the realized sub-event sequence by period and mode, and
//! optionally adds unrealized PnL over open lots. Read-only over immutable
//! replay output; no engine state is touched.
//!
//! # Modes
//!
//! | mode                    | realized filter                               | unrealized |
//! |-------------------------|-----------------------------------------------|------------|
//! | `RealizedPeriod`        | `at ∈ [S,E]` and lot opened in `[S,E]` (or no lot) | none  |
//! | `RealizedWithHistory`   | `at ∈ [S,E]`                                  | none       |
//! | `PeriodPlusUnrealized`  | as `RealizedPeriod`                           | lots opened in `[S,E]` |
//! | `Total`                 | as `RealizedWithHistory`                      | all open lots |

use crate::ledger::engine::{RealizedEvent, RealizedKind};
use crate::ledger::inventory::Inventory;
use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregation mode for a period PnL query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PnlMode {
    RealizedPeriod,
    RealizedWithHistory,
    PeriodPlusUnrealized,
    Total,
}

/// Per-kind realized totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KindTotals {
    pub proceeds: f64,
    pub cost_basis: f64,
    pub realized_pnl: f64,
    pub count: u64,
}

impl KindTotals {
    fn absorb(&mut self, sub: &RealizedEvent) {
        self.proceeds += sub.proceeds;
        self.cost_basis += sub.cost_basis;
        self.realized_pnl += sub.realized_pnl;
        self.count += 1;
    }
}

/// Result of one period PnL query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PnlReport {
    pub sells: KindTotals,
    pub redemptions: KindTotals,
    pub merges: KindTotals,
    pub resolution_losses: KindTotals,
    pub fees: KindTotals,
    pub realized_total: f64,
    pub open_cost: f64,
    pub open_value: f64,
    pub unrealized: f64,
    pub total: f64,
}

/// Answer a period PnL query over a finished replay's outputs.
pub fn aggregate(
    sub_events: &[RealizedEvent],
    inventory: &Inventory,
    prices: &BTreeMap<U256, f64>,
    mode: PnlMode,
    period_start: i64,
    period_end: i64,
) -> PnlReport {
    let mut report = PnlReport::default();

    let require_open_in_period = matches!(
        mode,
        PnlMode::RealizedPeriod | PnlMode::PeriodPlusUnrealized
    );
    for sub in sub_events {
        if sub.at < period_start || sub.at > period_end {
            continue;
        }
        if require_open_in_period {
            if let Some(opened_at) = sub.opened_at {
                if opened_at < period_start || opened_at > period_end {
                    continue;
                }
            }
        }
        let bucket = match sub.kind {
            RealizedKind::Sell => &mut report.sells,
            RealizedKind::Redemption => &mut report.redemptions,
            RealizedKind::Merge => &mut report.merges,
            RealizedKind::ResolutionLoss => &mut report.resolution_losses,
            RealizedKind::Fee => &mut report.fees,
        };
        bucket.absorb(sub);
    }
    report.realized_total = report.sells.realized_pnl
        + report.redemptions.realized_pnl
        + report.merges.realized_pnl
        + report.resolution_losses.realized_pnl
        + report.fees.realized_pnl;

    let lot_range = match mode {
        PnlMode::PeriodPlusUnrealized => Some((period_start, period_end)),
        PnlMode::Total => None,
        PnlMode::RealizedPeriod | PnlMode::RealizedWithHistory => {
            report.total = report.realized_total;
            return report;
        }
    };
    report.open_cost = inventory.open_cost(lot_range);
    report.open_value = inventory.open_value(prices, lot_range);
    report.unrealized = report.open_value - report.open_cost;
    report.total = report.realized_total + report.unrealized;
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(kind: RealizedKind, at: i64, opened_at: Option<i64>, pnl: f64) -> RealizedEvent {
        RealizedEvent {
            kind,
            at,
            opened_at,
            token_id: Some(U256::from(1u64)),
            proceeds: pnl.max(0.0),
            cost_basis: (-pnl).max(0.0),
            realized_pnl: pnl,
        }
    }

    #[test]
    fn realized_period_excludes_lots_opened_before_period() {
        let subs = vec![
            sub(RealizedKind::Sell, 150, Some(50), 10.0), // lot predates period
            sub(RealizedKind::Sell, 150, Some(120), 4.0),
            sub(RealizedKind::Fee, 150, None, 1.0), // no lot: included
        ];
        let inv = Inventory::new();
        let prices = BTreeMap::new();

        let period = aggregate(&subs, &inv, &prices, PnlMode::RealizedPeriod, 100, 200);
        assert_eq!(period.realized_total, 5.0);

        let history = aggregate(&subs, &inv, &prices, PnlMode::RealizedWithHistory, 100, 200);
        assert_eq!(history.realized_total, 15.0);
    }

    #[test]
    fn events_outside_period_are_excluded_in_all_modes() {
        let subs = vec![sub(RealizedKind::Redemption, 90, Some(80), 7.0)];
        let inv = Inventory::new();
        let prices = BTreeMap::new();
        let report = aggregate(&subs, &inv, &prices, PnlMode::Total, 100, 200);
        assert_eq!(report.realized_total, 0.0);
    }

    #[test]
    fn unrealized_modes_use_lot_open_times() {
        let mut inv = Inventory::new();
        inv.add(U256::from(1u64), 10.0, 0.5, 150); // inside period
        inv.add(U256::from(1u64), 10.0, 0.5, 50); // before period
        let mut prices = BTreeMap::new();
        prices.insert(U256::from(1u64), 0.8);

        let period = aggregate(&[], &inv, &prices, PnlMode::PeriodPlusUnrealized, 100, 200);
        assert!((period.unrealized - 3.0).abs() < 1e-9);
        assert!((period.open_cost - 5.0).abs() < 1e-9);

        let total = aggregate(&[], &inv, &prices, PnlMode::Total, 100, 200);
        assert!((total.unrealized - 6.0).abs() < 1e-9);
        assert!((total.total - 6.0).abs() < 1e-9);
    }

    #[test]
    fn kinds_are_grouped_separately() {
        let subs = vec![
            sub(RealizedKind::Sell, 150, Some(120), 4.0),
            sub(RealizedKind::Merge, 160, Some(120), -2.0),
            sub(RealizedKind::ResolutionLoss, 170, Some(120), -5.0),
        ];
        let inv = Inventory::new();
        let prices = BTreeMap::new();
        let report = aggregate(&subs, &inv, &prices, PnlMode::RealizedWithHistory, 100, 200);
        assert_eq!(report.sells.count, 1);
        assert_eq!(report.merges.count, 1);
        assert_eq!(report.resolution_losses.count, 1);
        assert_eq!(report.realized_total, -3.0);
    }
}
