//! Wallet Summary Statistics
//!
//! Leaderboard-grade aggregates derived purely from a replay's realized
//! sub-events and ledger entries. Win rate counts position realizations
//! (sells, merges, redemptions, resolution losses); fee credits are excluded
//! from the win/loss denominator but included in totals.

use crate::ledger::engine::{EntryKind, LedgerRecord, RealizedEvent, RealizedKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletStats {
    pub trade_buys: u64,
    pub trade_sells: u64,
    pub realization_events: u64,
    pub winning_events: u64,
    pub losing_events: u64,
    /// Wins over decided (non-flat) realizations, if any.
    pub win_rate: Option<f64>,
    /// Gross gains over gross losses, if losses are non-zero.
    pub profit_factor: Option<f64>,
    pub gross_gains: f64,
    pub gross_losses: f64,
    pub realized_from_sells: f64,
    pub realized_from_merges: f64,
    pub realized_from_redemptions: f64,
    pub realized_from_resolution_losses: f64,
    pub realized_from_fees: f64,
    pub realized_total: f64,
    pub volume_bought: f64,
    pub volume_sold: f64,
}

impl WalletStats {
    pub fn compute(entries: &[LedgerRecord], sub_events: &[RealizedEvent]) -> Self {
        let mut stats = Self::default();

        for entry in entries {
            match entry.kind {
                EntryKind::TradeBuy => {
                    stats.trade_buys += 1;
                    stats.volume_bought += -entry.cash_delta;
                }
                EntryKind::TradeSell => {
                    stats.trade_sells += 1;
                    stats.volume_sold += entry.cash_delta;
                }
                _ => {}
            }
        }

        for sub in sub_events {
            match sub.kind {
                RealizedKind::Sell => stats.realized_from_sells += sub.realized_pnl,
                RealizedKind::Merge => stats.realized_from_merges += sub.realized_pnl,
                RealizedKind::Redemption => stats.realized_from_redemptions += sub.realized_pnl,
                RealizedKind::ResolutionLoss => {
                    stats.realized_from_resolution_losses += sub.realized_pnl
                }
                RealizedKind::Fee => {
                    stats.realized_from_fees += sub.realized_pnl;
                    stats.realized_total += sub.realized_pnl;
                    continue;
                }
            }
            stats.realized_total += sub.realized_pnl;
            stats.realization_events += 1;
            if sub.realized_pnl > 0.0 {
                stats.winning_events += 1;
                stats.gross_gains += sub.realized_pnl;
            } else if sub.realized_pnl < 0.0 {
                stats.losing_events += 1;
                stats.gross_losses += -sub.realized_pnl;
            }
        }

        let decided = stats.winning_events + stats.losing_events;
        if decided > 0 {
            stats.win_rate = Some(stats.winning_events as f64 / decided as f64);
        }
        if stats.gross_losses > 0.0 {
            stats.profit_factor = Some(stats.gross_gains / stats.gross_losses);
        }
        stats
    }
}
