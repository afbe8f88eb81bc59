//! Valuation Snapshotter
//!
//! Interleaves fixed-cadence portfolio snapshots into the replay. The engine
//! asks for due boundaries *before* applying each event, so a snapshot at
//! boundary B reflects every event with timestamp <= B and none after.
//!
//! Boundary schedule:
//! - with a `start_ts`, the first boundary is the first interval multiple at
//!   or after `start_ts`;
//! - otherwise it is the aligned floor of the first event's timestamp plus
//!   one interval;
//! - after the last event, one final snapshot is flushed at `end_ts` when it
//!   exceeds the last emitted boundary.
//!
//! Snapshot rows are ledger-derived: cumulative realized PnL and cashflow are
//! running sums over emitted entries, and open cost/value come from the
//! inventory under the then-current last-traded-price map.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// One portfolio valuation at a boundary timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub wallet: Address,
    pub at: i64,
    pub realized_cum: f64,
    pub unrealized: f64,
    pub open_cost: f64,
    pub open_value: f64,
    pub cashflow_cum: f64,
    pub open_token_count: u64,
}

/// Cadence state machine producing due boundary timestamps.
#[derive(Debug, Clone)]
pub struct Snapshotter {
    interval: i64,
    next_ts: Option<i64>,
    last_emitted: Option<i64>,
    end_ts: Option<i64>,
}

impl Snapshotter {
    pub fn new(interval_secs: i64, start_ts: Option<i64>, end_ts: Option<i64>) -> Self {
        assert!(interval_secs > 0, "snapshot interval must be positive");
        let next_ts = start_ts.map(|s| align_up(s, interval_secs));
        Self {
            interval: interval_secs,
            next_ts,
            last_emitted: None,
            end_ts,
        }
    }

    /// All boundaries due strictly before processing an event at `event_ts`.
    /// A boundary equal to the event time is NOT yet due: the snapshot at T
    /// must cover every entry with timestamp <= T, so it is emitted once a
    /// later event (or the final flush) proves T is complete.
    pub fn due_boundaries(&mut self, event_ts: i64) -> Vec<i64> {
        let interval = self.interval;
        let end_ts = self.end_ts;
        let next = self
            .next_ts
            .get_or_insert_with(|| align_down(event_ts, interval) + interval);
        let mut due = Vec::new();
        while *next < event_ts {
            if end_ts.map_or(true, |end| *next <= end) {
                due.push(*next);
            }
            *next += interval;
        }
        if let Some(last) = due.last() {
            self.last_emitted = Some(*last);
        }
        due
    }

    /// The final flush boundary at `end_ts`, when it exceeds everything
    /// already emitted.
    pub fn final_boundary(&mut self, end_ts: i64) -> Option<i64> {
        if self.last_emitted.map_or(true, |last| end_ts > last) {
            self.last_emitted = Some(end_ts);
            Some(end_ts)
        } else {
            None
        }
    }
}

#[inline]
fn align_down(ts: i64, interval: i64) -> i64 {
    ts.div_euclid(interval) * interval
}

#[inline]
fn align_up(ts: i64, interval: i64) -> i64 {
    align_down(ts + interval - 1, interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_boundary_follows_first_event_when_unanchored() {
        let mut snap = Snapshotter::new(3600, None, None);
        assert_eq!(snap.due_boundaries(100), Vec::<i64>::new());
        assert_eq!(snap.due_boundaries(4000), vec![3600]);
        assert_eq!(snap.due_boundaries(7300), vec![7200]);
    }

    #[test]
    fn start_ts_anchors_the_first_boundary() {
        let mut snap = Snapshotter::new(3600, Some(3600), None);
        assert_eq!(snap.due_boundaries(3599), Vec::<i64>::new());
        // A boundary equal to the event time waits for a later event so the
        // snapshot covers everything at that timestamp.
        assert_eq!(snap.due_boundaries(3600), Vec::<i64>::new());
        assert_eq!(snap.due_boundaries(3601), vec![3600]);

        let mut snap = Snapshotter::new(3600, Some(3601), None);
        assert_eq!(snap.due_boundaries(8000), vec![7200]);
    }

    #[test]
    fn gaps_emit_every_intermediate_boundary() {
        let mut snap = Snapshotter::new(100, None, None);
        snap.due_boundaries(10);
        assert_eq!(snap.due_boundaries(450), vec![100, 200, 300, 400]);
    }

    #[test]
    fn final_flush_only_past_last_boundary() {
        let mut snap = Snapshotter::new(3600, None, None);
        snap.due_boundaries(100);
        snap.due_boundaries(7300);
        assert_eq!(snap.final_boundary(7300), Some(7300));
        // A second flush at the same bound is a no-op.
        assert_eq!(snap.final_boundary(7300), None);
    }

    #[test]
    fn end_bound_caps_boundaries() {
        let mut snap = Snapshotter::new(100, None, Some(250));
        snap.due_boundaries(10);
        assert_eq!(snap.due_boundaries(500), vec![100, 200]);
    }
}
