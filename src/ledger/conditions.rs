//! Condition Catalog
//!
//! In-memory, per-replay view of market definitions: outcome slot counts,
//! resolution payouts, and the derived outcome-token identifiers for each
//! condition. The catalog is built once from the `conditions` table before a
//! replay begins and is immutable afterwards.
//!
//! The view is time-bounded: a condition whose `resolved_at` falls after the
//! replay's end bound is presented as unresolved, so historical replays never
//! see resolutions from their future.

use crate::ledger::token_ids::outcome_token_id;
use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One market definition as prepared/resolved on chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub condition_id: B256,
    pub oracle: Address,
    pub outcome_slot_count: u32,
    pub parent_collection_id: B256,
    pub collateral_token: Address,
    /// Empty until resolution.
    pub payout_numerators: Vec<u64>,
    pub payout_denominator: u64,
    /// 0 until resolution.
    pub resolved_at: i64,
    pub resolved_block: i64,
    pub is_resolved: bool,
}

impl Condition {
    /// Payout ratio for one outcome index; 0 for a zero denominator or an
    /// out-of-range index.
    pub fn payout_ratio(&self, outcome_index: u32) -> f64 {
        if self.payout_denominator == 0 {
            return 0.0;
        }
        match self.payout_numerators.get(outcome_index as usize) {
            Some(num) => *num as f64 / self.payout_denominator as f64,
            None => 0.0,
        }
    }
}

/// Catalog of all conditions with cached token derivations and a reverse
/// token-id index.
#[derive(Debug, Default)]
pub struct ConditionCatalog {
    by_id: HashMap<B256, Condition>,
    /// Outcome-token tuple per condition, index-aligned with outcome slots.
    outcome_tokens: HashMap<B256, Vec<U256>>,
    /// token id -> (condition, outcome index).
    token_index: HashMap<U256, (B256, u32)>,
    /// Replay end bound; resolutions after this are hidden.
    end_ts: Option<i64>,
}

impl ConditionCatalog {
    pub fn new(conditions: Vec<Condition>, end_ts: Option<i64>) -> Self {
        let mut catalog = Self {
            end_ts,
            ..Self::default()
        };
        for condition in conditions {
            catalog.insert(condition);
        }
        catalog
    }

    fn insert(&mut self, condition: Condition) {
        let tokens: Vec<U256> = (0..condition.outcome_slot_count)
            .map(|i| {
                outcome_token_id(
                    condition.parent_collection_id,
                    condition.condition_id,
                    i,
                    condition.collateral_token,
                )
            })
            .collect();
        for (i, token) in tokens.iter().enumerate() {
            self.token_index
                .insert(*token, (condition.condition_id, i as u32));
        }
        self.outcome_tokens.insert(condition.condition_id, tokens);
        self.by_id.insert(condition.condition_id, condition);
    }

    pub fn get(&self, condition_id: B256) -> Option<&Condition> {
        self.by_id.get(&condition_id)
    }

    /// The ordered outcome-token tuple for a condition, if known.
    pub fn tokens_of(&self, condition_id: B256) -> Option<&[U256]> {
        self.outcome_tokens.get(&condition_id).map(|v| v.as_slice())
    }

    /// Reverse lookup: which condition/outcome a token id belongs to.
    pub fn lookup_token(&self, token_id: U256) -> Option<(B256, u32)> {
        self.token_index.get(&token_id).copied()
    }

    /// Whether the condition is resolved inside the replay's time bound.
    pub fn is_resolved(&self, condition: &Condition) -> bool {
        condition.is_resolved
            && condition.resolved_at > 0
            && self.end_ts.map_or(true, |end| condition.resolved_at <= end)
    }

    /// Payout ratios under the time-bounded view: all zeros while unresolved.
    pub fn payout_ratios(&self, condition: &Condition) -> Vec<f64> {
        if !self.is_resolved(condition) {
            return vec![0.0; condition.outcome_slot_count as usize];
        }
        (0..condition.outcome_slot_count)
            .map(|i| condition.payout_ratio(i))
            .collect()
    }

    /// Conditions resolved within the bound, for synthetic resolution events.
    pub fn resolved_conditions(&self) -> impl Iterator<Item = &Condition> {
        self.by_id.values().filter(|c| self.is_resolved(c))
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_condition(id: u8, resolved_at: i64, payouts: Option<(Vec<u64>, u64)>) -> Condition {
        let (payout_numerators, payout_denominator) = payouts.clone().unwrap_or((vec![], 0));
        Condition {
            condition_id: B256::from([id; 32]),
            oracle: Address::from([1u8; 20]),
            outcome_slot_count: 2,
            parent_collection_id: B256::ZERO,
            collateral_token: Address::from([2u8; 20]),
            payout_numerators,
            payout_denominator,
            resolved_at,
            resolved_block: resolved_at,
            is_resolved: payouts.is_some(),
        }
    }

    #[test]
    fn derives_one_token_per_outcome_slot() {
        let catalog = ConditionCatalog::new(vec![binary_condition(1, 0, None)], None);
        let cond_id = B256::from([1u8; 32]);
        let tokens = catalog.tokens_of(cond_id).unwrap();
        assert_eq!(tokens.len(), 2);
        assert_ne!(tokens[0], tokens[1]);
        assert_eq!(catalog.lookup_token(tokens[1]), Some((cond_id, 1)));
    }

    #[test]
    fn payout_ratios_follow_numerators() {
        let cond = binary_condition(1, 500, Some((vec![1, 0], 1)));
        let catalog = ConditionCatalog::new(vec![cond], None);
        let cond = catalog.get(B256::from([1u8; 32])).unwrap();
        assert_eq!(catalog.payout_ratios(cond), vec![1.0, 0.0]);
    }

    #[test]
    fn zero_denominator_yields_zero_ratios() {
        let mut cond = binary_condition(1, 500, Some((vec![1, 0], 1)));
        cond.payout_denominator = 0;
        assert_eq!(cond.payout_ratio(0), 0.0);
    }

    #[test]
    fn end_bound_hides_future_resolutions() {
        let cond = binary_condition(1, 900, Some((vec![1, 0], 1)));
        let bounded = ConditionCatalog::new(vec![cond.clone()], Some(800));
        let c = bounded.get(B256::from([1u8; 32])).unwrap();
        assert!(!bounded.is_resolved(c));
        assert_eq!(bounded.payout_ratios(c), vec![0.0, 0.0]);
        assert_eq!(bounded.resolved_conditions().count(), 0);

        let unbounded = ConditionCatalog::new(vec![cond], None);
        let c = unbounded.get(B256::from([1u8; 32])).unwrap();
        assert!(unbounded.is_resolved(c));
        assert_eq!(unbounded.resolved_conditions().count(), 1);
    }
}
