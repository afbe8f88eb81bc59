//! Outcome-Token Identifier Derivation
//!
//! Maps `(parent_collection, condition, outcome_index, collateral)` to the
//! ERC-1155 token identifier the conditional-tokens contract would assign:
//!
//! ```text
//! collection_id = keccak256(parent_collection_id ++ condition_id ++ index_set)
//! position_id   = uint256(keccak256(collateral ++ collection_id))
//! ```
//!
//! where `index_set = 1 << outcome_index` and all operands are packed
//! big-endian (address = 20 bytes, hashes and uints = 32 bytes).
//!
//! The negative-risk adapter wraps collateral and derives per-question
//! condition ids from the market id: the question id is the market id with
//! its low byte replaced by the question index, and the condition is prepared
//! by the adapter with two outcome slots.
//!
//! These derivations are the bridge from bookkeeping events to inventory
//! buckets when the ERC-1155 transfer legs are absent, so they must match the
//! on-chain contract bit for bit.

use alloy_primitives::{keccak256, Address, B256, U256};

/// Second-level index-set hash: the collection id for one outcome of a
/// condition under a parent collection.
pub fn collection_id(parent_collection_id: B256, condition_id: B256, index_set: U256) -> B256 {
    let mut buf = [0u8; 96];
    buf[0..32].copy_from_slice(parent_collection_id.as_slice());
    buf[32..64].copy_from_slice(condition_id.as_slice());
    buf[64..96].copy_from_slice(&index_set.to_be_bytes::<32>());
    keccak256(buf)
}

/// Final position id (the ERC-1155 token id) for a collection under a
/// collateral token.
pub fn position_id(collateral: Address, collection: B256) -> U256 {
    let mut buf = [0u8; 52];
    buf[0..20].copy_from_slice(collateral.as_slice());
    buf[20..52].copy_from_slice(collection.as_slice());
    U256::from_be_bytes::<32>(keccak256(buf).0)
}

/// Derived token id for one outcome index of a condition.
pub fn outcome_token_id(
    parent_collection_id: B256,
    condition_id: B256,
    outcome_index: u32,
    collateral: Address,
) -> U256 {
    let index_set = U256::from(1u64) << (outcome_index as usize);
    position_id(
        collateral,
        collection_id(parent_collection_id, condition_id, index_set),
    )
}

/// Question id for question `index` of a negative-risk market: the market id
/// with its low byte replaced by the index.
pub fn neg_risk_question_id(market_id: B256, question_index: u8) -> B256 {
    let mut bytes = market_id.0;
    bytes[31] = question_index;
    B256::from(bytes)
}

/// Condition id the adapter prepares for a question: binary, oracle = adapter.
pub fn neg_risk_condition_id(adapter: Address, question_id: B256) -> B256 {
    let mut buf = [0u8; 84];
    buf[0..20].copy_from_slice(adapter.as_slice());
    buf[20..52].copy_from_slice(question_id.as_slice());
    buf[52..84].copy_from_slice(&U256::from(2u64).to_be_bytes::<32>());
    keccak256(buf)
}

/// Outcome token id for `(market, question, outcome)` in a negative-risk
/// market: zero parent collection, wrapped collateral.
pub fn neg_risk_outcome_token_id(
    adapter: Address,
    wrapped_collateral: Address,
    market_id: B256,
    question_index: u8,
    outcome_index: u32,
) -> U256 {
    let question_id = neg_risk_question_id(market_id, question_index);
    let condition_id = neg_risk_condition_id(adapter, question_id);
    outcome_token_id(B256::ZERO, condition_id, outcome_index, wrapped_collateral)
}
