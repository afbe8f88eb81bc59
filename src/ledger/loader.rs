//! Event Loader
//!
//! Bulk-fetches every event row a wallet participates in, per family, plus
//! the full condition list and the negative-risk question-count table. Each
//! family comes back sorted by its ordering key, so the unified stream can
//! merge without a global sort. All loading happens before the replay starts;
//! the state machine itself never touches the store.
//!
//! A malformed row is a fatal per-wallet failure (the batch driver records it
//! and moves on), never a silent skip: a dropped event would corrupt the
//! wallet's inventory for the rest of the replay.

use crate::ledger::amount::parse_u256_dec;
use crate::ledger::conditions::Condition;
use crate::ledger::events::{
    AdapterConversionRow, AdapterMergeRow, AdapterRedemptionRow, AdapterSplitRow, EventKey,
    EventTag, FeeRefundRow, FeeWithdrawalRow, MergeRow, RedemptionRow, SplitRow, TradeRow,
    TransferRow,
};
use crate::ledger::store::{encode_address, parse_address, parse_b256, LedgerStore};
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::debug;

/// All raw rows one replay needs, fetched in one pass.
#[derive(Debug, Default)]
pub struct LoadedEvents {
    pub trades: Vec<TradeRow>,
    pub splits: Vec<SplitRow>,
    pub merges: Vec<MergeRow>,
    pub redemptions: Vec<RedemptionRow>,
    pub adapter_splits: Vec<AdapterSplitRow>,
    pub adapter_merges: Vec<AdapterMergeRow>,
    pub adapter_redemptions: Vec<AdapterRedemptionRow>,
    pub adapter_conversions: Vec<AdapterConversionRow>,
    pub transfers: Vec<TransferRow>,
    pub fee_refunds: Vec<FeeRefundRow>,
    pub fee_withdrawals: Vec<FeeWithdrawalRow>,
    pub conditions: Vec<Condition>,
    pub question_counts: std::collections::HashMap<B256, u32>,
}

impl LoadedEvents {
    pub fn event_count(&self) -> usize {
        self.trades.len()
            + self.splits.len()
            + self.merges.len()
            + self.redemptions.len()
            + self.adapter_splits.len()
            + self.adapter_merges.len()
            + self.adapter_redemptions.len()
            + self.adapter_conversions.len()
            + self.transfers.len()
            + self.fee_refunds.len()
            + self.fee_withdrawals.len()
    }
}

/// Fetch everything for `(wallet, end_ts)`. `end_ts = None` means unbounded.
pub async fn load_wallet_events(
    store: &LedgerStore,
    wallet: Address,
    end_ts: Option<i64>,
) -> Result<LoadedEvents> {
    let wallet_str = encode_address(wallet);
    let end = end_ts.unwrap_or(i64::MAX);
    let conn = store.conn().lock().await;

    let events = LoadedEvents {
        trades: load_trades(&conn, &wallet_str, end)?,
        splits: load_splits(&conn, &wallet_str, end)?,
        merges: load_merges(&conn, &wallet_str, end)?,
        redemptions: load_redemptions(&conn, &wallet_str, end)?,
        adapter_splits: load_adapter_splits(&conn, &wallet_str, end)?,
        adapter_merges: load_adapter_merges(&conn, &wallet_str, end)?,
        adapter_redemptions: load_adapter_redemptions(&conn, &wallet_str, end)?,
        adapter_conversions: load_adapter_conversions(&conn, &wallet_str, end)?,
        transfers: load_transfers(&conn, &wallet_str, end)?,
        fee_refunds: load_fee_refunds(&conn, &wallet_str, end)?,
        fee_withdrawals: load_fee_withdrawals(&conn, &wallet_str, end)?,
        conditions: load_conditions(&conn)?,
        question_counts: load_question_counts(&conn)?,
    };
    debug!(
        wallet = %wallet_str,
        events = events.event_count(),
        conditions = events.conditions.len(),
        "loaded wallet events"
    );
    Ok(events)
}

const ORDER: &str = "ORDER BY block_ts ASC, block_number ASC, log_index ASC";

fn key(ts: i64, block: i64, log_index: i64, tag: EventTag) -> EventKey {
    EventKey {
        ts,
        block,
        log_index,
        tag,
    }
}

fn parse_u256_list(json: &str) -> Result<Vec<U256>> {
    let raw: Vec<serde_json::Value> =
        serde_json::from_str(json).with_context(|| format!("invalid json array {json:?}"))?;
    raw.iter()
        .map(|v| match v {
            serde_json::Value::Number(n) => parse_u256_dec(&n.to_string()),
            serde_json::Value::String(s) => parse_u256_dec(s),
            other => anyhow::bail!("unsupported amount encoding {other:?}"),
        })
        .collect()
}

fn load_trades(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<TradeRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, maker, taker, token_id, \
                usdc_amount, token_amount, fee, is_maker_buy, is_taker_buy \
         FROM trades WHERE (maker = ?1 OR taker = ?1) AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
            row.get::<_, bool>(10)?,
            row.get::<_, bool>(11)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, maker, taker, token, usdc, amount, fee, mb, tb) =
            row.context("read trade row")?;
        out.push(TradeRow {
            key: key(ts, block, log_index, EventTag::Trade),
            tx_hash: parse_b256(&tx)?,
            maker: parse_address(&maker)?,
            taker: parse_address(&taker)?,
            token_id: parse_u256_dec(&token)?,
            usdc_amount: parse_u256_dec(&usdc)?,
            token_amount: parse_u256_dec(&amount)?,
            fee: parse_u256_dec(&fee)?,
            is_maker_buy: mb,
            is_taker_buy: tb,
        });
    }
    Ok(out)
}

fn load_splits(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<SplitRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, stakeholder, collateral, \
                parent_collection_id, condition_id, partition_json, amount \
         FROM splits WHERE stakeholder = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, stakeholder, collateral, parent, condition, partition, amount) =
            row.context("read split row")?;
        out.push(SplitRow {
            key: key(ts, block, log_index, EventTag::Split),
            tx_hash: parse_b256(&tx)?,
            stakeholder: parse_address(&stakeholder)?,
            collateral: parse_address(&collateral)?,
            parent_collection_id: parse_b256(&parent)?,
            condition_id: parse_b256(&condition)?,
            partition: parse_u256_list(&partition)?,
            amount: parse_u256_dec(&amount)?,
        });
    }
    Ok(out)
}

fn load_merges(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<MergeRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, stakeholder, collateral, \
                parent_collection_id, condition_id, partition_json, amount \
         FROM merges WHERE stakeholder = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, stakeholder, collateral, parent, condition, partition, amount) =
            row.context("read merge row")?;
        out.push(MergeRow {
            key: key(ts, block, log_index, EventTag::Merge),
            tx_hash: parse_b256(&tx)?,
            stakeholder: parse_address(&stakeholder)?,
            collateral: parse_address(&collateral)?,
            parent_collection_id: parse_b256(&parent)?,
            condition_id: parse_b256(&condition)?,
            partition: parse_u256_list(&partition)?,
            amount: parse_u256_dec(&amount)?,
        });
    }
    Ok(out)
}

fn load_redemptions(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<RedemptionRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, redeemer, collateral, \
                parent_collection_id, condition_id, index_sets_json, payout \
         FROM redemptions WHERE redeemer = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
            row.get::<_, String>(9)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, redeemer, collateral, parent, condition, index_sets, payout) =
            row.context("read redemption row")?;
        out.push(RedemptionRow {
            key: key(ts, block, log_index, EventTag::Redemption),
            tx_hash: parse_b256(&tx)?,
            redeemer: parse_address(&redeemer)?,
            collateral: parse_address(&collateral)?,
            parent_collection_id: parse_b256(&parent)?,
            condition_id: parse_b256(&condition)?,
            index_sets: parse_u256_list(&index_sets)?,
            payout: parse_u256_dec(&payout)?,
        });
    }
    Ok(out)
}

fn load_adapter_splits(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<AdapterSplitRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, stakeholder, condition_id, amount \
         FROM adapter_splits WHERE stakeholder = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, stakeholder, condition, amount) =
            row.context("read adapter split row")?;
        out.push(AdapterSplitRow {
            key: key(ts, block, log_index, EventTag::AdapterSplit),
            tx_hash: parse_b256(&tx)?,
            stakeholder: parse_address(&stakeholder)?,
            condition_id: parse_b256(&condition)?,
            amount: parse_u256_dec(&amount)?,
        });
    }
    Ok(out)
}

fn load_adapter_merges(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<AdapterMergeRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, stakeholder, condition_id, amount \
         FROM adapter_merges WHERE stakeholder = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, stakeholder, condition, amount) =
            row.context("read adapter merge row")?;
        out.push(AdapterMergeRow {
            key: key(ts, block, log_index, EventTag::AdapterMerge),
            tx_hash: parse_b256(&tx)?,
            stakeholder: parse_address(&stakeholder)?,
            condition_id: parse_b256(&condition)?,
            amount: parse_u256_dec(&amount)?,
        });
    }
    Ok(out)
}

fn load_adapter_redemptions(
    conn: &Connection,
    wallet: &str,
    end: i64,
) -> Result<Vec<AdapterRedemptionRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, redeemer, condition_id, \
                amounts_json, payout \
         FROM adapter_redemptions WHERE redeemer = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, redeemer, condition, amounts, payout) =
            row.context("read adapter redemption row")?;
        out.push(AdapterRedemptionRow {
            key: key(ts, block, log_index, EventTag::AdapterRedemption),
            tx_hash: parse_b256(&tx)?,
            redeemer: parse_address(&redeemer)?,
            condition_id: parse_b256(&condition)?,
            amounts: parse_u256_list(&amounts)?,
            payout: parse_u256_dec(&payout)?,
        });
    }
    Ok(out)
}

fn load_adapter_conversions(
    conn: &Connection,
    wallet: &str,
    end: i64,
) -> Result<Vec<AdapterConversionRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, stakeholder, market_id, \
                index_set, amount \
         FROM adapter_conversions WHERE stakeholder = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, stakeholder, market, index_set, amount) =
            row.context("read adapter conversion row")?;
        out.push(AdapterConversionRow {
            key: key(ts, block, log_index, EventTag::AdapterConversion),
            tx_hash: parse_b256(&tx)?,
            stakeholder: parse_address(&stakeholder)?,
            market_id: parse_b256(&market)?,
            index_set: parse_u256_dec(&index_set)?,
            amount: parse_u256_dec(&amount)?,
        });
    }
    Ok(out)
}

fn load_transfers(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<TransferRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, operator, from_addr, to_addr, \
                token_id, value \
         FROM transfers WHERE (from_addr = ?1 OR to_addr = ?1) AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, operator, from, to, token, value) =
            row.context("read transfer row")?;
        out.push(TransferRow {
            key: key(ts, block, log_index, EventTag::Transfer),
            tx_hash: parse_b256(&tx)?,
            operator: parse_address(&operator)?,
            from: parse_address(&from)?,
            to: parse_address(&to)?,
            token_id: parse_u256_dec(&token)?,
            value: parse_u256_dec(&value)?,
        });
    }
    Ok(out)
}

fn load_fee_refunds(conn: &Connection, wallet: &str, end: i64) -> Result<Vec<FeeRefundRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, module, order_hash, to_addr, \
                token_id, refund \
         FROM fee_refunds WHERE to_addr = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, Option<String>>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, module, order_hash, to, token, refund) =
            row.context("read fee refund row")?;
        out.push(FeeRefundRow {
            key: key(ts, block, log_index, EventTag::FeeRefund),
            tx_hash: parse_b256(&tx)?,
            module: parse_address(&module)?,
            order_hash: order_hash.as_deref().map(parse_b256).transpose()?,
            to: parse_address(&to)?,
            token_id: parse_u256_dec(&token)?,
            refund: parse_u256_dec(&refund)?,
        });
    }
    Ok(out)
}

fn load_fee_withdrawals(
    conn: &Connection,
    wallet: &str,
    end: i64,
) -> Result<Vec<FeeWithdrawalRow>> {
    let sql = format!(
        "SELECT tx_hash, log_index, block_number, block_ts, module, to_addr, token_id, \
                amount, fee_charged \
         FROM fee_withdrawals WHERE to_addr = ?1 AND block_ts <= ?2 {ORDER}"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map(params![wallet, end], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (tx, log_index, block, ts, module, to, token, amount, fee_charged) =
            row.context("read fee withdrawal row")?;
        out.push(FeeWithdrawalRow {
            key: key(ts, block, log_index, EventTag::FeeWithdrawal),
            tx_hash: parse_b256(&tx)?,
            module: parse_address(&module)?,
            to: parse_address(&to)?,
            token_id: parse_u256_dec(&token)?,
            amount: parse_u256_dec(&amount)?,
            fee_charged: parse_u256_dec(&fee_charged)?,
        });
    }
    Ok(out)
}

fn load_conditions(conn: &Connection) -> Result<Vec<Condition>> {
    let mut stmt = conn.prepare_cached(
        "SELECT condition_id, oracle, outcome_slot_count, parent_collection_id, \
                collateral_token, payout_numerators_json, payout_denominator, resolved_at, \
                resolved_block, is_resolved \
         FROM conditions",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, i64>(6)?,
            row.get::<_, i64>(7)?,
            row.get::<_, i64>(8)?,
            row.get::<_, bool>(9)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (
            condition,
            oracle,
            slots,
            parent,
            collateral,
            numerators,
            denominator,
            resolved_at,
            resolved_block,
            is_resolved,
        ) = row.context("read condition row")?;
        let payout_numerators: Vec<u64> = serde_json::from_str(&numerators)
            .with_context(|| format!("invalid payout numerators {numerators:?}"))?;
        out.push(Condition {
            condition_id: parse_b256(&condition)?,
            oracle: parse_address(&oracle)?,
            outcome_slot_count: slots.max(0) as u32,
            parent_collection_id: parse_b256(&parent)?,
            collateral_token: parse_address(&collateral)?,
            payout_numerators,
            payout_denominator: denominator.max(0) as u64,
            resolved_at,
            resolved_block,
            is_resolved,
        });
    }
    Ok(out)
}

fn load_question_counts(conn: &Connection) -> Result<std::collections::HashMap<B256, u32>> {
    let mut stmt = conn.prepare_cached("SELECT market_id, question_count FROM neg_risk_markets")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = std::collections::HashMap::new();
    for row in rows {
        let (market, count) = row.context("read neg-risk market row")?;
        out.insert(parse_b256(&market)?, count.max(0) as u32);
    }
    Ok(out)
}
