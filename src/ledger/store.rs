//! Ledger Store
//!
//! SQLite-backed store handle shared by the loader (reads the raw event
//! tables) and the writer (owns the two output tables). The handle is passed
//! explicitly into both; there is no process-wide connection.
//!
//! The write path is idempotent under reruns: inside one transaction, a
//! scoped delete (`wallet = W AND ts ∈ [S, E]`) clears any prior output for
//! the replay range on both tables before the inserts. A failed replay never
//! reaches this function, so partial output is never committed.

use crate::ledger::engine::{EntryKind, LedgerRecord};
use crate::ledger::snapshots::Snapshot;
use alloy_primitives::{Address, B256};
use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared store handle.
#[derive(Clone)]
pub struct LedgerStore {
    conn: Arc<Mutex<Connection>>,
}

impl LedgerStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open ledger store")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory ledger store")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn conn(&self) -> &Arc<Mutex<Connection>> {
        &self.conn
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS trades (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                maker TEXT NOT NULL,
                taker TEXT NOT NULL,
                maker_asset_id TEXT NOT NULL DEFAULT '0',
                taker_asset_id TEXT NOT NULL DEFAULT '0',
                maker_amount TEXT NOT NULL DEFAULT '0',
                taker_amount TEXT NOT NULL DEFAULT '0',
                fee TEXT NOT NULL DEFAULT '0',
                token_id TEXT NOT NULL,
                usdc_amount TEXT NOT NULL,
                token_amount TEXT NOT NULL,
                is_maker_buy INTEGER NOT NULL,
                is_taker_buy INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_maker ON trades(maker, block_ts);
            CREATE INDEX IF NOT EXISTS idx_trades_taker ON trades(taker, block_ts);

            CREATE TABLE IF NOT EXISTS splits (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                stakeholder TEXT NOT NULL,
                collateral TEXT NOT NULL,
                parent_collection_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                partition_json TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_splits_stakeholder ON splits(stakeholder, block_ts);

            CREATE TABLE IF NOT EXISTS merges (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                stakeholder TEXT NOT NULL,
                collateral TEXT NOT NULL,
                parent_collection_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                partition_json TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_merges_stakeholder ON merges(stakeholder, block_ts);

            CREATE TABLE IF NOT EXISTS redemptions (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                redeemer TEXT NOT NULL,
                collateral TEXT NOT NULL,
                parent_collection_id TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                index_sets_json TEXT NOT NULL,
                payout TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_redemptions_redeemer ON redemptions(redeemer, block_ts);

            CREATE TABLE IF NOT EXISTS adapter_splits (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                stakeholder TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS adapter_merges (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                stakeholder TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                amount TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS adapter_redemptions (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                redeemer TEXT NOT NULL,
                condition_id TEXT NOT NULL,
                amounts_json TEXT NOT NULL,
                payout TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS adapter_conversions (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                stakeholder TEXT NOT NULL,
                market_id TEXT NOT NULL,
                index_set TEXT NOT NULL,
                amount TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS transfers (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                operator TEXT NOT NULL,
                from_addr TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                token_id TEXT NOT NULL,
                value TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers(from_addr, block_ts);
            CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers(to_addr, block_ts);

            CREATE TABLE IF NOT EXISTS fee_refunds (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                module TEXT NOT NULL,
                order_hash TEXT,
                to_addr TEXT NOT NULL,
                token_id TEXT NOT NULL,
                refund TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS fee_withdrawals (
                tx_hash TEXT NOT NULL,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                module TEXT NOT NULL,
                to_addr TEXT NOT NULL,
                token_id TEXT NOT NULL,
                amount TEXT NOT NULL,
                fee_charged TEXT NOT NULL DEFAULT '0'
            );

            CREATE TABLE IF NOT EXISTS conditions (
                condition_id TEXT PRIMARY KEY,
                oracle TEXT NOT NULL,
                outcome_slot_count INTEGER NOT NULL,
                parent_collection_id TEXT NOT NULL,
                collateral_token TEXT NOT NULL,
                payout_numerators_json TEXT NOT NULL DEFAULT '[]',
                payout_denominator INTEGER NOT NULL DEFAULT 0,
                resolved_at INTEGER NOT NULL DEFAULT 0,
                resolved_block INTEGER NOT NULL DEFAULT 0,
                is_resolved INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS neg_risk_markets (
                market_id TEXT PRIMARY KEY,
                question_count INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS wallet_rankings (
                wallet TEXT PRIMARY KEY,
                volume REAL NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS wallet_ledger (
                id TEXT PRIMARY KEY,
                wallet TEXT NOT NULL,
                event_type TEXT NOT NULL,
                tx_hash TEXT,
                log_index INTEGER NOT NULL,
                block_number INTEGER NOT NULL,
                block_ts INTEGER NOT NULL,
                token_id TEXT,
                condition_id TEXT,
                quantity REAL NOT NULL,
                cash_delta REAL NOT NULL,
                unit_price REAL NOT NULL,
                cost_basis REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                entry_ts INTEGER NOT NULL,
                metadata_json TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_wallet_ledger_wallet_ts
                ON wallet_ledger(wallet, block_ts, id);

            CREATE TABLE IF NOT EXISTS wallet_snapshots (
                wallet TEXT NOT NULL,
                at INTEGER NOT NULL,
                realized_cum REAL NOT NULL,
                unrealized REAL NOT NULL,
                open_cost REAL NOT NULL,
                open_value REAL NOT NULL,
                cashflow_cum REAL NOT NULL,
                open_token_count INTEGER NOT NULL,
                PRIMARY KEY (wallet, at)
            );",
        )
        .context("init ledger store schema")?;
        Ok(())
    }

    /// Scoped delete + insert of one wallet's replay output, in one
    /// transaction.
    pub async fn write_replay(
        &self,
        wallet: Address,
        scope_start: i64,
        scope_end: i64,
        entries: &[LedgerRecord],
        snapshots: &[Snapshot],
    ) -> Result<()> {
        let wallet_str = encode_address(wallet);
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().context("begin replay write")?;
        tx.execute(
            "DELETE FROM wallet_ledger WHERE wallet = ?1 AND block_ts BETWEEN ?2 AND ?3",
            params![wallet_str, scope_start, scope_end],
        )?;
        tx.execute(
            "DELETE FROM wallet_snapshots WHERE wallet = ?1 AND at BETWEEN ?2 AND ?3",
            params![wallet_str, scope_start, scope_end],
        )?;
        {
            let mut insert_entry = tx.prepare_cached(
                "INSERT INTO wallet_ledger \
                 (id, wallet, event_type, tx_hash, log_index, block_number, block_ts, token_id, \
                  condition_id, quantity, cash_delta, unit_price, cost_basis, realized_pnl, \
                  entry_ts, metadata_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            )?;
            for e in entries {
                insert_entry.execute(params![
                    e.stable_id,
                    wallet_str,
                    e.kind.as_str(),
                    e.tx_hash.map(encode_b256),
                    e.log_index,
                    e.block_number,
                    e.ts,
                    e.token_id.map(|t| t.to_string()),
                    e.condition_id.map(encode_b256),
                    e.quantity,
                    e.cash_delta,
                    e.unit_price,
                    e.cost_basis,
                    e.realized_pnl,
                    e.entry_ts,
                    (!e.metadata.is_null()).then(|| e.metadata.to_string()),
                ])?;
            }
            let mut insert_snapshot = tx.prepare_cached(
                "INSERT INTO wallet_snapshots \
                 (wallet, at, realized_cum, unrealized, open_cost, open_value, cashflow_cum, \
                  open_token_count) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for s in snapshots {
                insert_snapshot.execute(params![
                    wallet_str,
                    s.at,
                    s.realized_cum,
                    s.unrealized,
                    s.open_cost,
                    s.open_value,
                    s.cashflow_cum,
                    s.open_token_count,
                ])?;
            }
        }
        tx.commit().context("commit replay write")?;
        Ok(())
    }

    /// Read back one wallet's ledger rows in output order.
    pub async fn list_ledger_rows(&self, wallet: Address) -> Result<Vec<LedgerRecord>> {
        let wallet_str = encode_address(wallet);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT id, event_type, tx_hash, log_index, block_number, block_ts, token_id, \
                    condition_id, quantity, cash_delta, unit_price, cost_basis, realized_pnl, \
                    entry_ts, metadata_json \
             FROM wallet_ledger WHERE wallet = ?1 ORDER BY block_ts ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![wallet_str], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, f64>(8)?,
                row.get::<_, f64>(9)?,
                row.get::<_, f64>(10)?,
                row.get::<_, f64>(11)?,
                row.get::<_, f64>(12)?,
                row.get::<_, i64>(13)?,
                row.get::<_, Option<String>>(14)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (
                stable_id,
                event_type,
                tx_hash,
                log_index,
                block_number,
                ts,
                token_id,
                condition_id,
                quantity,
                cash_delta,
                unit_price,
                cost_basis,
                realized_pnl,
                entry_ts,
                metadata_json,
            ) = row?;
            out.push(LedgerRecord {
                stable_id,
                wallet,
                kind: parse_entry_kind(&event_type)?,
                tx_hash: tx_hash.as_deref().map(parse_b256).transpose()?,
                log_index,
                block_number,
                ts,
                token_id: token_id
                    .as_deref()
                    .map(crate::ledger::amount::parse_u256_dec)
                    .transpose()?,
                condition_id: condition_id.as_deref().map(parse_b256).transpose()?,
                quantity,
                cash_delta,
                unit_price,
                cost_basis,
                realized_pnl,
                entry_ts,
                metadata: metadata_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()
                    .unwrap_or(None)
                    .unwrap_or(serde_json::Value::Null),
            });
        }
        Ok(out)
    }

    /// Read back one wallet's snapshots in time order.
    pub async fn list_snapshots(&self, wallet: Address) -> Result<Vec<Snapshot>> {
        let wallet_str = encode_address(wallet);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT at, realized_cum, unrealized, open_cost, open_value, cashflow_cum, \
                    open_token_count \
             FROM wallet_snapshots WHERE wallet = ?1 ORDER BY at ASC",
        )?;
        let rows = stmt.query_map(params![wallet_str], |row| {
            Ok(Snapshot {
                wallet,
                at: row.get(0)?,
                realized_cum: row.get(1)?,
                unrealized: row.get(2)?,
                open_cost: row.get(3)?,
                open_value: row.get(4)?,
                cashflow_cum: row.get(5)?,
                open_token_count: row.get::<_, i64>(6)? as u64,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Top-N wallets from the pre-aggregated ranking table.
    pub async fn top_wallets(&self, count: usize) -> Result<Vec<Address>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT wallet FROM wallet_rankings ORDER BY volume DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![count as i64], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(parse_address(&row?)?);
        }
        Ok(out)
    }
}

// =============================================================================
// ENCODING HELPERS
// =============================================================================

pub fn encode_address(a: Address) -> String {
    format!("{a:#x}")
}

pub fn encode_b256(h: B256) -> String {
    format!("{h:#x}")
}

pub fn parse_address(s: &str) -> Result<Address> {
    Address::from_str(s.trim()).map_err(|e| anyhow!("invalid address {s:?}: {e}"))
}

pub fn parse_b256(s: &str) -> Result<B256> {
    B256::from_str(s.trim()).map_err(|e| anyhow!("invalid 32-byte hash {s:?}: {e}"))
}

fn parse_entry_kind(s: &str) -> Result<EntryKind> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| anyhow!("unknown ledger event_type {s:?}"))
}
