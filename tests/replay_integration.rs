//! End-to-end replay tests against a real SQLite store.
//!
//! Each test seeds a fresh fixture database with raw event rows, runs the
//! wallet replay, and reads the output tables back. Covers the write path's
//! delete-before-insert idempotence and the token-id derivation bridge
//! between ERC-1155 transfer legs and catalog buckets.

use alloy_primitives::{Address, B256, U256};
use polyledger::ledger::{
    encode_address, encode_b256, outcome_token_id, run_wallet_replay, ChainAddresses, EntryKind,
    LedgerStore, ReplayConfig, TOKEN_SCALE,
};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::PathBuf;

fn wallet() -> Address {
    Address::from([0xA1u8; 20])
}

fn counterparty() -> Address {
    Address::from([0xB2u8; 20])
}

fn collateral() -> Address {
    Address::from([0xC0u8; 20])
}

fn cond_id() -> B256 {
    B256::from([0x11u8; 32])
}

fn tx_hash(n: u8) -> B256 {
    B256::from([n; 32])
}

fn fixture_db(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!(
        "polyledger_it_{}_{}.db",
        name,
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);
    path
}

fn replay_config(end_ts: i64, dry_run: bool) -> ReplayConfig {
    ReplayConfig {
        wallet: wallet(),
        interval_secs: 3600,
        start_ts: None,
        end_ts: Some(end_ts),
        dry_run,
        addresses: ChainAddresses {
            exchange_operators: HashSet::new(),
            neg_risk_adapter: Address::from([0xADu8; 20]),
            neg_risk_wrapped_collateral: Address::from([0xCEu8; 20]),
        },
    }
}

fn whole_tokens(count: u64) -> String {
    (U256::from(count) * U256::from(TOKEN_SCALE)).to_string()
}

fn seed_trade(
    conn: &Connection,
    ts: i64,
    log_index: i64,
    token_id: U256,
    usdc: u64,
    token_count: u64,
    fee: u64,
    wallet_buys: bool,
) {
    conn.execute(
        "INSERT INTO trades (tx_hash, log_index, block_number, block_ts, maker, taker, \
         token_id, usdc_amount, token_amount, fee, is_maker_buy, is_taker_buy) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            encode_b256(tx_hash(ts as u8)),
            log_index,
            ts,
            ts,
            encode_address(counterparty()),
            encode_address(wallet()),
            token_id.to_string(),
            usdc.to_string(),
            whole_tokens(token_count),
            fee.to_string(),
            !wallet_buys,
            wallet_buys,
        ],
    )
    .expect("seed trade");
}

fn seed_condition(conn: &Connection, numerators: &str, denominator: i64, resolved_at: i64) {
    conn.execute(
        "INSERT INTO conditions (condition_id, oracle, outcome_slot_count, \
         parent_collection_id, collateral_token, payout_numerators_json, payout_denominator, \
         resolved_at, resolved_block, is_resolved) \
         VALUES (?1, ?2, 2, ?3, ?4, ?5, ?6, ?7, ?7, ?8)",
        params![
            encode_b256(cond_id()),
            encode_address(counterparty()),
            encode_b256(B256::ZERO),
            encode_address(collateral()),
            numerators,
            denominator,
            resolved_at,
            resolved_at > 0,
        ],
    )
    .expect("seed condition");
}

#[tokio::test]
async fn replay_writes_ledger_and_snapshots() {
    let path = fixture_db("basic");
    let store = LedgerStore::open(path.to_str().unwrap()).unwrap();

    let token = outcome_token_id(B256::ZERO, cond_id(), 0, collateral());
    {
        let conn = Connection::open(&path).unwrap();
        seed_condition(&conn, "[]", 0, 0);
        seed_trade(&conn, 1000, 0, token, 50_000_000, 100, 0, true);
        seed_trade(&conn, 2000, 0, token, 28_000_000, 40, 0, false);
    }

    let summary = run_wallet_replay(&store, &replay_config(7300, false))
        .await
        .unwrap();
    assert_eq!(summary.events_processed, 2);
    assert_eq!(summary.ledger_entries, 2);
    assert!((summary.realized_total - 8.0).abs() < 1e-9);
    assert!((summary.cashflow_total + 22.0).abs() < 1e-9);

    let rows = store.list_ledger_rows(wallet()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].kind, EntryKind::TradeBuy);
    assert_eq!(rows[1].kind, EntryKind::TradeSell);
    assert!((rows[1].realized_pnl - 8.0).abs() < 1e-9);
    assert_eq!(rows[1].token_id, Some(token));

    // Both trades precede the first interval boundary, so the only snapshot
    // is the final flush at end_ts.
    let snapshots = store.list_snapshots(wallet()).await.unwrap();
    let times: Vec<i64> = snapshots.iter().map(|s| s.at).collect();
    assert_eq!(times, vec![7300]);
    assert!((snapshots.last().unwrap().cashflow_cum + 22.0).abs() < 1e-9);

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn rerunning_a_replay_leaves_identical_output() {
    let path = fixture_db("idempotent");
    let store = LedgerStore::open(path.to_str().unwrap()).unwrap();

    let token = outcome_token_id(B256::ZERO, cond_id(), 0, collateral());
    {
        let conn = Connection::open(&path).unwrap();
        seed_condition(&conn, "[]", 0, 0);
        seed_trade(&conn, 1000, 0, token, 50_000_000, 100, 0, true);
        seed_trade(&conn, 2000, 0, token, 28_000_000, 40, 0, false);
    }

    let cfg = replay_config(7300, false);
    let first = run_wallet_replay(&store, &cfg).await.unwrap();
    let rows_first = store.list_ledger_rows(wallet()).await.unwrap();
    let snaps_first = store.list_snapshots(wallet()).await.unwrap();

    // Same wallet, same range: the scoped delete must absorb the rerun.
    let second = run_wallet_replay(&store, &cfg).await.unwrap();
    let rows_second = store.list_ledger_rows(wallet()).await.unwrap();
    let snaps_second = store.list_snapshots(wallet()).await.unwrap();

    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(rows_first.len(), rows_second.len());
    assert_eq!(snaps_first.len(), snaps_second.len());
    for (a, b) in rows_first.iter().zip(rows_second.iter()) {
        assert_eq!(a.stable_id, b.stable_id);
        assert_eq!(a.realized_pnl, b.realized_pnl);
        assert_eq!(a.cash_delta, b.cash_delta);
    }
    for (a, b) in snaps_first.iter().zip(snaps_second.iter()) {
        assert_eq!(a, b);
    }

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn dry_run_writes_nothing() {
    let path = fixture_db("dry_run");
    let store = LedgerStore::open(path.to_str().unwrap()).unwrap();

    let token = outcome_token_id(B256::ZERO, cond_id(), 0, collateral());
    {
        let conn = Connection::open(&path).unwrap();
        seed_condition(&conn, "[]", 0, 0);
        seed_trade(&conn, 1000, 0, token, 50_000_000, 100, 0, true);
    }

    let summary = run_wallet_replay(&store, &replay_config(7300, true))
        .await
        .unwrap();
    assert_eq!(summary.ledger_entries, 1);
    assert!(summary.dry_run);
    assert!(store.list_ledger_rows(wallet()).await.unwrap().is_empty());
    assert!(store.list_snapshots(wallet()).await.unwrap().is_empty());

    let _ = std::fs::remove_file(&path);
}

#[tokio::test]
async fn split_resolution_redemption_lifecycle_with_transfer_legs() {
    let path = fixture_db("lifecycle");
    let store = LedgerStore::open(path.to_str().unwrap()).unwrap();

    // Outcome tokens derived exactly as the conditional-tokens contract
    // would; the seeded ERC-1155 legs use these ids, so the replay matching
    // them to catalog buckets is the derivation working end to end.
    let token_a = outcome_token_id(B256::ZERO, cond_id(), 0, collateral());
    let token_b = outcome_token_id(B256::ZERO, cond_id(), 1, collateral());

    {
        let conn = Connection::open(&path).unwrap();
        // Resolves [1, 0] at t = 5000: A wins, B loses.
        seed_condition(&conn, "[1,0]", 1, 5000);

        // Split $10 with uneven mint legs: 15 of A, 5 of B.
        conn.execute(
            "INSERT INTO splits (tx_hash, log_index, block_number, block_ts, stakeholder, \
             collateral, parent_collection_id, condition_id, partition_json, amount) \
             VALUES (?1, 0, 1000, 1000, ?2, ?3, ?4, ?5, '[1,2]', '10000000')",
            params![
                encode_b256(tx_hash(0x51)),
                encode_address(wallet()),
                encode_address(collateral()),
                encode_b256(B256::ZERO),
                encode_b256(cond_id()),
            ],
        )
        .unwrap();
        for (log_index, token, count) in [(1i64, token_a, 15u64), (2, token_b, 5)] {
            conn.execute(
                "INSERT INTO transfers (tx_hash, log_index, block_number, block_ts, operator, \
                 from_addr, to_addr, token_id, value) \
                 VALUES (?1, ?2, 1000, 1000, ?3, ?4, ?5, ?6, ?7)",
                params![
                    encode_b256(tx_hash(0x51)),
                    log_index,
                    encode_address(counterparty()),
                    encode_address(Address::ZERO),
                    encode_address(wallet()),
                    token.to_string(),
                    whole_tokens(count),
                ],
            )
            .unwrap();
        }

        // Redeem the winner after resolution.
        conn.execute(
            "INSERT INTO redemptions (tx_hash, log_index, block_number, block_ts, redeemer, \
             collateral, parent_collection_id, condition_id, index_sets_json, payout) \
             VALUES (?1, 0, 6000, 6000, ?2, ?3, ?4, ?5, '[1]', '15000000')",
            params![
                encode_b256(tx_hash(0x52)),
                encode_address(wallet()),
                encode_address(collateral()),
                encode_b256(B256::ZERO),
                encode_b256(cond_id()),
            ],
        )
        .unwrap();
    }

    let summary = run_wallet_replay(&store, &replay_config(7200, false))
        .await
        .unwrap();

    let rows = store.list_ledger_rows(wallet()).await.unwrap();
    let kinds: Vec<EntryKind> = rows.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![
            EntryKind::Split,
            EntryKind::ResolutionLoss,
            EntryKind::Redemption
        ]
    );

    // Split: $10 over 20 minted tokens (from the uneven legs) = 0.5/token.
    assert!((rows[0].quantity - 20.0).abs() < 1e-9);
    assert!((rows[0].unit_price - 0.5).abs() < 1e-9);

    // Resolution liquidates B's 5 tokens at 0.5: -2.50. If the transfer legs
    // had not matched the derived token ids, the fallback would have put 10
    // tokens in B and this would be -5.00.
    assert_eq!(rows[1].token_id, Some(token_b));
    assert!((rows[1].realized_pnl + 2.5).abs() < 1e-9);

    // Redemption of A's 15 tokens for $15 against a $7.50 basis: +7.50.
    assert!((rows[2].quantity - 15.0).abs() < 1e-9);
    assert!((rows[2].realized_pnl - 7.5).abs() < 1e-9);

    // Net: -2.5 + 7.5 = +5 realized, $10 out / $15 in = +5 cashflow.
    assert!((summary.realized_total - 5.0).abs() < 1e-9);
    assert!((summary.cashflow_total - 5.0).abs() < 1e-9);
    assert_eq!(summary.open_token_count, 0);

    let _ = std::fs::remove_file(&path);
}
