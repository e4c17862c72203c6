use crate::error::StoreError;
use crate::models::{ContractRecord, Finding, RiskTag, WalletRecord};
use crate::storage::{
    ChangeFeed, ContractQuery, CursorStore, Entity, EntityStore, StoreEvent, StoreResult,
    UpsertOutcome, WalletQuery,
};
use crate::utils::clock::{now_ms, to_i64};
use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::ffi::ErrorCode;
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;

const MAX_BUSY_ATTEMPTS: u32 = 6;

const CONTRACT_COLUMNS: &str = "id, address, deployer, network, block_number, tx_hash, timestamp_ms, \
     risk_score, tag, kind, name, symbol, features_json, findings_json, has_liquidity, is_mintable, \
     is_burnable, is_scam, is_vulnerable, bytecode_excerpt";

const WALLET_COLUMNS: &str =
    "id, address, network, balance_native, balance_usd, last_seen_ms, is_multisig";

/// SQLite-backed cursor and entity store. Each operation opens its own connection so the handle
/// is cheap to clone and share across scanner tasks.
#[derive(Debug, Clone)]
pub struct RadarDb {
    path: PathBuf,
    feed: ChangeFeed,
}

impl RadarDb {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
            feed: ChangeFeed::default(),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_schema(&self) -> StoreResult<()> {
        self.with_connection("ensure_schema", |conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS contracts (
                    id TEXT PRIMARY KEY NOT NULL,
                    address TEXT NOT NULL,
                    deployer TEXT NOT NULL,
                    network TEXT NOT NULL,
                    block_number INTEGER NOT NULL,
                    tx_hash TEXT NOT NULL,
                    timestamp_ms INTEGER NOT NULL,
                    risk_score INTEGER NOT NULL,
                    tag TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    name TEXT,
                    symbol TEXT,
                    features_json TEXT NOT NULL,
                    findings_json TEXT NOT NULL,
                    has_liquidity INTEGER NOT NULL DEFAULT 0,
                    is_mintable INTEGER NOT NULL DEFAULT 0,
                    is_burnable INTEGER NOT NULL DEFAULT 0,
                    is_scam INTEGER NOT NULL DEFAULT 0,
                    is_vulnerable INTEGER NOT NULL DEFAULT 0,
                    bytecode_excerpt TEXT NOT NULL,
                    updated_at_ms INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_contracts_network ON contracts(network);
                CREATE INDEX IF NOT EXISTS idx_contracts_tag ON contracts(tag);
                CREATE INDEX IF NOT EXISTS idx_contracts_timestamp ON contracts(timestamp_ms);

                CREATE TABLE IF NOT EXISTS wallets (
                    id TEXT PRIMARY KEY NOT NULL,
                    address TEXT NOT NULL,
                    network TEXT NOT NULL,
                    balance_native REAL NOT NULL,
                    balance_usd REAL NOT NULL,
                    last_seen_ms INTEGER NOT NULL,
                    is_multisig INTEGER NOT NULL DEFAULT 0,
                    updated_at_ms INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_wallets_network ON wallets(network);
                CREATE INDEX IF NOT EXISTS idx_wallets_balance_usd ON wallets(balance_usd);

                CREATE TABLE IF NOT EXISTS network_cursors (
                    cursor_key TEXT PRIMARY KEY NOT NULL,
                    last_scanned_block INTEGER NOT NULL,
                    updated_at_ms INTEGER NOT NULL
                );
                "#,
            )?;
            // WAL lets readers run while a scanner task holds the write lock.
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
                row.get::<_, String>(0)
            })?;
            conn.pragma_update(None, "synchronous", "NORMAL")
        })
    }

    fn with_connection<T, F>(&self, context: &str, op: F) -> StoreResult<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T>,
    {
        let mut last_err = String::new();

        for attempt in 1..=MAX_BUSY_ATTEMPTS {
            let conn = Connection::open(&self.path).map_err(|e| self.sqlite_error("open", e))?;
            conn.busy_timeout(Duration::from_millis(5_000))
                .map_err(|e| self.sqlite_error("busy_timeout", e))?;

            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    last_err = err.to_string();
                    if is_sqlite_locked_error(&err) && attempt < MAX_BUSY_ATTEMPTS {
                        continue;
                    }
                    return Err(StoreError::Sqlite {
                        context: context.to_string(),
                        path: self.path.display().to_string(),
                        message: last_err,
                    });
                }
            }
        }

        Err(StoreError::Sqlite {
            context: context.to_string(),
            path: self.path.display().to_string(),
            message: format!("gave up after {MAX_BUSY_ATTEMPTS} attempt(s): {last_err}"),
        })
    }

    fn sqlite_error(&self, context: &str, err: rusqlite::Error) -> StoreError {
        StoreError::Sqlite {
            context: context.to_string(),
            path: self.path.display().to_string(),
            message: err.to_string(),
        }
    }

    fn upsert_contract_sync(&self, record: &ContractRecord) -> StoreResult<UpsertOutcome> {
        let features_json = serde_json::to_string(&record.features)?;
        let findings_json = serde_json::to_string(&record.findings)?;
        let now = to_i64(now_ms());

        self.with_connection("upsert_contract", |conn| {
            let tx = conn.unchecked_transaction()?;
            let existed = tx
                .query_row("SELECT 1 FROM contracts WHERE id = ?1", [&record.id], |_| Ok(()))
                .optional()?
                .is_some();
            tx.execute(
                r#"
                INSERT INTO contracts (
                    id, address, deployer, network, block_number, tx_hash, timestamp_ms,
                    risk_score, tag, kind, name, symbol, features_json, findings_json,
                    has_liquidity, is_mintable, is_burnable, is_scam, is_vulnerable,
                    bytecode_excerpt, updated_at_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
                ON CONFLICT(id) DO UPDATE SET
                    address = excluded.address,
                    deployer = excluded.deployer,
                    network = excluded.network,
                    block_number = excluded.block_number,
                    tx_hash = excluded.tx_hash,
                    timestamp_ms = excluded.timestamp_ms,
                    risk_score = excluded.risk_score,
                    tag = excluded.tag,
                    kind = excluded.kind,
                    name = excluded.name,
                    symbol = excluded.symbol,
                    features_json = excluded.features_json,
                    findings_json = excluded.findings_json,
                    has_liquidity = excluded.has_liquidity,
                    is_mintable = excluded.is_mintable,
                    is_burnable = excluded.is_burnable,
                    is_scam = excluded.is_scam,
                    is_vulnerable = excluded.is_vulnerable,
                    bytecode_excerpt = excluded.bytecode_excerpt,
                    updated_at_ms = excluded.updated_at_ms
                "#,
                params![
                    record.id,
                    format!("{:#x}", record.address),
                    format!("{:#x}", record.deployer),
                    record.network,
                    to_i64(record.block_number),
                    format!("{:#x}", record.tx_hash),
                    record.timestamp.timestamp_millis(),
                    i64::from(record.risk_score),
                    record.tag.as_str(),
                    record.kind,
                    record.name,
                    record.symbol,
                    features_json,
                    findings_json,
                    record.has_liquidity,
                    record.is_mintable,
                    record.is_burnable,
                    record.is_scam,
                    record.is_vulnerable,
                    record.bytecode_excerpt,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(if existed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    fn upsert_wallet_sync(&self, record: &WalletRecord) -> StoreResult<UpsertOutcome> {
        let now = to_i64(now_ms());
        self.with_connection("upsert_wallet", |conn| {
            let tx = conn.unchecked_transaction()?;
            let existed = tx
                .query_row("SELECT 1 FROM wallets WHERE id = ?1", [&record.id], |_| Ok(()))
                .optional()?
                .is_some();
            tx.execute(
                r#"
                INSERT INTO wallets (id, address, network, balance_native, balance_usd, last_seen_ms, is_multisig, updated_at_ms)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(id) DO UPDATE SET
                    address = excluded.address,
                    network = excluded.network,
                    balance_native = excluded.balance_native,
                    balance_usd = excluded.balance_usd,
                    last_seen_ms = excluded.last_seen_ms,
                    is_multisig = excluded.is_multisig,
                    updated_at_ms = excluded.updated_at_ms
                "#,
                params![
                    record.id,
                    format!("{:#x}", record.address),
                    record.network,
                    record.balance_native,
                    record.balance_usd,
                    record.last_seen.timestamp_millis(),
                    record.is_multisig,
                    now,
                ],
            )?;
            tx.commit()?;
            Ok(if existed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    fn load_cursor_sync(&self, key: &str) -> StoreResult<Option<u64>> {
        self.with_connection("load_cursor", |conn| {
            conn.query_row(
                "SELECT last_scanned_block FROM network_cursors WHERE cursor_key = ?1",
                [key],
                |row| row.get::<_, i64>(0),
            )
            .optional()
        })
        .map(|v| v.map(|block| block.max(0) as u64))
    }

    fn advance_cursor_sync(&self, key: &str, block: u64) -> StoreResult<u64> {
        let now = to_i64(now_ms());
        self.with_connection("advance_cursor", |conn| {
            conn.execute(
                r#"
                INSERT INTO network_cursors (cursor_key, last_scanned_block, updated_at_ms)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(cursor_key) DO UPDATE SET
                    last_scanned_block = MAX(network_cursors.last_scanned_block, excluded.last_scanned_block),
                    updated_at_ms = excluded.updated_at_ms
                "#,
                params![key, to_i64(block), now],
            )?;
            conn.query_row(
                "SELECT last_scanned_block FROM network_cursors WHERE cursor_key = ?1",
                [key],
                |row| row.get::<_, i64>(0),
            )
        })
        .map(|v| v.max(0) as u64)
    }

    fn get_contract_sync(&self, id: &str) -> StoreResult<Option<ContractRecord>> {
        let sql = format!("SELECT {CONTRACT_COLUMNS} FROM contracts WHERE id = ?1");
        self.with_connection("get_contract", |conn| {
            conn.query_row(&sql, [id], contract_from_row).optional()
        })
    }

    fn query_contracts_sync(&self, query: &ContractQuery) -> StoreResult<Vec<ContractRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(network) = &query.network {
            values.push(Value::Text(network.clone()));
            clauses.push(format!("network = ?{}", values.len()));
        }
        if !query.tags.is_empty() {
            let mut slots = Vec::with_capacity(query.tags.len());
            for tag in &query.tags {
                values.push(Value::Text(tag.as_str().to_string()));
                slots.push(format!("?{}", values.len()));
            }
            clauses.push(format!("tag IN ({})", slots.join(", ")));
        }
        let sql = paged_select(
            &format!("SELECT {CONTRACT_COLUMNS} FROM contracts"),
            &clauses,
            "timestamp_ms DESC, block_number DESC, id ASC",
            &mut values,
            query.limit,
            query.offset,
        );

        self.with_connection("query_contracts", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), contract_from_row)?;
            rows.collect()
        })
    }

    fn query_wallets_sync(&self, query: &WalletQuery) -> StoreResult<Vec<WalletRecord>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        if let Some(network) = &query.network {
            values.push(Value::Text(network.clone()));
            clauses.push(format!("network = ?{}", values.len()));
        }
        if let Some(min_usd) = query.min_usd {
            values.push(Value::Real(min_usd));
            clauses.push(format!("balance_usd >= ?{}", values.len()));
        }
        let sql = paged_select(
            &format!("SELECT {WALLET_COLUMNS} FROM wallets"),
            &clauses,
            "last_seen_ms DESC, id ASC",
            &mut values,
            query.limit,
            query.offset,
        );

        self.with_connection("query_wallets", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), wallet_from_row)?;
            rows.collect()
        })
    }
}

/// Moves `op` onto the blocking pool so SQLite never stalls a runtime worker.
async fn off_runtime<T, F>(db: &RadarDb, context: &'static str, op: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(RadarDb) -> StoreResult<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || op(db))
        .await
        .map_err(|err| StoreError::Worker {
            context: context.to_string(),
            message: err.to_string(),
        })?
}

#[async_trait]
impl CursorStore for RadarDb {
    async fn load_cursor(&self, key: &str) -> StoreResult<Option<u64>> {
        let key = key.to_string();
        off_runtime(self, "load_cursor", move |db| db.load_cursor_sync(&key)).await
    }

    async fn advance_cursor(&self, key: &str, block: u64) -> StoreResult<u64> {
        let key = key.to_string();
        off_runtime(self, "advance_cursor", move |db| db.advance_cursor_sync(&key, block)).await
    }
}

#[async_trait]
impl EntityStore for RadarDb {
    async fn upsert_contract(&self, record: &ContractRecord) -> StoreResult<UpsertOutcome> {
        let owned = record.clone();
        let (outcome, owned) = off_runtime(self, "upsert_contract", move |db| {
            db.upsert_contract_sync(&owned).map(|outcome| (outcome, owned))
        })
        .await?;
        self.feed.publish(outcome, Entity::Contract(Box::new(owned)));
        Ok(outcome)
    }

    async fn upsert_wallet(&self, record: &WalletRecord) -> StoreResult<UpsertOutcome> {
        let owned = record.clone();
        let (outcome, owned) = off_runtime(self, "upsert_wallet", move |db| {
            db.upsert_wallet_sync(&owned).map(|outcome| (outcome, owned))
        })
        .await?;
        self.feed.publish(outcome, Entity::Wallet(owned));
        Ok(outcome)
    }

    async fn get_contract(&self, id: &str) -> StoreResult<Option<ContractRecord>> {
        let id = id.to_string();
        off_runtime(self, "get_contract", move |db| db.get_contract_sync(&id)).await
    }

    async fn query_contracts(&self, query: &ContractQuery) -> StoreResult<Vec<ContractRecord>> {
        let query = query.clone();
        off_runtime(self, "query_contracts", move |db| db.query_contracts_sync(&query)).await
    }

    async fn query_wallets(&self, query: &WalletQuery) -> StoreResult<Vec<WalletRecord>> {
        let query = query.clone();
        off_runtime(self, "query_wallets", move |db| db.query_wallets_sync(&query)).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}

fn paged_select(
    base: &str,
    clauses: &[String],
    order: &str,
    values: &mut Vec<Value>,
    limit: usize,
    offset: usize,
) -> String {
    let mut sql = base.to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    values.push(Value::Integer(to_i64(limit as u64)));
    let limit_slot = values.len();
    values.push(Value::Integer(to_i64(offset as u64)));
    let offset_slot = values.len();
    sql.push_str(&format!(
        " ORDER BY {order} LIMIT ?{limit_slot} OFFSET ?{offset_slot}"
    ));
    sql
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn corrupt(idx: usize, message: String) -> rusqlite::Error {
    conversion_error(
        idx,
        StoreError::CorruptRow {
            table: "contracts".to_string(),
            message,
        },
    )
}

fn parse_address(row: &Row<'_>, idx: usize) -> rusqlite::Result<Address> {
    let raw: String = row.get(idx)?;
    Address::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn parse_millis(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::<Utc>::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(idx, format!("timestamp out of range: {ms}")))
}

fn contract_from_row(row: &Row<'_>) -> rusqlite::Result<ContractRecord> {
    let tx_hash_raw: String = row.get(5)?;
    let tx_hash = B256::from_str(&tx_hash_raw).map_err(|e| conversion_error(5, e))?;
    let tag_raw: String = row.get(8)?;
    let tag = RiskTag::parse(&tag_raw).ok_or_else(|| corrupt(8, format!("unknown tag {tag_raw}")))?;
    let score: i64 = row.get(7)?;
    let features_raw: String = row.get(12)?;
    let features: BTreeSet<String> =
        serde_json::from_str(&features_raw).map_err(|e| conversion_error(12, e))?;
    let findings_raw: String = row.get(13)?;
    let findings: Vec<Finding> =
        serde_json::from_str(&findings_raw).map_err(|e| conversion_error(13, e))?;

    Ok(ContractRecord {
        id: row.get(0)?,
        address: parse_address(row, 1)?,
        deployer: parse_address(row, 2)?,
        network: row.get(3)?,
        block_number: row.get::<_, i64>(4)?.max(0) as u64,
        tx_hash,
        timestamp: parse_millis(row, 6)?,
        risk_score: score.clamp(0, 100) as u8,
        tag,
        kind: row.get(9)?,
        name: row.get(10)?,
        symbol: row.get(11)?,
        features,
        findings,
        has_liquidity: row.get(14)?,
        is_mintable: row.get(15)?,
        is_burnable: row.get(16)?,
        is_scam: row.get(17)?,
        is_vulnerable: row.get(18)?,
        bytecode_excerpt: row.get(19)?,
    })
}

fn wallet_from_row(row: &Row<'_>) -> rusqlite::Result<WalletRecord> {
    Ok(WalletRecord {
        id: row.get(0)?,
        address: parse_address(row, 1)?,
        network: row.get(2)?,
        balance_native: row.get(3)?,
        balance_usd: row.get(4)?,
        last_seen: parse_millis(row, 5)?,
        is_multisig: row.get(6)?,
    })
}

fn is_sqlite_locked_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => {
            let msg = err.to_string().to_ascii_lowercase();
            msg.contains("database is locked") || msg.contains("database is busy")
        }
    }
}
