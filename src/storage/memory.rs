use crate::models::{ContractRecord, WalletRecord};
use crate::storage::{
    page, sort_contracts, sort_wallets, ChangeFeed, ContractQuery, CursorStore, Entity,
    EntityStore, StoreEvent, StoreResult, UpsertOutcome, WalletQuery,
};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Process-local store with the same semantics as [`crate::storage::RadarDb`]. Used by tests and
/// by embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    contracts: DashMap<String, ContractRecord>,
    wallets: DashMap<String, WalletRecord>,
    cursors: DashMap<String, u64>,
    writes: AtomicUsize,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contract_count(&self) -> usize {
        self.contracts.len()
    }

    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Upserts accepted so far, inserts and updates alike.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.cursors.get(key).map(|v| *v))
    }

    async fn advance_cursor(&self, key: &str, block: u64) -> StoreResult<u64> {
        let stored = *self
            .cursors
            .entry(key.to_string())
            .and_modify(|current| *current = (*current).max(block))
            .or_insert(block);
        Ok(stored)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn upsert_contract(&self, record: &ContractRecord) -> StoreResult<UpsertOutcome> {
        let outcome = match self.contracts.insert(record.id.clone(), record.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.feed
            .publish(outcome, Entity::Contract(Box::new(record.clone())));
        Ok(outcome)
    }

    async fn upsert_wallet(&self, record: &WalletRecord) -> StoreResult<UpsertOutcome> {
        let outcome = match self.wallets.insert(record.id.clone(), record.clone()) {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.feed.publish(outcome, Entity::Wallet(record.clone()));
        Ok(outcome)
    }

    async fn get_contract(&self, id: &str) -> StoreResult<Option<ContractRecord>> {
        Ok(self.contracts.get(id).map(|r| r.value().clone()))
    }

    async fn query_contracts(&self, query: &ContractQuery) -> StoreResult<Vec<ContractRecord>> {
        let mut matched: Vec<ContractRecord> = self
            .contracts
            .iter()
            .filter(|r| query.network.as_deref().map_or(true, |n| r.network == n))
            .filter(|r| query.tags.is_empty() || query.tags.contains(&r.tag))
            .map(|r| r.value().clone())
            .collect();
        sort_contracts(&mut matched);
        Ok(page(matched, query.offset, query.limit))
    }

    async fn query_wallets(&self, query: &WalletQuery) -> StoreResult<Vec<WalletRecord>> {
        let mut matched: Vec<WalletRecord> = self
            .wallets
            .iter()
            .filter(|w| query.network.as_deref().map_or(true, |n| w.network == n))
            .filter(|w| query.min_usd.map_or(true, |min| w.balance_usd >= min))
            .map(|w| w.value().clone())
            .collect();
        sort_wallets(&mut matched);
        Ok(page(matched, query.offset, query.limit))
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{record_id, RiskTag};
    use alloy::primitives::{Address, B256};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;

    fn contract(byte: u8, ts: i64) -> ContractRecord {
        let address = Address::repeat_byte(byte);
        ContractRecord {
            id: record_id("polygon", address),
            address,
            deployer: Address::ZERO,
            network: "polygon".to_string(),
            block_number: u64::from(byte),
            tx_hash: B256::ZERO,
            timestamp: DateTime::<Utc>::from_timestamp(ts, 0).expect("ts"),
            risk_score: 10,
            tag: RiskTag::Safe,
            kind: "Contract".to_string(),
            name: None,
            symbol: None,
            features: BTreeSet::new(),
            findings: Vec::new(),
            has_liquidity: false,
            is_mintable: false,
            is_burnable: false,
            is_scam: false,
            is_vulnerable: false,
            bytecode_excerpt: "0x".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_converges_to_one_record_per_id() {
        let store = MemoryStore::new();
        let mut feed = store.subscribe();
        let record = contract(7, 10);
        let first = store.upsert_contract(&record).await.expect("insert");
        assert_eq!(first, UpsertOutcome::Inserted);
        let second = store.upsert_contract(&record).await.expect("update");
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.contract_count(), 1);
        assert_eq!(store.write_count(), 2);
        assert!(matches!(feed.try_recv(), Ok(StoreEvent::Inserted(_))));
        assert!(matches!(feed.try_recv(), Ok(StoreEvent::Updated(_))));
    }

    #[tokio::test]
    async fn test_query_orders_newest_first() {
        let store = MemoryStore::new();
        for (byte, ts) in [(1u8, 30), (2, 10), (3, 20)] {
            store.upsert_contract(&contract(byte, ts)).await.expect("upsert");
        }
        let rows = store.query_contracts(&ContractQuery::default()).await.expect("query");
        let heights: Vec<u64> = rows.iter().map(|r| r.block_number).collect();
        assert_eq!(heights, vec![1, 3, 2]);

        let other = store
            .query_contracts(&ContractQuery {
                network: Some("bsc".to_string()),
                ..ContractQuery::default()
            })
            .await
            .expect("query");
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_cursor_is_monotonic() {
        let store = MemoryStore::new();
        assert_eq!(store.advance_cursor("base", 10).await.expect("advance"), 10);
        assert_eq!(store.advance_cursor("base", 3).await.expect("stale"), 10);
        assert_eq!(store.load_cursor("base").await.expect("load"), Some(10));
        assert_eq!(store.load_cursor("base:wallets").await.expect("load"), None);
    }
}
