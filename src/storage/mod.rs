pub mod memory;
pub mod radar_db;

use crate::error::StoreError;
use crate::models::{ContractRecord, RiskTag, WalletRecord};
use async_trait::async_trait;
use tokio::sync::broadcast;

pub use memory::MemoryStore;
pub use radar_db::RadarDb;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

const CHANGE_FEED_CAPACITY: usize = 1_024;
pub const DEFAULT_QUERY_LIMIT: usize = 50;

/// Last fully scanned height per cursor key. Keys are the network name for the contract
/// scanner and `"{network}:wallets"` for the wallet scanner.
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load_cursor(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Move the cursor to `block` unless it is already further along. Returns the stored value.
    async fn advance_cursor(&self, key: &str, block: u64) -> StoreResult<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    Contract(Box<ContractRecord>),
    Wallet(WalletRecord),
}

impl Entity {
    pub fn id(&self) -> &str {
        match self {
            Self::Contract(c) => &c.id,
            Self::Wallet(w) => &w.id,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    Inserted(Entity),
    Updated(Entity),
}

impl StoreEvent {
    fn new(outcome: UpsertOutcome, entity: Entity) -> Self {
        match outcome {
            UpsertOutcome::Inserted => Self::Inserted(entity),
            UpsertOutcome::Updated => Self::Updated(entity),
        }
    }

    pub fn entity(&self) -> &Entity {
        match self {
            Self::Inserted(e) | Self::Updated(e) => e,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractQuery {
    pub network: Option<String>,
    /// Empty means any tag.
    pub tags: Vec<RiskTag>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ContractQuery {
    fn default() -> Self {
        Self {
            network: None,
            tags: Vec::new(),
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalletQuery {
    pub network: Option<String>,
    pub min_usd: Option<f64>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for WalletQuery {
    fn default() -> Self {
        Self {
            network: None,
            min_usd: None,
            limit: DEFAULT_QUERY_LIMIT,
            offset: 0,
        }
    }
}

/// Keyed, last-write-wins persistence for contracts and wallets. Reads are ordered by recency,
/// newest first.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn upsert_contract(&self, record: &ContractRecord) -> StoreResult<UpsertOutcome>;

    async fn upsert_wallet(&self, record: &WalletRecord) -> StoreResult<UpsertOutcome>;

    async fn get_contract(&self, id: &str) -> StoreResult<Option<ContractRecord>>;

    async fn query_contracts(&self, query: &ContractQuery) -> StoreResult<Vec<ContractRecord>>;

    async fn query_wallets(&self, query: &WalletQuery) -> StoreResult<Vec<WalletRecord>>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

/// Broadcast side of the change feed. Publishing without subscribers is not an error.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<StoreEvent>,
}

impl Default for ChangeFeed {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self { tx }
    }
}

impl ChangeFeed {
    pub fn publish(&self, outcome: UpsertOutcome, entity: Entity) {
        let _ = self.tx.send(StoreEvent::new(outcome, entity));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.tx.subscribe()
    }
}

/// Newest first, ties broken by height then id so paging is stable.
pub(crate) fn sort_contracts(records: &mut [ContractRecord]) {
    records.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.block_number.cmp(&a.block_number))
            .then_with(|| a.id.cmp(&b.id))
    });
}

pub(crate) fn sort_wallets(records: &mut [WalletRecord]) {
    records.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
}

pub(crate) fn page<T>(records: Vec<T>, offset: usize, limit: usize) -> Vec<T> {
    records.into_iter().skip(offset).take(limit).collect()
}
