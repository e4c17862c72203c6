mod common;

use async_trait::async_trait;
use chain_radar::analyzer::RiskAnalyzer;
use chain_radar::config::chains::NetworkConfig;
use chain_radar::error::RadarError;
use chain_radar::models::{record_id, RiskTag};
use chain_radar::rpc::client::{BlockData, ChainClient};
use chain_radar::scanner::{
    BackfillOutcome, BackfillRequest, BlockHandler, DeploymentDetector, ScanEngine,
};
use chain_radar::storage::{ContractQuery, CursorStore, EntityStore, MemoryStore, StoreEvent};
use common::{addr, padded_code, MockChain};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

const OWNER_ONLY: &str = "8da5cb5b";

fn detector_engine(
    chain: &Arc<MockChain>,
    cursors: Arc<MemoryStore>,
    entities: Arc<MemoryStore>,
    batch_size: usize,
) -> ScanEngine<DeploymentDetector> {
    let client: Arc<dyn ChainClient> = chain.clone();
    let detector = DeploymentDetector::new(
        NetworkConfig::ethereum(),
        Arc::clone(&client),
        Arc::new(RiskAnalyzer::default()),
        entities,
    );
    ScanEngine::new("ethereum", client, cursors, Arc::new(detector), batch_size)
}

async fn wait_for_cursor(store: &MemoryStore, key: &str, target: u64) {
    for _ in 0..200 {
        if store.load_cursor(key).await.expect("cursor") == Some(target) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cursor {key} never reached {target}");
}

#[tokio::test]
async fn test_three_block_feed_yields_single_record_at_block_two() {
    let chain = MockChain::new("http://mock-0");
    chain.push_block(1, vec![common::plain_tx(1, addr(0xa1), addr(0xb1))]);
    chain.deploy(2, 2, addr(0xd1), addr(0xc1), padded_code(&[OWNER_ONLY], 200));
    chain.push_block(3, vec![common::plain_tx(3, addr(0xa2), addr(0xb2))]);

    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);
    let report = engine
        .backfill(BackfillRequest::Range { start: 1, end: 3 })
        .await
        .expect("backfill");

    assert_eq!(report.outcome, BackfillOutcome::Completed);
    assert_eq!(report.range, Some((1, 3)));
    assert_eq!(report.blocks_scanned, 3);
    assert_eq!(report.records_written, 1);
    assert_eq!(report.cursor, Some(3));

    let records = store
        .query_contracts(&ContractQuery::default())
        .await
        .expect("query");
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.block_number, 2);
    assert_eq!(record.id, record_id("ethereum", addr(0xc1)));
    assert_eq!(record.deployer, addr(0xd1));
    assert_eq!(record.kind, "Contract");
    assert!(record.features.contains("Ownable"));
    // Empty deployer wallet: 10 + 30.
    assert_eq!(record.risk_score, 40);
    assert_eq!(record.tag, RiskTag::Medium);
}

#[tokio::test]
async fn test_rescanning_a_block_keeps_one_record_per_address() {
    let chain = MockChain::new("http://mock-0");
    chain.deploy(2, 2, addr(0xd1), addr(0xc1), padded_code(&[OWNER_ONLY], 200));

    let entities = Arc::new(MemoryStore::new());
    let mut feed = entities.subscribe();

    for _ in 0..2 {
        // Fresh cursor each round so the block really is scanned twice.
        let cursors = Arc::new(MemoryStore::new());
        let engine = detector_engine(&chain, cursors, entities.clone(), 5);
        let report = engine
            .backfill(BackfillRequest::Range { start: 2, end: 2 })
            .await
            .expect("backfill");
        assert_eq!(report.outcome, BackfillOutcome::Completed);
    }

    assert_eq!(entities.contract_count(), 1);
    assert_eq!(entities.write_count(), 2);
    assert!(matches!(feed.recv().await.expect("event"), StoreEvent::Inserted(_)));
    assert!(matches!(feed.recv().await.expect("event"), StoreEvent::Updated(_)));
}

#[tokio::test]
async fn test_backfill_below_cursor_performs_no_rpc_calls() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=120);
    let store = Arc::new(MemoryStore::new());
    store.advance_cursor("ethereum", 100).await.expect("seed cursor");
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);

    for request in [
        BackfillRequest::Range { start: 10, end: 50 },
        BackfillRequest::Range { start: 90, end: 100 },
    ] {
        let report = engine.backfill(request).await.expect("backfill");
        assert_eq!(report.outcome, BackfillOutcome::NoOp);
        assert_eq!(report.range, None);
    }
    assert_eq!(chain.rpc_calls(), 0);
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), Some(100));
}

#[tokio::test]
async fn test_backfill_resumes_after_cursor_and_clips_to_head() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=10);
    let store = Arc::new(MemoryStore::new());
    store.advance_cursor("ethereum", 6).await.expect("seed cursor");
    let engine = detector_engine(&chain, store.clone(), store.clone(), 2);

    let report = engine
        .backfill(BackfillRequest::Range { start: 3, end: 50 })
        .await
        .expect("backfill");
    assert_eq!(report.range, Some((7, 10)));
    assert_eq!(report.blocks_scanned, 4);
    assert_eq!(report.cursor, Some(10));

    let report = engine
        .backfill(BackfillRequest::LookBack(3))
        .await
        .expect("backfill");
    assert_eq!(report.outcome, BackfillOutcome::NoOp);
}

#[tokio::test]
async fn test_lookback_scans_newest_blocks() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=10);
    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);

    let report = engine
        .backfill(BackfillRequest::LookBack(3))
        .await
        .expect("backfill");
    assert_eq!(report.range, Some((8, 10)));
    assert_eq!(report.cursor, Some(10));
}

#[tokio::test]
async fn test_failed_block_holds_cursor_at_last_complete_batch() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=12);
    chain.break_block(8);
    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);

    let report = engine
        .backfill(BackfillRequest::From(1))
        .await
        .expect("backfill");
    match &report.outcome {
        BackfillOutcome::Aborted { failed_height, .. } => assert_eq!(*failed_height, 8),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), Some(5));
    assert!(!engine.is_busy());

    chain.repair_block(8);
    let report = engine
        .backfill(BackfillRequest::From(1))
        .await
        .expect("backfill");
    assert_eq!(report.outcome, BackfillOutcome::Completed);
    assert_eq!(report.range, Some((6, 12)));
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), Some(12));
}

#[tokio::test]
async fn test_receipt_failure_skips_only_that_transaction() {
    let chain = MockChain::new("http://mock-0");
    chain.push_block(
        4,
        vec![
            common::creation_tx(0x41, addr(0xd1)),
            common::creation_tx(0x42, addr(0xd2)),
        ],
    );
    chain.break_receipt(common::hash(0x41));
    chain.set_receipt(common::hash(0x42), Some(addr(0xc2)));
    chain.set_code(addr(0xc2), padded_code(&[OWNER_ONLY], 200));

    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);
    let report = engine
        .backfill(BackfillRequest::Range { start: 4, end: 4 })
        .await
        .expect("backfill");

    assert_eq!(report.outcome, BackfillOutcome::Completed);
    assert_eq!(report.records_written, 1);
    assert!(store
        .get_contract(&record_id("ethereum", addr(0xc2)))
        .await
        .expect("get")
        .is_some());
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), Some(4));
}

#[tokio::test]
async fn test_reverted_creation_is_not_recorded() {
    let chain = MockChain::new("http://mock-0");
    chain.push_block(4, vec![common::creation_tx(0x41, addr(0xd1))]);
    chain.revert_receipt(common::hash(0x41), addr(0xc1));
    chain.set_code(addr(0xc1), padded_code(&[OWNER_ONLY], 200));

    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);
    let report = engine
        .backfill(BackfillRequest::Range { start: 4, end: 4 })
        .await
        .expect("backfill");

    assert_eq!(report.outcome, BackfillOutcome::Completed);
    assert_eq!(report.records_written, 0);
    assert_eq!(store.contract_count(), 0);
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), Some(4));
}

struct GateHandler {
    entered: Notify,
    release: Notify,
    handled: AtomicUsize,
}

#[async_trait]
impl BlockHandler for GateHandler {
    fn kind(&self) -> &'static str {
        "gate"
    }

    fn cursor_key(&self, network: &str) -> String {
        format!("{network}:gate")
    }

    async fn handle_block(&self, _block: &BlockData) -> Result<usize, RadarError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.handled.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

#[tokio::test]
async fn test_requests_while_busy_are_dropped() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=3);
    let store = Arc::new(MemoryStore::new());
    let handler = Arc::new(GateHandler {
        entered: Notify::new(),
        release: Notify::new(),
        handled: AtomicUsize::new(0),
    });
    let engine = ScanEngine::new("ethereum", chain.clone(), store.clone(), handler.clone(), 1);

    let running = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .backfill(BackfillRequest::Range { start: 1, end: 1 })
                .await
        })
    };
    handler.entered.notified().await;
    assert!(engine.is_busy());

    let dropped = engine
        .backfill(BackfillRequest::Range { start: 2, end: 3 })
        .await
        .expect("busy report");
    assert_eq!(dropped.outcome, BackfillOutcome::Busy);

    handler.release.notify_one();
    let report = running.await.expect("join").expect("backfill");
    assert_eq!(report.outcome, BackfillOutcome::Completed);
    assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    assert!(!engine.is_busy());
    assert_eq!(store.load_cursor("ethereum:gate").await.expect("cursor"), Some(1));
}

#[tokio::test]
async fn test_live_mode_scans_delivered_heights() {
    let chain = MockChain::new("http://mock-0");
    chain.push_block(1, Vec::new());
    chain.deploy(2, 2, addr(0xd1), addr(0xc1), padded_code(&[OWNER_ONLY], 200));
    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);

    let (tx, rx) = mpsc::channel(8);
    assert!(engine.start(rx));
    assert!(!engine.start(mpsc::channel(1).1));
    assert!(engine.is_active());

    tx.send(2).await.expect("send head");
    wait_for_cursor(&store, "ethereum", 2).await;
    assert_eq!(store.contract_count(), 1);

    engine.stop();
    assert!(!engine.is_active());
    let status = engine.status().await;
    assert_eq!(status.cursor, Some(2));
    assert_eq!(status.blocks_scanned, 1);
    assert_eq!(status.records_written, 1);
}

async fn wait_for_failures<H: BlockHandler>(engine: &ScanEngine<H>, count: u64) {
    for _ in 0..200 {
        if engine.status().await.failed_scans >= count && !engine.is_busy() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine never recorded {count} failed scan(s)");
}

#[tokio::test]
async fn test_live_failure_is_retried_before_later_heads() {
    let chain = MockChain::new("http://mock-0");
    chain.push_block(1, Vec::new());
    chain.deploy(2, 2, addr(0xd1), addr(0xc1), padded_code(&[OWNER_ONLY], 200));
    chain.push_block(3, vec![common::plain_tx(3, addr(0xa2), addr(0xb2))]);
    chain.break_block(2);
    let store = Arc::new(MemoryStore::new());
    let engine = detector_engine(&chain, store.clone(), store.clone(), 5);

    let (tx, rx) = mpsc::channel(8);
    assert!(engine.start(rx));

    tx.send(2).await.expect("send head");
    wait_for_failures(&engine, 1).await;
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), None);

    // The next head rescans block 2 first and must not step over it.
    tx.send(3).await.expect("send head");
    wait_for_failures(&engine, 2).await;
    assert_eq!(store.load_cursor("ethereum").await.expect("cursor"), None);
    assert_eq!(store.contract_count(), 0);

    chain.repair_block(2);
    tx.send(3).await.expect("send head");
    wait_for_cursor(&store, "ethereum", 3).await;
    assert_eq!(store.contract_count(), 1);
    let record = store
        .get_contract(&record_id("ethereum", addr(0xc1)))
        .await
        .expect("get")
        .expect("deployment from block 2");
    assert_eq!(record.block_number, 2);
    engine.stop();

    let report = engine
        .backfill(BackfillRequest::From(1))
        .await
        .expect("backfill");
    assert_eq!(report.outcome, BackfillOutcome::NoOp);
}

#[tokio::test]
async fn test_live_head_catches_up_from_cursor() {
    let chain = MockChain::new("http://mock-0");
    chain.empty_blocks(1..=9);
    chain.deploy(10, 10, addr(0xd1), addr(0xc1), padded_code(&[OWNER_ONLY], 200));
    let store = Arc::new(MemoryStore::new());
    store.advance_cursor("ethereum", 4).await.expect("seed cursor");
    let engine = detector_engine(&chain, store.clone(), store.clone(), 3);

    let (tx, rx) = mpsc::channel(8);
    assert!(engine.start(rx));
    tx.send(10).await.expect("send head");
    wait_for_cursor(&store, "ethereum", 10).await;
    engine.stop();

    let status = engine.status().await;
    assert_eq!(status.blocks_scanned, 6);
    assert_eq!(status.failed_scans, 0);
    assert_eq!(store.contract_count(), 1);
}
