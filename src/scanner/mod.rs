//! Block scanning engine shared by the contract and wallet paths.
//!
//! One [`ScanEngine`] per (network, handler). The engine owns locking, batching, cursor
//! handling and live head-following; the [`BlockHandler`] decides what a block means.

pub mod detector;
pub mod manager;
pub mod wallets;

use crate::error::{RadarError, RpcError};
use crate::rpc::client::{BlockData, ChainClient};
use crate::storage::CursorStore;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

pub use detector::DeploymentDetector;
pub use manager::ScanManager;
pub use wallets::{WalletScanner, WalletSettings};

/// Most blocks a single live wake-up scans when the cursor trails the head.
pub const LIVE_CATCH_UP_LIMIT: u64 = 256;

#[async_trait]
pub trait BlockHandler: Send + Sync + 'static {
    /// Short label for logs and status, e.g. `"contracts"`.
    fn kind(&self) -> &'static str;

    fn cursor_key(&self, network: &str) -> String;

    /// Process one fully fetched block. Returns the number of records written. An error means
    /// the block must be scanned again, so the cursor will not pass it.
    async fn handle_block(&self, block: &BlockData) -> Result<usize, RadarError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillRequest {
    /// The newest `n` blocks up to the head.
    LookBack(u64),
    /// From `start` up to the head.
    From(u64),
    /// Inclusive, clipped to the head.
    Range { start: u64, end: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum BackfillOutcome {
    Completed,
    /// Nothing left to scan in the requested range.
    NoOp,
    /// Another scan held the lock; the request was dropped.
    Busy,
    Aborted { failed_height: u64, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillReport {
    pub network: String,
    pub kind: String,
    /// Effective range after clipping to the cursor and head; `None` for no-ops.
    pub range: Option<(u64, u64)>,
    pub blocks_scanned: u64,
    pub records_written: u64,
    pub cursor: Option<u64>,
    pub outcome: BackfillOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub network: String,
    pub kind: String,
    pub active: bool,
    pub busy: bool,
    pub cursor: Option<u64>,
    pub blocks_scanned: u64,
    pub records_written: u64,
    pub failed_scans: u64,
    pub dropped_heights: u64,
}

/// Clears the busy flag when the scan that took it finishes, however it finishes.
struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(Arc::clone(flag)))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct EngineCounters {
    blocks_scanned: AtomicU64,
    records_written: AtomicU64,
    failed_scans: AtomicU64,
    dropped_heights: AtomicU64,
}

struct EngineInner<H: BlockHandler> {
    network: String,
    cursor_key: String,
    client: Arc<dyn ChainClient>,
    cursors: Arc<dyn CursorStore>,
    handler: Arc<H>,
    batch_size: usize,
    busy: Arc<AtomicBool>,
    active: AtomicBool,
    live_task: Mutex<Option<JoinHandle<()>>>,
    /// First live head seen while the cursor was unset.
    live_origin: Mutex<Option<u64>>,
    counters: EngineCounters,
}

pub struct ScanEngine<H: BlockHandler> {
    inner: Arc<EngineInner<H>>,
}

impl<H: BlockHandler> Clone for ScanEngine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: BlockHandler> ScanEngine<H> {
    pub fn new(
        network: impl Into<String>,
        client: Arc<dyn ChainClient>,
        cursors: Arc<dyn CursorStore>,
        handler: Arc<H>,
        batch_size: usize,
    ) -> Self {
        let network = network.into();
        let cursor_key = handler.cursor_key(&network);
        Self {
            inner: Arc::new(EngineInner {
                network,
                cursor_key,
                client,
                cursors,
                handler,
                batch_size: batch_size.max(1),
                busy: Arc::new(AtomicBool::new(false)),
                active: AtomicBool::new(false),
                live_task: Mutex::new(None),
                live_origin: Mutex::new(None),
                counters: EngineCounters::default(),
            }),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    /// Follow `heads`. Each delivered height wakes a scan of everything between the cursor and
    /// that height, if no other scan holds the lock; otherwise the wake-up is dropped and the next
    /// one picks up the gap. Returns `false` if the engine was already live.
    pub fn start(&self, mut heads: mpsc::Receiver<u64>) -> bool {
        if self
            .inner
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(height) = heads.recv().await {
                if !inner.active.load(Ordering::Acquire) {
                    break;
                }
                let Some(guard) = BusyGuard::try_acquire(&inner.busy) else {
                    inner.counters.dropped_heights.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        "[SCAN] {} {} busy; dropping head #{}",
                        inner.network,
                        inner.handler.kind(),
                        height
                    );
                    continue;
                };
                let scan = Arc::clone(&inner);
                tokio::spawn(async move {
                    let _guard = guard;
                    if let Err(err) = catch_up(&scan, height).await {
                        tracing::warn!(
                            "[SCAN] {} {} catch-up to #{} failed: {}",
                            scan.network,
                            scan.handler.kind(),
                            height,
                            err
                        );
                    }
                });
            }
            inner.active.store(false, Ordering::Release);
        });

        let mut slot = self
            .inner
            .live_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
        tracing::info!(
            "[SCAN] {} {} scanner live",
            self.inner.network,
            self.inner.handler.kind()
        );
        true
    }

    /// Stop following heads. Scans already dispatched run to completion.
    pub fn stop(&self) {
        self.inner.active.store(false, Ordering::Release);
        let task = self
            .inner
            .live_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            tracing::info!(
                "[SCAN] {} {} scanner stopped",
                self.inner.network,
                self.inner.handler.kind()
            );
        }
    }

    pub async fn backfill(&self, request: BackfillRequest) -> Result<BackfillReport, RadarError> {
        let inner = &self.inner;
        let mut report = inner.empty_report();

        let Some(_guard) = BusyGuard::try_acquire(&inner.busy) else {
            tracing::debug!("[BACKFILL] {} {} busy; request dropped", inner.network, report.kind);
            report.outcome = BackfillOutcome::Busy;
            return Ok(report);
        };

        let cursor = inner.cursors.load_cursor(&inner.cursor_key).await?;
        report.cursor = cursor;

        // Fully covered explicit ranges never touch the network.
        match request {
            BackfillRequest::Range { start, end } if start > end => return Ok(report),
            BackfillRequest::Range { end, .. } if cursor.is_some_and(|c| end <= c) => {
                return Ok(report)
            }
            BackfillRequest::LookBack(0) => return Ok(report),
            _ => {}
        }

        let head = inner.client.block_number().await?;
        let (requested_start, requested_end) = match request {
            BackfillRequest::LookBack(n) => (head.saturating_sub(n.saturating_sub(1)), head),
            BackfillRequest::From(start) => (start, head),
            BackfillRequest::Range { start, end } => (start, end.min(head)),
        };
        let start = match cursor {
            Some(c) => requested_start.max(c.saturating_add(1)),
            None => requested_start,
        };
        let end = requested_end.min(head);
        if start > end {
            tracing::debug!(
                "[BACKFILL] {} {} nothing to do (cursor={:?}, head={})",
                inner.network,
                report.kind,
                cursor,
                head
            );
            return Ok(report);
        }
        tracing::info!(
            "[BACKFILL] {} {} scanning #{}..=#{} in batches of {}",
            inner.network,
            report.kind,
            start,
            end,
            inner.batch_size
        );

        let report = run_range(inner, start, end, report).await?;
        if report.outcome == BackfillOutcome::Completed {
            tracing::info!(
                "[BACKFILL] {} {} done: {} block(s), {} record(s), cursor={:?}",
                inner.network,
                report.kind,
                report.blocks_scanned,
                report.records_written,
                report.cursor
            );
        }
        Ok(report)
    }

    pub async fn status(&self) -> EngineStatus {
        let inner = &self.inner;
        let cursor = inner
            .cursors
            .load_cursor(&inner.cursor_key)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("[SCAN] {} cursor read failed: {}", inner.network, err);
                None
            });
        EngineStatus {
            network: inner.network.clone(),
            kind: inner.handler.kind().to_string(),
            active: self.is_active(),
            busy: self.is_busy(),
            cursor,
            blocks_scanned: inner.counters.blocks_scanned.load(Ordering::Relaxed),
            records_written: inner.counters.records_written.load(Ordering::Relaxed),
            failed_scans: inner.counters.failed_scans.load(Ordering::Relaxed),
            dropped_heights: inner.counters.dropped_heights.load(Ordering::Relaxed),
        }
    }
}

impl<H: BlockHandler> EngineInner<H> {
    fn empty_report(&self) -> BackfillReport {
        BackfillReport {
            network: self.network.clone(),
            kind: self.handler.kind().to_string(),
            range: None,
            blocks_scanned: 0,
            records_written: 0,
            cursor: None,
            outcome: BackfillOutcome::NoOp,
        }
    }
}

/// Live step: scan `[cursor + 1, target]`, at most [`LIVE_CATCH_UP_LIMIT`] blocks per wake-up.
/// Before the first committed block the range starts at the first head this engine saw.
async fn catch_up<H: BlockHandler>(
    inner: &Arc<EngineInner<H>>,
    target: u64,
) -> Result<BackfillReport, RadarError> {
    let mut report = inner.empty_report();
    let cursor = inner.cursors.load_cursor(&inner.cursor_key).await?;
    report.cursor = cursor;

    let start = match cursor {
        Some(c) => c.saturating_add(1),
        None => *inner
            .live_origin
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get_or_insert(target),
    };
    if start > target {
        return Ok(report);
    }
    let end = target.min(start.saturating_add(LIVE_CATCH_UP_LIMIT - 1));
    if end < target {
        tracing::info!(
            "[SCAN] {} {} {} block(s) behind head #{}; catching up to #{}",
            inner.network,
            report.kind,
            target - start + 1,
            target,
            end
        );
    }
    run_range(inner, start, end, report).await
}

/// Scan `[start, end]` in batches of `batch_size`, committing the cursor after each batch in
/// which every block succeeded. The first failed batch ends the run with `Aborted`.
async fn run_range<H: BlockHandler>(
    inner: &Arc<EngineInner<H>>,
    start: u64,
    end: u64,
    mut report: BackfillReport,
) -> Result<BackfillReport, RadarError> {
    report.range = Some((start, end));

    let mut batch_start = start;
    while batch_start <= end {
        let batch_end = batch_start
            .saturating_add(inner.batch_size as u64 - 1)
            .min(end);

        let mut in_flight = JoinSet::new();
        for height in batch_start..=batch_end {
            let scan = Arc::clone(inner);
            in_flight.spawn(async move { (height, scan_height(&scan, height).await) });
        }

        let mut failure: Option<(u64, String)> = None;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((_, Ok(written))) => {
                    report.blocks_scanned += 1;
                    report.records_written += written as u64;
                }
                Ok((height, Err(err))) => {
                    let lower = failure.as_ref().map_or(true, |(h, _)| height < *h);
                    if lower {
                        failure = Some((height, err.to_string()));
                    }
                }
                Err(err) => {
                    failure.get_or_insert((batch_start, format!("scan task failed: {err}")));
                }
            }
        }

        if let Some((failed_height, error)) = failure {
            tracing::warn!(
                "[SCAN] {} {} stopped at #{} (cursor stays at {:?}): {}",
                inner.network,
                report.kind,
                failed_height,
                report.cursor,
                error
            );
            report.outcome = BackfillOutcome::Aborted {
                failed_height,
                error,
            };
            return Ok(report);
        }

        report.cursor = Some(
            inner
                .cursors
                .advance_cursor(&inner.cursor_key, batch_end)
                .await?,
        );
        batch_start = batch_end.saturating_add(1);
        if batch_end == u64::MAX {
            break;
        }
    }

    report.outcome = BackfillOutcome::Completed;
    Ok(report)
}

async fn scan_height<H: BlockHandler>(
    inner: &EngineInner<H>,
    height: u64,
) -> Result<usize, RadarError> {
    let result = fetch_and_handle(inner, height).await;
    match &result {
        Ok(written) => {
            inner.counters.blocks_scanned.fetch_add(1, Ordering::Relaxed);
            inner
                .counters
                .records_written
                .fetch_add(*written as u64, Ordering::Relaxed);
        }
        Err(_) => {
            inner.counters.failed_scans.fetch_add(1, Ordering::Relaxed);
        }
    }
    result
}

async fn fetch_and_handle<H: BlockHandler>(
    inner: &EngineInner<H>,
    height: u64,
) -> Result<usize, RadarError> {
    let block = inner
        .client
        .block(height, true)
        .await?
        .ok_or_else(|| {
            RpcError::decode(inner.network.clone(), format!("block #{height} not available"))
        })?;
    let written = inner.handler.handle_block(&block).await?;
    if written > 0 {
        tracing::debug!(
            "[SCAN] {} {} block #{}: {} record(s)",
            inner.network,
            inner.handler.kind(),
            height,
            written
        );
    }
    Ok(written)
}
