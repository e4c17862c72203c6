use crate::analyzer::RiskAnalyzer;
use crate::config::chains::NetworkConfig;
use crate::error::{RadarError, RpcError};
use crate::price::PriceCache;
use crate::rpc::client::ChainClient;
use crate::rpc::pool::{EndpointPool, NetworkClient, PoolStatus};
use crate::scanner::{
    BackfillReport, BackfillRequest, DeploymentDetector, EngineStatus, ScanEngine, WalletScanner,
    WalletSettings,
};
use crate::storage::{CursorStore, EntityStore};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

const HEAD_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanOptions {
    pub batch_size: usize,
    /// `None` disables the wallet scanner.
    pub wallets: Option<WalletSettings>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            batch_size: crate::utils::config::DEFAULT_BATCH_SIZE,
            wallets: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub network: String,
    pub chain_id: u64,
    pub live: bool,
    pub contracts: EngineStatus,
    pub wallets: Option<EngineStatus>,
    pub pool: Option<PoolStatus>,
}

struct LiveTasks {
    watcher: JoinHandle<()>,
    fanout: JoinHandle<()>,
}

struct NetworkScan {
    config: NetworkConfig,
    contracts: ScanEngine<DeploymentDetector>,
    wallets: Option<ScanEngine<WalletScanner>>,
    live: Mutex<Option<LiveTasks>>,
}

/// Owns the per-network engines and their head-following tasks. Networks never share scan
/// state; the pool and the stores are the only shared pieces.
pub struct ScanManager {
    pool: Arc<EndpointPool>,
    cursors: Arc<dyn CursorStore>,
    entities: Arc<dyn EntityStore>,
    prices: Option<Arc<PriceCache>>,
    analyzer: Arc<RiskAnalyzer>,
    options: ScanOptions,
    networks: BTreeMap<String, NetworkScan>,
}

impl ScanManager {
    pub fn new(
        pool: Arc<EndpointPool>,
        cursors: Arc<dyn CursorStore>,
        entities: Arc<dyn EntityStore>,
        prices: Option<Arc<PriceCache>>,
        options: ScanOptions,
    ) -> Self {
        Self {
            pool,
            cursors,
            entities,
            prices,
            analyzer: Arc::new(RiskAnalyzer::default()),
            options,
            networks: BTreeMap::new(),
        }
    }

    /// Build the engines for a network already registered with the pool.
    pub fn add_network(&mut self, config: NetworkConfig) -> Result<(), RadarError> {
        self.pool.block_time_ms(&config.key)?;
        let client: Arc<dyn ChainClient> =
            Arc::new(NetworkClient::new(Arc::clone(&self.pool), config.key.clone()));

        let detector = DeploymentDetector::new(
            config.clone(),
            Arc::clone(&client),
            Arc::clone(&self.analyzer),
            Arc::clone(&self.entities),
        );
        let contracts = ScanEngine::new(
            config.key.clone(),
            Arc::clone(&client),
            Arc::clone(&self.cursors),
            Arc::new(detector),
            self.options.batch_size,
        );

        let wallets = match (self.options.wallets, &self.prices) {
            (Some(settings), Some(prices)) => {
                let scanner = WalletScanner::new(
                    config.clone(),
                    Arc::clone(&client),
                    Arc::clone(prices),
                    Arc::clone(&self.entities),
                    settings,
                );
                Some(ScanEngine::new(
                    config.key.clone(),
                    Arc::clone(&client),
                    Arc::clone(&self.cursors),
                    Arc::new(scanner),
                    self.options.batch_size,
                ))
            }
            (Some(_), None) => {
                tracing::warn!(
                    "[WALLET] {} wallet scanning requested without a price feed; disabled",
                    config.key
                );
                None
            }
            _ => None,
        };

        tracing::info!(
            "[STARTUP] {} (chain {}) ready: contracts{}",
            config.name,
            config.chain_id,
            if wallets.is_some() { " + wallets" } else { "" }
        );
        self.networks.insert(
            config.key.clone(),
            NetworkScan {
                config,
                contracts,
                wallets,
                live: Mutex::new(None),
            },
        );
        Ok(())
    }

    pub fn networks(&self) -> Vec<String> {
        self.networks.keys().cloned().collect()
    }

    fn scan(&self, network: &str) -> Result<&NetworkScan, RadarError> {
        self.networks
            .get(network)
            .ok_or_else(|| RpcError::UnknownNetwork(network.to_string()).into())
    }

    /// Start following the chain head. Returns `false` if the network was already live.
    pub fn start(&self, network: &str) -> Result<bool, RadarError> {
        let scan = self.scan(network)?;
        let mut live = scan.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if live.is_some() {
            return Ok(false);
        }

        let (head_tx, mut head_rx) = mpsc::channel::<u64>(HEAD_CHANNEL_CAPACITY);
        let watcher = self.pool.watch_heads(network, head_tx)?;

        let mut outlets = Vec::with_capacity(2);
        let (tx, rx) = mpsc::channel(HEAD_CHANNEL_CAPACITY);
        scan.contracts.start(rx);
        outlets.push(tx);
        if let Some(wallets) = &scan.wallets {
            let (tx, rx) = mpsc::channel(HEAD_CHANNEL_CAPACITY);
            wallets.start(rx);
            outlets.push(tx);
        }

        let key = network.to_string();
        let fanout = tokio::spawn(async move {
            while let Some(height) = head_rx.recv().await {
                for outlet in &outlets {
                    match outlet.try_send(height) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            tracing::debug!(
                                "[SCAN] {} head #{} dropped; scanner behind",
                                key,
                                height
                            );
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }
        });

        *live = Some(LiveTasks { watcher, fanout });
        tracing::info!("[SCAN] {} live scanning started", network);
        Ok(true)
    }

    /// Stop head-following. Scans already dispatched finish on their own.
    pub fn stop(&self, network: &str) -> Result<bool, RadarError> {
        let scan = self.scan(network)?;
        let tasks = scan
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(tasks) = tasks else {
            return Ok(false);
        };
        tasks.watcher.abort();
        tasks.fanout.abort();
        scan.contracts.stop();
        if let Some(wallets) = &scan.wallets {
            wallets.stop();
        }
        tracing::info!("[SCAN] {} live scanning stopped", network);
        Ok(true)
    }

    pub fn start_all(&self) -> Result<(), RadarError> {
        for network in self.networks.keys() {
            self.start(network)?;
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for network in self.networks.keys() {
            if let Err(err) = self.stop(network) {
                tracing::warn!("[SCAN] {} stop failed: {}", network, err);
            }
        }
    }

    pub fn is_live(&self, network: &str) -> bool {
        self.networks.get(network).is_some_and(|scan| {
            scan.live
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .is_some()
        })
    }

    pub async fn backfill(
        &self,
        network: &str,
        request: BackfillRequest,
    ) -> Result<BackfillReport, RadarError> {
        self.scan(network)?.contracts.backfill(request).await
    }

    /// `Ok(None)` when the network runs without a wallet scanner.
    pub async fn backfill_wallets(
        &self,
        network: &str,
        request: BackfillRequest,
    ) -> Result<Option<BackfillReport>, RadarError> {
        match &self.scan(network)?.wallets {
            Some(engine) => engine.backfill(request).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn status(&self, network: &str) -> Result<NetworkStatus, RadarError> {
        let scan = self.scan(network)?;
        let wallets = match &scan.wallets {
            Some(engine) => Some(engine.status().await),
            None => None,
        };
        Ok(NetworkStatus {
            network: scan.config.key.clone(),
            chain_id: scan.config.chain_id,
            live: self.is_live(network),
            contracts: scan.contracts.status().await,
            wallets,
            pool: self.pool.status(network).ok(),
        })
    }
}
