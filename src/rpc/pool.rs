use crate::config::chains::NetworkConfig;
use crate::error::RpcError;
use crate::rpc::client::{BlockData, ChainClient, ClientFactory, ReceiptData, RpcResult};
use crate::utils::clock::now_ms;
use crate::utils::rpc::{bounded_exponential_backoff_ms, is_endpoint_failure, parse_retry_after_ms};
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

/// Most heights the head watcher replays after a gap before it skips ahead.
const MAX_HEAD_CATCHUP: u64 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Consecutive failures before an endpoint's breaker opens.
    pub breaker_threshold: u32,
    pub breaker_base_ms: u64,
    pub breaker_cap_ms: u64,
    /// Backoff applied by `acquire` once a full cycle of endpoints failed in a row.
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            breaker_threshold: 3,
            breaker_base_ms: 5_000,
            breaker_cap_ms: 120_000,
            retry_base_ms: 500,
            retry_cap_ms: 30_000,
        }
    }
}

struct EndpointState {
    url: String,
    client: Option<Arc<dyn ChainClient>>,
    consecutive_failures: u32,
    trips: u32,
    open_until_ms: u64,
}

impl EndpointState {
    fn new(url: String) -> Self {
        Self {
            url,
            client: None,
            consecutive_failures: 0,
            trips: 0,
            open_until_ms: 0,
        }
    }

    fn is_open(&self, now: u64) -> bool {
        now < self.open_until_ms
    }
}

struct NetworkEndpoints {
    endpoints: Vec<EndpointState>,
    current: usize,
    /// Failures since the last success anywhere in this network's list.
    failure_streak: u32,
    block_time_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointStatus {
    pub url: String,
    pub consecutive_failures: u32,
    pub open: bool,
    pub open_for_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub network: String,
    pub current_index: usize,
    pub current_url: String,
    pub failure_streak: u32,
    pub endpoints: Vec<EndpointStatus>,
}

/// Per-network ordered endpoint lists with lazy connections, round-robin failover and a circuit
/// breaker per endpoint.
pub struct EndpointPool {
    factory: Arc<dyn ClientFactory>,
    settings: PoolSettings,
    networks: HashMap<String, Mutex<NetworkEndpoints>>,
}

/// Request-level failures (reverts, bad params) are the caller's problem and leave the endpoint
/// alone.
fn counts_against_endpoint(err: &RpcError) -> bool {
    match err {
        RpcError::Transport { message, .. } => is_endpoint_failure(message),
        RpcError::Decode { .. } | RpcError::Timeout { .. } | RpcError::InvalidUrl { .. } => true,
        RpcError::NoEndpoints(_) | RpcError::UnknownNetwork(_) | RpcError::Price { .. } => false,
    }
}

impl EndpointPool {
    pub fn new(factory: Arc<dyn ClientFactory>, settings: PoolSettings) -> Self {
        Self {
            factory,
            settings,
            networks: HashMap::new(),
        }
    }

    pub fn register(&mut self, network: &NetworkConfig) -> RpcResult<()> {
        self.register_urls(&network.key, &network.rpc_urls, network.block_time_ms)
    }

    pub fn register_urls(
        &mut self,
        network: &str,
        urls: &[String],
        block_time_ms: u64,
    ) -> RpcResult<()> {
        let endpoints: Vec<EndpointState> = urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(|u| EndpointState::new(u.to_string()))
            .collect();
        if endpoints.is_empty() {
            return Err(RpcError::NoEndpoints(network.to_string()));
        }
        self.networks.insert(
            network.to_string(),
            Mutex::new(NetworkEndpoints {
                endpoints,
                current: 0,
                failure_streak: 0,
                block_time_ms: block_time_ms.max(1),
            }),
        );
        Ok(())
    }

    pub fn settings(&self) -> PoolSettings {
        self.settings
    }

    pub fn networks(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.networks.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn state(&self, network: &str) -> RpcResult<MutexGuard<'_, NetworkEndpoints>> {
        let slot = self
            .networks
            .get(network)
            .ok_or_else(|| RpcError::UnknownNetwork(network.to_string()))?;
        Ok(slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    /// Current endpoint's connection, built on first use. Returns the endpoint index so the
    /// outcome can be reported against the right breaker.
    pub async fn acquire(&self, network: &str) -> RpcResult<(usize, Arc<dyn ChainClient>)> {
        let wait_ms = {
            let state = self.state(network)?;
            let len = state.endpoints.len() as u32;
            if state.failure_streak >= len {
                let cycles = state.failure_streak / len;
                bounded_exponential_backoff_ms(
                    self.settings.retry_base_ms,
                    cycles.saturating_sub(1),
                    self.settings.retry_cap_ms,
                )
            } else {
                0
            }
        };
        if wait_ms > 0 {
            tracing::debug!(
                "[POOL] {} every endpoint failed in a row; backing off {}ms",
                network,
                wait_ms
            );
            sleep(Duration::from_millis(wait_ms)).await;
        }

        let mut state = self.state(network)?;
        let idx = state.current;
        if let Some(client) = state.endpoints[idx].client.clone() {
            return Ok((idx, client));
        }

        let url = state.endpoints[idx].url.clone();
        match self.factory.connect(&url) {
            Ok(client) => {
                state.endpoints[idx].client = Some(client.clone());
                Ok((idx, client))
            }
            Err(err) => {
                drop(state);
                self.report_failure(network, idx, &err);
                Err(err)
            }
        }
    }

    /// Advance to the next endpoint (modulo the list length) and drop connections so the next
    /// `acquire` reconnects.
    pub fn rotate(&self, network: &str) -> RpcResult<usize> {
        let mut state = self.state(network)?;
        Ok(self.rotate_locked(network, &mut state))
    }

    fn rotate_locked(&self, network: &str, state: &mut NetworkEndpoints) -> usize {
        let len = state.endpoints.len();
        let from = state.current;
        state.endpoints[from].client = None;

        let now = now_ms();
        let any_closed = state.endpoints.iter().any(|e| !e.is_open(now));
        let mut next = (from + 1) % len;
        if any_closed {
            for _ in 0..len {
                if !state.endpoints[next].is_open(now) {
                    break;
                }
                next = (next + 1) % len;
            }
        }
        state.current = next;
        state.endpoints[next].client = None;

        if len > 1 {
            tracing::warn!(
                "[POOL] {} rotated endpoint {} -> {} ({})",
                network,
                from,
                next,
                state.endpoints[next].url
            );
        }
        next
    }

    pub fn current_index(&self, network: &str) -> RpcResult<usize> {
        Ok(self.state(network)?.current)
    }

    pub fn block_time_ms(&self, network: &str) -> RpcResult<u64> {
        Ok(self.state(network)?.block_time_ms)
    }

    /// Count a failure against endpoint `idx`, open its breaker when the threshold is reached,
    /// and rotate if it is still the current endpoint.
    pub fn report_failure(&self, network: &str, idx: usize, err: &RpcError) {
        let Ok(mut state) = self.state(network) else {
            return;
        };
        if idx >= state.endpoints.len() {
            return;
        }
        state.failure_streak = state.failure_streak.saturating_add(1);

        let threshold = self.settings.breaker_threshold.max(1);
        let endpoint = &mut state.endpoints[idx];
        endpoint.consecutive_failures = endpoint.consecutive_failures.saturating_add(1);
        if endpoint.consecutive_failures >= threshold {
            let backoff = bounded_exponential_backoff_ms(
                self.settings.breaker_base_ms,
                endpoint.trips,
                self.settings.breaker_cap_ms,
            );
            let cooldown_ms = if err.is_rate_limited() {
                parse_retry_after_ms(&err.to_string())
                    .map(|hint| hint.min(self.settings.breaker_cap_ms))
                    .unwrap_or(backoff)
                    .max(backoff)
            } else {
                backoff
            };
            endpoint.trips = endpoint.trips.saturating_add(1);
            endpoint.consecutive_failures = 0;
            endpoint.open_until_ms = now_ms().saturating_add(cooldown_ms);
            tracing::warn!(
                "[POOL] {} breaker open for {} ({}ms): {}",
                network,
                endpoint.url,
                cooldown_ms,
                err
            );
        } else {
            tracing::debug!("[POOL] {} endpoint {} failed: {}", network, endpoint.url, err);
        }

        if state.current == idx {
            self.rotate_locked(network, &mut state);
        }
    }

    pub fn report_success(&self, network: &str, idx: usize) {
        let Ok(mut state) = self.state(network) else {
            return;
        };
        state.failure_streak = 0;
        if let Some(endpoint) = state.endpoints.get_mut(idx) {
            endpoint.consecutive_failures = 0;
            endpoint.trips = 0;
            endpoint.open_until_ms = 0;
        }
    }

    async fn with_client<T, F, Fut>(&self, network: &str, op: F) -> RpcResult<T>
    where
        F: FnOnce(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = RpcResult<T>>,
    {
        let (idx, client) = self.acquire(network).await?;
        match op(client).await {
            Ok(value) => {
                self.report_success(network, idx);
                Ok(value)
            }
            Err(err) => {
                if counts_against_endpoint(&err) {
                    self.report_failure(network, idx, &err);
                }
                Err(err)
            }
        }
    }

    pub async fn block_number(&self, network: &str) -> RpcResult<u64> {
        self.with_client(network, |c| async move { c.block_number().await }).await
    }

    pub async fn block(
        &self,
        network: &str,
        number: u64,
        full: bool,
    ) -> RpcResult<Option<BlockData>> {
        self.with_client(network, |c| async move { c.block(number, full).await }).await
    }

    pub async fn receipt(&self, network: &str, tx_hash: B256) -> RpcResult<Option<ReceiptData>> {
        self.with_client(network, |c| async move { c.receipt(tx_hash).await }).await
    }

    pub async fn code(&self, network: &str, address: Address) -> RpcResult<Bytes> {
        self.with_client(network, |c| async move { c.code(address).await }).await
    }

    pub async fn balance(&self, network: &str, address: Address) -> RpcResult<U256> {
        self.with_client(network, |c| async move { c.balance(address).await }).await
    }

    pub async fn call(&self, network: &str, to: Address, data: Bytes) -> RpcResult<Bytes> {
        self.with_client(network, |c| async move { c.call(to, data).await }).await
    }

    pub fn status(&self, network: &str) -> RpcResult<PoolStatus> {
        let state = self.state(network)?;
        let now = now_ms();
        Ok(PoolStatus {
            network: network.to_string(),
            current_index: state.current,
            current_url: state.endpoints[state.current].url.clone(),
            failure_streak: state.failure_streak,
            endpoints: state
                .endpoints
                .iter()
                .map(|e| EndpointStatus {
                    url: e.url.clone(),
                    consecutive_failures: e.consecutive_failures,
                    open: e.is_open(now),
                    open_for_ms: e.open_until_ms.saturating_sub(now),
                })
                .collect(),
        })
    }

    /// Poll the head at the network's block interval and push every new height, in order, into
    /// `heads`. Stops when the receiver is dropped.
    pub fn watch_heads(
        self: &Arc<Self>,
        network: &str,
        heads: mpsc::Sender<u64>,
    ) -> RpcResult<JoinHandle<()>> {
        let interval_ms = self.block_time_ms(network)?;
        let pool = Arc::clone(self);
        let network = network.to_string();
        Ok(tokio::spawn(async move {
            let mut last: Option<u64> = None;
            loop {
                match pool.block_number(&network).await {
                    Ok(head) => {
                        let first = match last {
                            None => head,
                            Some(prev) if head > prev => {
                                let from = prev + 1;
                                if head - from >= MAX_HEAD_CATCHUP {
                                    tracing::warn!(
                                        "[POOL] {} head jumped {} -> {}; skipping to the newest {} heights",
                                        network,
                                        prev,
                                        head,
                                        MAX_HEAD_CATCHUP
                                    );
                                    head + 1 - MAX_HEAD_CATCHUP
                                } else {
                                    from
                                }
                            }
                            Some(_) => head + 1,
                        };
                        for height in first..=head {
                            if heads.send(height).await.is_err() {
                                return;
                            }
                            last = Some(height);
                        }
                    }
                    Err(err) => {
                        tracing::warn!("[POOL] {} head poll failed: {}", network, err);
                    }
                }
                if heads.is_closed() {
                    return;
                }
                sleep(Duration::from_millis(interval_ms)).await;
            }
        }))
    }
}

/// One network's view of the pool as a [`ChainClient`], so callers that take a single client get
/// failover for free.
#[derive(Clone)]
pub struct NetworkClient {
    pool: Arc<EndpointPool>,
    network: String,
}

impl NetworkClient {
    pub fn new(pool: Arc<EndpointPool>, network: impl Into<String>) -> Self {
        Self {
            pool,
            network: network.into(),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }
}

#[async_trait]
impl ChainClient for NetworkClient {
    /// Network key; the concrete endpoint changes under rotation.
    fn endpoint(&self) -> &str {
        &self.network
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.pool.block_number(&self.network).await
    }

    async fn block(&self, number: u64, full: bool) -> RpcResult<Option<BlockData>> {
        self.pool.block(&self.network, number, full).await
    }

    async fn receipt(&self, tx_hash: B256) -> RpcResult<Option<ReceiptData>> {
        self.pool.receipt(&self.network, tx_hash).await
    }

    async fn code(&self, address: Address) -> RpcResult<Bytes> {
        self.pool.code(&self.network, address).await
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        self.pool.balance(&self.network, address).await
    }

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes> {
        self.pool.call(&self.network, to, data).await
    }
}
