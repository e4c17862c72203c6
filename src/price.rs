//! USD price feed for native assets, with a TTL cache in front of the network source.

use crate::error::RpcError;
use crate::rpc::client::RpcResult;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

const COINGECKO_SIMPLE_PRICE_URL: &str = "https://api.coingecko.com/api/v3/simple/price";
const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Spot USD price for a price-feed ticker such as `"ethereum"`.
    async fn usd_price(&self, ticker: &str) -> RpcResult<f64>;
}

fn price_err(ticker: &str, message: impl Into<String>) -> RpcError {
    RpcError::Price {
        ticker: ticker.to_string(),
        message: message.into(),
    }
}

/// CoinGecko `simple/price` endpoint. Response shape: `{"ethereum":{"usd":3012.4}}`.
pub struct CoinGeckoPriceSource {
    http: reqwest::Client,
    base_url: String,
}

impl Default for CoinGeckoPriceSource {
    fn default() -> Self {
        Self::new(COINGECKO_SIMPLE_PRICE_URL)
    }
}

impl CoinGeckoPriceSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    async fn fetch_once(&self, ticker: &str) -> RpcResult<f64> {
        let resp = self
            .http
            .get(&self.base_url)
            .query(&[("ids", ticker), ("vs_currencies", "usd")])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| price_err(ticker, e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(price_err(ticker, format!("HTTP {status}")));
        }
        let body: HashMap<String, HashMap<String, f64>> = resp
            .json()
            .await
            .map_err(|e| price_err(ticker, format!("bad body: {e}")))?;
        parse_usd(&body, ticker)
    }
}

fn parse_usd(body: &HashMap<String, HashMap<String, f64>>, ticker: &str) -> RpcResult<f64> {
    let price = body
        .get(ticker)
        .and_then(|quotes| quotes.get("usd"))
        .copied()
        .ok_or_else(|| price_err(ticker, "no usd quote in response"))?;
    if !price.is_finite() || price < 0.0 {
        return Err(price_err(ticker, format!("nonsensical price {price}")));
    }
    Ok(price)
}

#[async_trait]
impl PriceSource for CoinGeckoPriceSource {
    async fn usd_price(&self, ticker: &str) -> RpcResult<f64> {
        let mut last_err = price_err(ticker, "no attempt made");
        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1_000 * 2u64.pow(attempt - 1))).await;
            }
            match self.fetch_once(ticker).await {
                Ok(price) => return Ok(price),
                Err(err) => {
                    tracing::debug!("[PRICE] {} attempt {} failed: {}", ticker, attempt + 1, err);
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    usd: f64,
    fetched_at: Instant,
}

/// Per-ticker cache. A fresh entry is served without touching the source; when a refresh fails
/// the last known price is served instead, however old.
pub struct PriceCache {
    source: Arc<dyn PriceSource>,
    ttl: Duration,
    entries: DashMap<String, CachedPrice>,
}

impl PriceCache {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            entries: DashMap::new(),
        }
    }

    pub async fn get_price(&self, ticker: &str) -> RpcResult<f64> {
        let cached = self.entries.get(ticker).map(|entry| *entry);
        if let Some(hit) = cached {
            if hit.fetched_at.elapsed() < self.ttl {
                return Ok(hit.usd);
            }
        }

        match self.source.usd_price(ticker).await {
            Ok(usd) => {
                self.entries.insert(
                    ticker.to_string(),
                    CachedPrice {
                        usd,
                        fetched_at: Instant::now(),
                    },
                );
                tracing::debug!("[PRICE] {} = ${:.2}", ticker, usd);
                Ok(usd)
            }
            Err(err) => match cached {
                Some(stale) => {
                    tracing::warn!(
                        "[PRICE] {} refresh failed, serving price from {}s ago: {}",
                        ticker,
                        stale.fetched_at.elapsed().as_secs(),
                        err
                    );
                    Ok(stale.usd)
                }
                None => Err(err),
            },
        }
    }
}
