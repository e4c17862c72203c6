use crate::analyzer::patterns::is_safe_multisig;
use crate::config::chains::NetworkConfig;
use crate::error::RadarError;
use crate::models::{record_id, WalletRecord};
use crate::price::PriceCache;
use crate::rpc::client::{BlockData, ChainClient};
use crate::scanner::BlockHandler;
use crate::storage::EntityStore;
use alloy::primitives::utils::format_units;
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WalletSettings {
    /// Distinct addresses inspected per block.
    pub sample_size: usize,
    pub min_usd: f64,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            sample_size: crate::utils::config::DEFAULT_WALLET_SAMPLE_SIZE,
            min_usd: crate::utils::config::DEFAULT_WALLET_MIN_USD,
        }
    }
}

/// Distinct senders and recipients in first-seen order, at most `cap`.
pub fn sample_addresses(block: &BlockData, cap: usize) -> Vec<Address> {
    let mut seen = HashSet::new();
    let mut sampled = Vec::with_capacity(cap);
    let candidates = block
        .transactions
        .iter()
        .flat_map(|tx| std::iter::once(tx.from).chain(tx.to));
    for address in candidates {
        if sampled.len() >= cap {
            break;
        }
        if seen.insert(address) {
            sampled.push(address);
        }
    }
    sampled
}

/// Wei to native units. Precision loss beyond f64 is fine for valuation.
pub fn wei_to_native(wei: U256) -> f64 {
    format_units(wei, 18)
        .ok()
        .and_then(|units| units.parse::<f64>().ok())
        .unwrap_or(0.0)
}

/// Values sampled block participants and records the ones above the USD threshold.
pub struct WalletScanner {
    network: NetworkConfig,
    client: Arc<dyn ChainClient>,
    prices: Arc<PriceCache>,
    entities: Arc<dyn EntityStore>,
    settings: WalletSettings,
}

impl WalletScanner {
    pub fn new(
        network: NetworkConfig,
        client: Arc<dyn ChainClient>,
        prices: Arc<PriceCache>,
        entities: Arc<dyn EntityStore>,
        settings: WalletSettings,
    ) -> Self {
        Self {
            network,
            client,
            prices,
            entities,
            settings,
        }
    }

    async fn is_multisig(&self, address: Address) -> bool {
        match self.client.code(address).await {
            Ok(code) => is_safe_multisig(code.as_ref()),
            Err(err) => {
                tracing::debug!(
                    "[WALLET] {} code probe for {:#x} failed: {}",
                    self.network.key,
                    address,
                    err
                );
                false
            }
        }
    }
}

#[async_trait]
impl BlockHandler for WalletScanner {
    fn kind(&self) -> &'static str {
        "wallets"
    }

    fn cursor_key(&self, network: &str) -> String {
        format!("{network}:wallets")
    }

    async fn handle_block(&self, block: &BlockData) -> Result<usize, RadarError> {
        let addresses = sample_addresses(block, self.settings.sample_size);
        if addresses.is_empty() {
            return Ok(0);
        }

        // No price at all, not even a stale one: fail the block so the cursor holds.
        let price = self
            .prices
            .get_price(&self.network.price_ticker)
            .await
            .map_err(|err| {
                tracing::warn!(
                    "[WALLET] {} no {} price for block #{}: {}",
                    self.network.key,
                    self.network.native_symbol,
                    block.number,
                    err
                );
                err
            })?;

        let last_seen = DateTime::<Utc>::from_timestamp(
            i64::try_from(block.timestamp).unwrap_or(i64::MAX / 1_000),
            0,
        )
        .unwrap_or_default();

        let mut written = 0;
        for address in addresses {
            let balance = match self.client.balance(address).await {
                Ok(balance) => balance,
                Err(err) => {
                    tracing::debug!(
                        "[WALLET] {} balance for {:#x} failed, skipping: {}",
                        self.network.key,
                        address,
                        err
                    );
                    continue;
                }
            };
            let balance_native = wei_to_native(balance);
            let balance_usd = balance_native * price;
            if balance_usd < self.settings.min_usd {
                continue;
            }

            let record = WalletRecord {
                id: record_id(&self.network.key, address),
                address,
                network: self.network.key.clone(),
                balance_native,
                balance_usd,
                last_seen,
                is_multisig: self.is_multisig(address).await,
            };
            self.entities.upsert_wallet(&record).await?;
            written += 1;
            tracing::info!(
                "[WALLET] {} {:#x}: {:.4} {} (${:.0}){}",
                self.network.key,
                address,
                balance_native,
                self.network.native_symbol,
                balance_usd,
                if record.is_multisig { " [multisig]" } else { "" }
            );
        }
        Ok(written)
    }
}
