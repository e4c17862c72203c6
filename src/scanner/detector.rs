use crate::analyzer::RiskAnalyzer;
use crate::config::chains::NetworkConfig;
use crate::error::RadarError;
use crate::models::{ContractRecord, Deployment};
use crate::rpc::client::{BlockData, ChainClient, TxData};
use crate::scanner::BlockHandler;
use crate::storage::EntityStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Turns contract-creation transactions into scored, persisted [`ContractRecord`]s.
pub struct DeploymentDetector {
    network: NetworkConfig,
    client: Arc<dyn ChainClient>,
    analyzer: Arc<RiskAnalyzer>,
    entities: Arc<dyn EntityStore>,
}

impl DeploymentDetector {
    pub fn new(
        network: NetworkConfig,
        client: Arc<dyn ChainClient>,
        analyzer: Arc<RiskAnalyzer>,
        entities: Arc<dyn EntityStore>,
    ) -> Self {
        Self {
            network,
            client,
            analyzer,
            entities,
        }
    }

    /// Resolve the receipt of a creation transaction and record the deployed contract.
    /// `Ok(None)` when the transaction is skipped: missing or failed receipt, or no created address.
    pub async fn inspect(
        &self,
        block: &BlockData,
        tx: &TxData,
    ) -> Result<Option<ContractRecord>, RadarError> {
        let receipt = match self.client.receipt(tx.hash).await {
            Ok(Some(receipt)) => receipt,
            Ok(None) => {
                tracing::debug!("[SCAN] {} receipt for {:#x} not found", self.network.key, tx.hash);
                return Ok(None);
            }
            Err(err) => {
                tracing::debug!(
                    "[SCAN] {} receipt for {:#x} failed, skipping: {}",
                    self.network.key,
                    tx.hash,
                    err
                );
                return Ok(None);
            }
        };
        if !receipt.status {
            tracing::debug!("[SCAN] {} creation {:#x} reverted", self.network.key, tx.hash);
            return Ok(None);
        }
        let Some(address) = receipt.contract_address else {
            return Ok(None);
        };

        let deployment = Deployment {
            address,
            deployer: tx.from,
            block_number: block.number,
            tx_hash: tx.hash,
            timestamp: block.timestamp,
        };
        let profile = self
            .analyzer
            .analyze(self.client.as_ref(), &self.network, address, tx.from)
            .await;
        let record = ContractRecord::from_profile(&self.network.key, &deployment, profile);
        self.entities.upsert_contract(&record).await?;

        tracing::info!(
            "[SCAN] {} #{} new {} {:#x} by {:#x}: score={} tag={}",
            self.network.key,
            record.block_number,
            record.kind,
            record.address,
            record.deployer,
            record.risk_score,
            record.tag.as_str()
        );
        Ok(Some(record))
    }
}

#[async_trait]
impl BlockHandler for DeploymentDetector {
    fn kind(&self) -> &'static str {
        "contracts"
    }

    fn cursor_key(&self, network: &str) -> String {
        network.to_string()
    }

    async fn handle_block(&self, block: &BlockData) -> Result<usize, RadarError> {
        let mut written = 0;
        for tx in block.transactions.iter().filter(|tx| tx.to.is_none()) {
            if self.inspect(block, tx).await?.is_some() {
                written += 1;
            }
        }
        Ok(written)
    }
}
