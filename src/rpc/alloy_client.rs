use crate::error::RpcError;
use crate::rpc::client::{BlockData, ChainClient, ClientFactory, ReceiptData, RpcResult, TxData};
use alloy::consensus::Transaction;
use alloy::network::{ReceiptResponse, TransactionResponse};
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockTransactionsKind, TransactionInput, TransactionRequest};
use alloy::transports::http::Http;
use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{timeout, Duration};

pub type HttpProvider = RootProvider<Http<Client>>;

const RPC_CALL_TIMEOUT_MS: u64 = 10_000;

/// [`ChainClient`] over a plain HTTP JSON-RPC provider.
pub struct HttpChainClient {
    url: String,
    provider: HttpProvider,
    call_timeout_ms: u64,
}

impl HttpChainClient {
    pub fn connect(url: &str) -> RpcResult<Self> {
        let trimmed = url.trim();
        let parsed = trimmed
            .parse::<reqwest::Url>()
            .map_err(|err| RpcError::InvalidUrl {
                url: trimmed.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            url: trimmed.to_string(),
            provider: ProviderBuilder::new().on_http(parsed),
            call_timeout_ms: RPC_CALL_TIMEOUT_MS,
        })
    }

    async fn bounded<T, E, Fut>(&self, context: &str, fut: Fut) -> RpcResult<T>
    where
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        match timeout(Duration::from_millis(self.call_timeout_ms), fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(RpcError::transport(self.url.clone(), err)),
            Err(_) => Err(RpcError::Timeout {
                context: format!("{context} on {}", self.url),
                waited_ms: self.call_timeout_ms,
            }),
        }
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn block_number(&self) -> RpcResult<u64> {
        let fut = async { self.provider.get_block_number().await };
        self.bounded("eth_blockNumber", fut).await
    }

    async fn block(&self, number: u64, full: bool) -> RpcResult<Option<BlockData>> {
        let kind = if full {
            BlockTransactionsKind::Full
        } else {
            BlockTransactionsKind::Hashes
        };
        let fut = async { self.provider.get_block_by_number(number.into(), kind).await };
        let block = self.bounded("eth_getBlockByNumber", fut).await?;
        let Some(block) = block else {
            return Ok(None);
        };

        let block_number = block.header.number;
        let timestamp = block.header.timestamp;
        let (transactions, tx_hashes) = if full {
            let txs: Vec<TxData> = block
                .transactions
                .into_transactions()
                .map(|tx| TxData {
                    hash: TransactionResponse::tx_hash(&tx),
                    from: TransactionResponse::from(&tx),
                    to: Transaction::to(&tx),
                })
                .collect();
            let hashes = txs.iter().map(|tx| tx.hash).collect();
            (txs, hashes)
        } else {
            let hashes = block
                .transactions
                .as_hashes()
                .map(|h| h.to_vec())
                .unwrap_or_default();
            (Vec::new(), hashes)
        };

        Ok(Some(BlockData {
            number: block_number,
            timestamp,
            transactions,
            tx_hashes,
        }))
    }

    async fn receipt(&self, tx_hash: B256) -> RpcResult<Option<ReceiptData>> {
        let fut = async { self.provider.get_transaction_receipt(tx_hash).await };
        let receipt = self.bounded("eth_getTransactionReceipt", fut).await?;
        Ok(receipt.map(|r| ReceiptData {
            tx_hash: r.transaction_hash,
            contract_address: ReceiptResponse::contract_address(&r),
            status: ReceiptResponse::status(&r),
        }))
    }

    async fn code(&self, address: Address) -> RpcResult<Bytes> {
        let fut = async { self.provider.get_code_at(address).await };
        self.bounded("eth_getCode", fut).await
    }

    async fn balance(&self, address: Address) -> RpcResult<U256> {
        let fut = async { self.provider.get_balance(address).await };
        self.bounded("eth_getBalance", fut).await
    }

    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes> {
        let req = TransactionRequest::default()
            .to(to)
            .input(TransactionInput::new(data));
        let fut = async { self.provider.call(&req).await };
        self.bounded("eth_call", fut).await
    }
}

/// Production factory: one HTTP provider per endpoint URL.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpClientFactory;

impl ClientFactory for HttpClientFactory {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn ChainClient>> {
        let client = HttpChainClient::connect(url)?;
        Ok(Arc::new(client))
    }
}
