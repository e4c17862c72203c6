use crate::error::RpcError;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::sync::Arc;

pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxData {
    pub hash: B256,
    pub from: Address,
    /// `None` for contract-creation transactions.
    pub to: Option<Address>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockData {
    pub number: u64,
    /// Seconds since epoch.
    pub timestamp: u64,
    /// Empty when the block was fetched without full transactions.
    pub transactions: Vec<TxData>,
    pub tx_hashes: Vec<B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptData {
    pub tx_hash: B256,
    pub contract_address: Option<Address>,
    pub status: bool,
}

/// Read-only view of one JSON-RPC endpoint. Everything the scanner and the analyzer need from a
/// chain goes through this trait so tests can stand in a scripted chain.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn endpoint(&self) -> &str;

    async fn block_number(&self) -> RpcResult<u64>;

    async fn block(&self, number: u64, full: bool) -> RpcResult<Option<BlockData>>;

    async fn receipt(&self, tx_hash: B256) -> RpcResult<Option<ReceiptData>>;

    async fn code(&self, address: Address) -> RpcResult<Bytes>;

    async fn balance(&self, address: Address) -> RpcResult<U256>;

    /// `eth_call` against the latest block with pre-encoded calldata.
    async fn call(&self, to: Address, data: Bytes) -> RpcResult<Bytes>;
}

/// Builds a client for one endpoint URL. The pool calls this lazily, on the first `acquire`
/// after a rotation.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, url: &str) -> RpcResult<Arc<dyn ChainClient>>;
}
