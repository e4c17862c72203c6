pub mod alloy_client;
pub mod client;
pub mod pool;

pub use alloy_client::{HttpChainClient, HttpClientFactory};
pub use client::{BlockData, ChainClient, ClientFactory, ReceiptData, RpcResult, TxData};
pub use pool::{EndpointPool, NetworkClient, PoolSettings, PoolStatus};
