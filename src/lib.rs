//! Multi-network EVM deployment scanner and risk indexer.
//!
//! Blocks come in through a failover [`rpc::EndpointPool`], creation transactions are scored by
//! the [`analyzer::RiskAnalyzer`] and everything lands in an [`storage::EntityStore`] whose change
//! feed downstream consumers subscribe to.

pub mod analyzer;
pub mod config;
pub mod error;
pub mod models;
pub mod price;
pub mod rpc;
pub mod scanner;
pub mod storage;
pub mod utils;
