pub mod explorer;
pub mod provider;
pub mod utils;

#[cfg(test)]
pub mod mock;

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::RpcError;

/// One raw log as returned by `eth_getLogs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
}

/// The blockchain RPC calls the pipeline depends on. Every call may time out,
/// be rate limited, or fail on the network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Network identification, used as the liveness probe.
    async fn chain_id(&self) -> Result<u64, RpcError>;

    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError>;

    async fn block_number(&self) -> Result<u64, RpcError>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<u128, RpcError>;

    /// Logs emitted by `address` in the inclusive block range.
    async fn logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, RpcError>;
}

/// Opens a client for an endpoint URL. Opening is cheap; liveness is checked
/// separately with [`ChainClient::chain_id`].
#[async_trait]
pub trait ChainConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError>;
}
