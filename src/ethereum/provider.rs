use alloy::{
    primitives::{Address, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::Filter,
    transports::http::{Client, Http},
};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ChainClient, ChainConnector, LogRecord};
use crate::error::RpcError;

/// HTTP JSON-RPC client backed by an alloy provider.
#[derive(Debug, Clone)]
pub struct AlloyChainClient {
    provider: RootProvider<Http<Client>>,
}

impl AlloyChainClient {
    pub fn new(rpc_url: &str) -> Result<Self, RpcError> {
        let url = rpc_url
            .parse::<reqwest::Url>()
            .map_err(|e| RpcError::Rpc(format!("Invalid RPC URL '{}': {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new().on_http(url);
        Ok(Self { provider })
    }
}

fn transport_error(e: impl std::fmt::Display) -> RpcError {
    RpcError::from_message(e.to_string())
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        self.provider.get_chain_id().await.map_err(transport_error)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        self.provider
            .get_code_at(address)
            .await
            .map_err(transport_error)
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        self.provider.get_block_number().await.map_err(transport_error)
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        self.provider.get_gas_price().await.map_err(transport_error)
    }

    async fn logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, RpcError> {
        let filter = Filter::new()
            .address(address)
            .from_block(from_block)
            .to_block(to_block);

        let logs = self.provider.get_logs(&filter).await.map_err(transport_error)?;

        Ok(logs
            .into_iter()
            .map(|log| LogRecord {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number,
                transaction_hash: log.transaction_hash,
                log_index: log.log_index,
            })
            .collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AlloyConnector;

#[async_trait]
impl ChainConnector for AlloyConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
        Ok(Arc::new(AlloyChainClient::new(url)?))
    }
}

/// An endpoint that answered the liveness probe in time.
#[derive(Clone)]
pub struct LiveEndpoint {
    pub url: String,
    pub chain_id: u64,
    pub client: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for LiveEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveEndpoint")
            .field("url", &self.url)
            .field("chain_id", &self.chain_id)
            .finish()
    }
}

/// Open `url` and require a network identification answer within `timeout`.
pub async fn probe_endpoint(
    connector: &dyn ChainConnector,
    url: &str,
    timeout: Duration,
) -> Result<LiveEndpoint, RpcError> {
    let client = connector.connect(url).await?;

    match tokio::time::timeout(timeout, client.chain_id()).await {
        Ok(Ok(chain_id)) => Ok(LiveEndpoint {
            url: url.to_string(),
            chain_id,
            client,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(RpcError::timed_out(timeout)),
    }
}

/// Ordered RPC failover list.
pub struct EndpointSelector {
    connector: Arc<dyn ChainConnector>,
    urls: Vec<String>,
    timeout: Duration,
}

impl EndpointSelector {
    pub fn new(connector: Arc<dyn ChainConnector>, urls: Vec<String>, timeout: Duration) -> Self {
        Self {
            connector,
            urls,
            timeout,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.urls.len()
    }

    /// Return the first endpoint that answers in time, or every failure in
    /// the order the endpoints were tried.
    pub async fn select(&self) -> Result<LiveEndpoint, Vec<(String, RpcError)>> {
        let mut failures = Vec::new();

        for url in &self.urls {
            match probe_endpoint(self.connector.as_ref(), url, self.timeout).await {
                Ok(endpoint) => {
                    info!("Using RPC endpoint {} (chain id {})", url, endpoint.chain_id);
                    return Ok(endpoint);
                }
                Err(e) => {
                    debug!("RPC {} failed or too slow, trying next: {}", url, e);
                    failures.push((url.clone(), e));
                }
            }
        }

        warn!("All {} RPC endpoints failed the liveness probe", self.urls.len());
        Err(failures)
    }
}
