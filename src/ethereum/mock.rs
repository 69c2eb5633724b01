//! Scripted in-memory chain used by unit tests.

use alloy::primitives::{Address, Bytes};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{ChainClient, ChainConnector, LogRecord};
use crate::error::RpcError;

#[derive(Default)]
struct MockState {
    code: HashMap<Address, Bytes>,
    block: u64,
    block_errors: VecDeque<RpcError>,
    gas_price: u128,
    gas_errors: VecDeque<RpcError>,
    logs: Vec<LogRecord>,
    failing_logs: HashMap<Address, usize>,
    log_queries: Vec<(Address, u64, u64)>,
    code_queries: usize,
}

pub struct MockChain {
    chain_id: u64,
    probe_delay: Option<Duration>,
    failing_probe: bool,
    failing_code: Option<RpcError>,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            probe_delay: None,
            failing_probe: false,
            failing_code: None,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn failing_probe(mut self) -> Self {
        self.failing_probe = true;
        self
    }

    pub fn failing_code(mut self, error: RpcError) -> Self {
        self.failing_code = Some(error);
        self
    }

    pub fn with_code(self, address: Address, code: &[u8]) -> Self {
        self.state
            .lock()
            .unwrap()
            .code
            .insert(address, Bytes::copy_from_slice(code));
        self
    }

    pub fn with_block(self, block: u64) -> Self {
        self.set_block(block);
        self
    }

    pub fn set_block(&self, block: u64) {
        self.state.lock().unwrap().block = block;
    }

    pub fn set_gas_price(&self, wei: u128) {
        self.state.lock().unwrap().gas_price = wei;
    }

    pub fn fail_next_block_number(&self, error: RpcError) {
        self.state.lock().unwrap().block_errors.push_back(error);
    }

    pub fn fail_next_gas_price(&self, error: RpcError) {
        self.state.lock().unwrap().gas_errors.push_back(error);
    }

    pub fn fail_logs(&self, address: Address, times: usize) {
        self.state.lock().unwrap().failing_logs.insert(address, times);
    }

    pub fn push_log(&self, log: LogRecord) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn log_queries(&self) -> Vec<(Address, u64, u64)> {
        self.state.lock().unwrap().log_queries.clone()
    }

    pub fn queried_addresses(&self) -> HashSet<Address> {
        self.log_queries().into_iter().map(|(a, _, _)| a).collect()
    }

    pub fn code_queries(&self) -> usize {
        self.state.lock().unwrap().code_queries
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn chain_id(&self) -> Result<u64, RpcError> {
        if let Some(delay) = self.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_probe {
            return Err(RpcError::Network("connection refused".to_string()));
        }
        Ok(self.chain_id)
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.code_queries += 1;
        if let Some(error) = &self.failing_code {
            return Err(error.clone());
        }
        Ok(state.code.get(&address).cloned().unwrap_or_default())
    }

    async fn block_number(&self) -> Result<u64, RpcError> {
        let mut state = self.state.lock().unwrap();
        match state.block_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.block),
        }
    }

    async fn gas_price(&self) -> Result<u128, RpcError> {
        let mut state = self.state.lock().unwrap();
        match state.gas_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(state.gas_price),
        }
    }

    async fn logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<LogRecord>, RpcError> {
        let mut state = self.state.lock().unwrap();
        state.log_queries.push((address, from_block, to_block));

        if let Some(remaining) = state.failing_logs.get_mut(&address) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RpcError::RateLimited("429 Too Many Requests".to_string()));
            }
        }

        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == address)
            .filter(|log| {
                log.block_number
                    .map(|b| b >= from_block && b <= to_block)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }
}

/// Maps endpoint URLs to scripted chains or connection failures.
#[derive(Default)]
pub struct MockConnector {
    endpoints: HashMap<String, Result<Arc<MockChain>, RpcError>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chain(self, url: &str, chain: MockChain) -> Self {
        self.with_shared_chain(url, Arc::new(chain))
    }

    pub fn with_shared_chain(mut self, url: &str, chain: Arc<MockChain>) -> Self {
        self.endpoints.insert(url.to_string(), Ok(chain));
        self
    }

    pub fn with_failure(mut self, url: &str, error: RpcError) -> Self {
        self.endpoints.insert(url.to_string(), Err(error));
        self
    }
}

#[async_trait]
impl ChainConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
        match self.endpoints.get(url) {
            Some(Ok(chain)) => {
                let client: Arc<dyn ChainClient> = chain.clone();
                Ok(client)
            }
            Some(Err(error)) => Err(error.clone()),
            None => Err(RpcError::Network(format!("no route to {}", url))),
        }
    }
}
