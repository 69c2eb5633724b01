use alloy::primitives::Address;
use tokio::sync::RwLock;
use tracing::info;

use super::types::{AlertConfig, ContractStatus, MonitoredContract, MonitoringEvent};
use crate::config::WatchTarget;
use crate::error::MonitorError;
use crate::ethereum::utils::validate_address;

const DEFAULT_DECIMALS: u8 = 18;

/// What the poll loop needs to know about an active contract for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTarget {
    pub address: Address,
    pub name: String,
    pub decimals: u8,
}

/// In-memory registry of watched contracts and the alert configuration.
///
/// User edits take effect on the next poll tick. The poll loop is the only
/// writer of event buffers and stats.
#[derive(Debug, Default)]
pub struct Watchlist {
    contracts: RwLock<Vec<MonitoredContract>>,
    alerts: RwLock<AlertConfig>,
}

fn parse_address(address: &str) -> Result<Address, MonitorError> {
    validate_address(address).map_err(|_| MonitorError::InvalidAddress(address.trim().to_string()))
}

impl Watchlist {
    pub fn new(alerts: AlertConfig) -> Self {
        Self {
            contracts: RwLock::new(Vec::new()),
            alerts: RwLock::new(alerts),
        }
    }

    /// Build a registry from configured targets, skipping invalid or repeated entries.
    pub async fn from_targets(targets: &[WatchTarget], alerts: AlertConfig) -> Self {
        let watchlist = Self::new(alerts);
        for target in targets {
            if let Err(e) = watchlist
                .add(&target.address, &target.name, target.decimals)
                .await
            {
                tracing::warn!("Skipping watch target {}: {}", target.address, e);
            }
        }
        watchlist
    }

    pub async fn add(
        &self,
        address: &str,
        name: &str,
        decimals: Option<u8>,
    ) -> Result<Address, MonitorError> {
        let parsed = parse_address(address)?;
        let mut contracts = self.contracts.write().await;
        if contracts.iter().any(|c| c.address == parsed) {
            return Err(MonitorError::DuplicateContract(parsed.to_checksum(None)));
        }

        let name = match name.trim() {
            "" => "Unknown Contract".to_string(),
            trimmed => trimmed.to_string(),
        };
        info!("Watching {} ({})", name, parsed);
        contracts.push(MonitoredContract::new(
            parsed,
            name,
            decimals.unwrap_or(DEFAULT_DECIMALS),
        ));
        Ok(parsed)
    }

    pub async fn remove(&self, address: &str) -> Result<MonitoredContract, MonitorError> {
        let parsed = parse_address(address)?;
        let mut contracts = self.contracts.write().await;
        let index = contracts
            .iter()
            .position(|c| c.address == parsed)
            .ok_or_else(|| MonitorError::UnknownContract(parsed.to_checksum(None)))?;
        Ok(contracts.remove(index))
    }

    async fn set_status(
        &self,
        address: &str,
        status: impl Fn(ContractStatus) -> ContractStatus,
    ) -> Result<ContractStatus, MonitorError> {
        let parsed = parse_address(address)?;
        let mut contracts = self.contracts.write().await;
        let contract = contracts
            .iter_mut()
            .find(|c| c.address == parsed)
            .ok_or_else(|| MonitorError::UnknownContract(parsed.to_checksum(None)))?;
        contract.status = status(contract.status);
        Ok(contract.status)
    }

    pub async fn pause(&self, address: &str) -> Result<ContractStatus, MonitorError> {
        self.set_status(address, |_| ContractStatus::Paused).await
    }

    pub async fn resume(&self, address: &str) -> Result<ContractStatus, MonitorError> {
        self.set_status(address, |_| ContractStatus::Active).await
    }

    pub async fn toggle(&self, address: &str) -> Result<ContractStatus, MonitorError> {
        self.set_status(address, |current| match current {
            ContractStatus::Active => ContractStatus::Paused,
            ContractStatus::Paused => ContractStatus::Active,
        })
        .await
    }

    pub async fn get(&self, address: &str) -> Option<MonitoredContract> {
        let parsed = parse_address(address).ok()?;
        self.contracts
            .read()
            .await
            .iter()
            .find(|c| c.address == parsed)
            .cloned()
    }

    pub async fn snapshot(&self) -> Vec<MonitoredContract> {
        self.contracts.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.contracts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.contracts.read().await.is_empty()
    }

    pub async fn alert_config(&self) -> AlertConfig {
        self.alerts.read().await.clone()
    }

    pub async fn set_alert_config(&self, alerts: AlertConfig) {
        *self.alerts.write().await = alerts;
    }

    pub(crate) async fn active_targets(&self) -> Vec<ActiveTarget> {
        self.contracts
            .read()
            .await
            .iter()
            .filter(|c| c.is_active())
            .map(|c| ActiveTarget {
                address: c.address,
                name: c.name.clone(),
                decimals: c.decimals,
            })
            .collect()
    }

    /// Append a committed batch to `address` and refresh its gas stat.
    /// A contract removed mid-tick is silently skipped.
    pub(crate) async fn record(
        &self,
        address: Address,
        batch: Vec<MonitoringEvent>,
        gas_price_gwei: f64,
        capacity: usize,
    ) -> usize {
        let mut contracts = self.contracts.write().await;
        match contracts.iter_mut().find(|c| c.address == address) {
            Some(contract) => {
                contract.stats.last_gas_price = gas_price_gwei;
                contract.record(batch, capacity)
            }
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WMATIC: &str = "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270";
    const USDT: &str = "0xc2132D05D31c914a87C6611C10748AEb04B58e8F";

    #[tokio::test]
    async fn test_add_rejects_invalid_and_duplicate() {
        let watchlist = Watchlist::default();
        watchlist.add(WMATIC, "WMATIC", None).await.unwrap();

        assert!(matches!(
            watchlist.add("0xNotAContract", "bad", None).await,
            Err(MonitorError::InvalidAddress(_))
        ));
        assert!(matches!(
            watchlist.add(&WMATIC.to_lowercase(), "again", None).await,
            Err(MonitorError::DuplicateContract(_))
        ));
        assert_eq!(watchlist.len().await, 1);
        assert_eq!(watchlist.get(WMATIC).await.unwrap().decimals, 18);
    }

    #[tokio::test]
    async fn test_pause_resume_toggle() {
        let watchlist = Watchlist::default();
        watchlist.add(WMATIC, "WMATIC", None).await.unwrap();
        watchlist.add(USDT, "USDT", Some(6)).await.unwrap();

        assert_eq!(watchlist.pause(WMATIC).await.unwrap(), ContractStatus::Paused);
        let active = watchlist.active_targets().await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].decimals, 6);

        assert_eq!(watchlist.toggle(WMATIC).await.unwrap(), ContractStatus::Active);
        assert_eq!(watchlist.toggle(WMATIC).await.unwrap(), ContractStatus::Paused);
        assert_eq!(watchlist.resume(WMATIC).await.unwrap(), ContractStatus::Active);
        assert_eq!(watchlist.active_targets().await.len(), 2);
    }

    #[tokio::test]
    async fn test_remove_unknown_contract() {
        let watchlist = Watchlist::default();
        watchlist.add(WMATIC, "WMATIC", None).await.unwrap();

        assert!(matches!(
            watchlist.remove(USDT).await,
            Err(MonitorError::UnknownContract(_))
        ));
        let removed = watchlist.remove(WMATIC).await.unwrap();
        assert_eq!(removed.name, "WMATIC");
        assert!(watchlist.is_empty().await);
    }

    #[tokio::test]
    async fn test_from_targets_skips_bad_entries() {
        let targets = vec![
            WatchTarget {
                address: WMATIC.to_string(),
                name: "WMATIC".to_string(),
                decimals: None,
            },
            WatchTarget {
                address: "nope".to_string(),
                name: "bad".to_string(),
                decimals: None,
            },
            WatchTarget {
                address: WMATIC.to_string(),
                name: "dup".to_string(),
                decimals: None,
            },
        ];
        let watchlist = Watchlist::from_targets(&targets, AlertConfig::default()).await;
        assert_eq!(watchlist.len().await, 1);
    }

    #[tokio::test]
    async fn test_alert_config_edits_are_visible() {
        let watchlist = Watchlist::default();
        let mut alerts = watchlist.alert_config().await;
        alerts.min_transfer_value = 5.0;
        watchlist.set_alert_config(alerts.clone()).await;
        assert_eq!(watchlist.alert_config().await, alerts);
    }
}
