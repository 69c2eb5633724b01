use alloy::primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::audit::Severity;

/// Default number of events kept per contract.
pub const EVENT_CAPACITY: usize = 50;

/// User-tunable alert thresholds and notification channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Transfers strictly above this token amount are flagged.
    pub min_transfer_value: f64,
    pub gas_threshold_gwei: f64,
    pub detect_flash_loans: bool,
    /// Kept for operators; no mail transport is wired up.
    pub email: Option<String>,
    pub slack_webhook: Option<String>,
    pub discord_webhook: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            min_transfer_value: 100.0,
            gas_threshold_gwei: 300.0,
            detect_flash_loans: true,
            email: None,
            slack_webhook: None,
            discord_webhook: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Active,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Transaction,
    Alert,
    GasSpike,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringEvent {
    /// Transaction hash plus log index; unique within one contract's buffer.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    pub message: String,
    pub hash: Option<String>,
    pub value: Option<f64>,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractStats {
    pub event_count: u64,
    pub volume: f64,
    /// Gwei
    pub last_gas_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredContract {
    pub address: Address,
    pub name: String,
    pub decimals: u8,
    pub status: ContractStatus,
    pub events: VecDeque<MonitoringEvent>,
    pub stats: ContractStats,
}

impl MonitoredContract {
    pub fn new(address: Address, name: impl Into<String>, decimals: u8) -> Self {
        Self {
            address,
            name: name.into(),
            decimals,
            status: ContractStatus::Active,
            events: VecDeque::new(),
            stats: ContractStats::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ContractStatus::Active
    }

    /// Prepend `batch` (given oldest first) so the buffer stays newest-first,
    /// then evict down to `capacity`. Events whose id is already buffered are
    /// dropped. Returns how many events were added.
    pub fn record(&mut self, batch: Vec<MonitoringEvent>, capacity: usize) -> usize {
        let mut added = 0;
        for event in batch {
            if self.events.iter().any(|existing| existing.id == event.id) {
                continue;
            }
            if event.event_type == EventType::Transaction {
                self.stats.volume += event.value.unwrap_or(0.0);
            }
            self.events.push_front(event);
            added += 1;
        }
        self.events.truncate(capacity);
        self.stats.event_count += added as u64;
        added
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionState {
    Connecting,
    Live { block: u64 },
    Degraded { block: u64, reason: String },
    Failed { reason: String },
}

impl ConnectionState {
    pub fn is_live(&self) -> bool {
        matches!(self, ConnectionState::Live { .. } | ConnectionState::Degraded { .. })
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Live { block } => write!(f, "live at block {}", block),
            ConnectionState::Degraded { block, reason } => {
                write!(f, "degraded at block {}: {}", block, reason)
            }
            ConnectionState::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSample {
    pub timestamp: DateTime<Utc>,
    pub gas_price_gwei: f64,
}

/// Everything the monitor publishes to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MonitorUpdate {
    State(ConnectionState),
    Gas(GasSample),
    Event {
        /// `None` for network-wide events such as gas spikes.
        contract: Option<Address>,
        event: MonitoringEvent,
    },
    Warning { message: String },
}
