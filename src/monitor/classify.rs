use alloy::primitives::{b256, B256};
use chrono::Utc;

use super::types::{AlertConfig, EventType, MonitoringEvent};
use crate::audit::Severity;
use crate::ethereum::utils::{decode_uint256, to_decimal_amount};
use crate::ethereum::LogRecord;

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

fn event_id(log: &LogRecord) -> String {
    let hash = log
        .transaction_hash
        .map(|h| h.to_string())
        .unwrap_or_else(|| format!("block-{}", log.block_number.unwrap_or_default()));
    format!("{}:{}", hash, log.log_index.unwrap_or_default())
}

/// Turn one raw log into a monitoring event. Never fails: an undecodable
/// transfer degrades to a generic message.
pub fn classify_log(log: &LogRecord, decimals: u8, alerts: &AlertConfig) -> MonitoringEvent {
    let mut severity = Severity::Info;
    let mut value = None;

    let message = match log.topics.first() {
        Some(topic) if *topic == TRANSFER_TOPIC => {
            let amount = decode_uint256(&log.data).and_then(|raw| to_decimal_amount(raw, decimals));
            match amount {
                Ok(amount) => {
                    value = Some(amount);
                    let mut message = format!("Transfer: {:.2} Tokens", amount);
                    if amount > alerts.min_transfer_value {
                        severity = Severity::Medium;
                        message.push_str(" (High Value)");
                    }
                    message
                }
                Err(_) => "Transfer Event".to_string(),
            }
        }
        Some(topic) => {
            let hex = topic.to_string();
            format!("Event: {}...", &hex[..10])
        }
        None => "Contract Interaction".to_string(),
    };

    MonitoringEvent {
        id: event_id(log),
        timestamp: Utc::now(),
        event_type: EventType::Transaction,
        severity,
        message,
        hash: log.transaction_hash.map(|h| h.to_string()),
        value,
        block_number: log.block_number,
    }
}

/// Flag transactions that move more than the threshold two or more times.
/// `events` is one contract's classified batch; alerts come back in
/// first-seen transaction order.
pub fn detect_flash_loans(events: &[MonitoringEvent], alerts: &AlertConfig) -> Vec<MonitoringEvent> {
    if !alerts.detect_flash_loans {
        return Vec::new();
    }

    let mut per_tx: Vec<(&str, usize, f64, Option<u64>)> = Vec::new();
    for event in events {
        let (Some(hash), Some(amount)) = (event.hash.as_deref(), event.value) else {
            continue;
        };
        if event.event_type != EventType::Transaction || amount <= alerts.min_transfer_value {
            continue;
        }
        match per_tx.iter_mut().find(|(h, ..)| *h == hash) {
            Some(entry) => {
                entry.1 += 1;
                entry.2 += amount;
            }
            None => per_tx.push((hash, 1, amount, event.block_number)),
        }
    }

    per_tx
        .into_iter()
        .filter(|(_, count, ..)| *count >= 2)
        .map(|(hash, count, total, block_number)| MonitoringEvent {
            id: format!("{}:flash-loan", hash),
            timestamp: Utc::now(),
            event_type: EventType::Alert,
            severity: Severity::High,
            message: format!(
                "Possible flash loan: {} high-value transfers ({:.2} Tokens) in one transaction",
                count, total
            ),
            hash: Some(hash.to_string()),
            value: Some(total),
            block_number,
        })
        .collect()
}

/// Network-wide gas spike event, or `None` when under the threshold.
pub fn gas_spike(gas_price_gwei: f64, block: u64, alerts: &AlertConfig) -> Option<MonitoringEvent> {
    if gas_price_gwei <= alerts.gas_threshold_gwei {
        return None;
    }
    Some(MonitoringEvent {
        id: format!("gas-spike:{}", block),
        timestamp: Utc::now(),
        event_type: EventType::GasSpike,
        severity: Severity::Medium,
        message: format!(
            "Gas spike: {:.2} gwei exceeds threshold of {:.2} gwei",
            gas_price_gwei, alerts.gas_threshold_gwei
        ),
        hash: None,
        value: Some(gas_price_gwei),
        block_number: Some(block),
    })
}
