//! Operator commands typed on stdin while the monitor runs.

use anyhow::{anyhow, bail, Result};

use crate::error::MonitorError;
use crate::monitor::types::ContractStatus;
use crate::monitor::Watchlist;

pub const HELP: &str = "Commands: add <address> <name> [decimals] | remove <address> | \
pause <address> | resume <address> | toggle <address> | threshold <tokens> | gas <gwei> | \
flashloans on|off | status | retry | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Retry,
    Status,
    Quit,
    Help,
    Add {
        address: String,
        name: String,
        decimals: Option<u8>,
    },
    Remove(String),
    Pause(String),
    Resume(String),
    Toggle(String),
    MinTransfer(f64),
    GasThreshold(f64),
    FlashLoans(bool),
}

fn parse_amount(value: &str) -> Result<f64> {
    let amount: f64 = value
        .parse()
        .map_err(|_| anyhow!("'{}' is not a number", value))?;
    if !amount.is_finite() || amount < 0.0 {
        bail!("'{}' must be a non-negative number", value);
    }
    Ok(amount)
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => bail!("expected on or off, got '{}'", value),
    }
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<OperatorCommand>> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb.to_lowercase().as_str(), args) {
        ("retry", []) => OperatorCommand::Retry,
        ("status", []) => OperatorCommand::Status,
        ("quit" | "exit", []) => OperatorCommand::Quit,
        ("help", _) => OperatorCommand::Help,
        ("add", [address, rest @ ..]) if !rest.is_empty() => {
            // A trailing integer is the token's decimals; the rest is the name.
            let (name, decimals) = match rest.split_last() {
                Some((last, head)) if !head.is_empty() => match last.parse::<u8>() {
                    Ok(decimals) => (head.join(" "), Some(decimals)),
                    Err(_) => (rest.join(" "), None),
                },
                _ => (rest.join(" "), None),
            };
            OperatorCommand::Add {
                address: address.to_string(),
                name,
                decimals,
            }
        }
        ("remove", [address]) => OperatorCommand::Remove(address.to_string()),
        ("pause", [address]) => OperatorCommand::Pause(address.to_string()),
        ("resume", [address]) => OperatorCommand::Resume(address.to_string()),
        ("toggle", [address]) => OperatorCommand::Toggle(address.to_string()),
        ("threshold", [value]) => OperatorCommand::MinTransfer(parse_amount(value)?),
        ("gas", [value]) => OperatorCommand::GasThreshold(parse_amount(value)?),
        ("flashloans", [value]) => OperatorCommand::FlashLoans(parse_switch(value)?),
        _ => bail!("Unknown or malformed command '{}'. {}", line.trim(), HELP),
    };
    Ok(Some(command))
}

async fn describe_status(watchlist: &Watchlist, address: &str, status: ContractStatus) -> String {
    match watchlist.get(address).await {
        Some(contract) => format!("{} ({}) is now {:?}", contract.name, contract.address, status),
        None => format!("{} is now {:?}", address, status),
    }
}

/// Apply a watchlist or alert edit. The poll loop picks it up on its next
/// tick. Returns `None` for commands that do not edit the watchlist.
pub async fn apply_command(
    watchlist: &Watchlist,
    command: &OperatorCommand,
) -> Result<Option<String>, MonitorError> {
    let message = match command {
        OperatorCommand::Add {
            address,
            name,
            decimals,
        } => {
            let added = watchlist.add(address, name, *decimals).await?;
            format!("Added {} to the watchlist", added)
        }
        OperatorCommand::Remove(address) => {
            let removed = watchlist.remove(address).await?;
            format!("Removed {} ({})", removed.name, removed.address)
        }
        OperatorCommand::Pause(address) => {
            let status = watchlist.pause(address).await?;
            describe_status(watchlist, address, status).await
        }
        OperatorCommand::Resume(address) => {
            let status = watchlist.resume(address).await?;
            describe_status(watchlist, address, status).await
        }
        OperatorCommand::Toggle(address) => {
            let status = watchlist.toggle(address).await?;
            describe_status(watchlist, address, status).await
        }
        OperatorCommand::MinTransfer(value) => {
            let mut alerts = watchlist.alert_config().await;
            alerts.min_transfer_value = *value;
            watchlist.set_alert_config(alerts).await;
            format!("High-value transfer threshold set to {} tokens", value)
        }
        OperatorCommand::GasThreshold(value) => {
            let mut alerts = watchlist.alert_config().await;
            alerts.gas_threshold_gwei = *value;
            watchlist.set_alert_config(alerts).await;
            format!("Gas spike threshold set to {} gwei", value)
        }
        OperatorCommand::FlashLoans(enabled) => {
            let mut alerts = watchlist.alert_config().await;
            alerts.detect_flash_loans = *enabled;
            watchlist.set_alert_config(alerts).await;
            format!(
                "Flash-loan detection {}",
                if *enabled { "enabled" } else { "disabled" }
            )
        }
        OperatorCommand::Retry
        | OperatorCommand::Status
        | OperatorCommand::Quit
        | OperatorCommand::Help => return Ok(None),
    };
    Ok(Some(message))
}
