use alloy::primitives::{utils::format_units, Address, U256};
use anyhow::{anyhow, Result};
use std::str::FromStr;

/// Validates and normalizes an Ethereum address
pub fn validate_address(address: &str) -> Result<Address> {
    let address = address.trim();

    if address.is_empty() {
        return Err(anyhow!("Address cannot be empty"));
    }

    if !address.starts_with("0x") && !address.starts_with("0X") {
        return Err(anyhow!(
            "Invalid address format: '{}'. Addresses must start with '0x'",
            address
        ));
    }

    if address.len() != 42 {
        return Err(anyhow!(
            "Invalid address length: '{}'. Addresses must be exactly 42 characters (0x + 40 hex characters)",
            address
        ));
    }

    let hex_part = &address[2..];
    if !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(anyhow!(
            "Invalid address format: '{}'. Contains non-hexadecimal characters",
            address
        ));
    }

    Address::from_str(address).map_err(|e| anyhow!("Invalid address: '{}'. Error: {}", address, e))
}

/// Decode a single ABI-encoded `uint256` from log data.
pub fn decode_uint256(data: &[u8]) -> Result<U256> {
    if data.len() != 32 {
        return Err(anyhow!(
            "Expected 32 bytes of uint256 data, got {} bytes",
            data.len()
        ));
    }
    Ok(U256::from_be_slice(data))
}

/// Scale a raw integer amount by `decimals` into a float for display and
/// threshold comparison.
pub fn to_decimal_amount(value: U256, decimals: u8) -> Result<f64> {
    let formatted =
        format_units(value, decimals).map_err(|e| anyhow!("Failed to format amount: {}", e))?;
    formatted
        .parse::<f64>()
        .map_err(|e| anyhow!("Failed to parse formatted amount '{}': {}", formatted, e))
}

pub fn wei_to_gwei(wei: u128) -> f64 {
    to_decimal_amount(U256::from(wei), 9).unwrap_or(0.0)
}
