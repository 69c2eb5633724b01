use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ExplorerConfig;
use crate::error::AcquisitionError;

/// Verified source as published by the block explorer, before flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct ExplorerSource {
    pub contract_name: String,
    pub source_code: String,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SourceEntry {
    #[serde(default)]
    source_code: Option<String>,
    #[serde(default)]
    contract_name: Option<String>,
}

/// Etherscan-compatible `getsourcecode` client.
#[derive(Debug, Clone)]
pub struct ExplorerClient {
    client: Client,
    config: ExplorerConfig,
}

impl ExplorerClient {
    pub fn new(config: ExplorerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| anyhow!("Failed to build explorer HTTP client: {}", e))?;
        Ok(Self { client, config })
    }

    /// Fetch verified source for `address`. `caller_key` wins over the
    /// bundled key; the rate-limit error wording depends on which was used.
    pub async fn fetch_source(
        &self,
        address: &str,
        caller_key: Option<&str>,
    ) -> Result<ExplorerSource, AcquisitionError> {
        let caller_key = caller_key.map(str::trim).filter(|k| !k.is_empty());
        let active_key = caller_key.unwrap_or(&self.config.bundled_api_key);

        info!("Fetching verified source for {} from block explorer", address);

        let response = self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
                ("apikey", active_key),
            ])
            .send()
            .await
            .map_err(|e| AcquisitionError::ExplorerUnreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AcquisitionError::ExplorerUnreachable(format!(
                "HTTP Error {}",
                response.status()
            )));
        }

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| AcquisitionError::ExplorerError(format!("Invalid response: {}", e)))?;

        parse_source_response(body, caller_key.is_some())
    }
}

fn parse_source_response(
    body: ExplorerResponse,
    keyed: bool,
) -> Result<ExplorerSource, AcquisitionError> {
    let entries = body.result.as_array().filter(|entries| !entries.is_empty());

    let first = match (body.status.as_str(), entries) {
        ("1", Some(entries)) => &entries[0],
        _ => {
            let message = body.message.unwrap_or_else(|| "Unknown error".to_string());
            debug!("Explorer returned status {}: {}", body.status, message);
            if message.contains("NOTOK") {
                return Err(AcquisitionError::ExplorerRateLimited { keyed });
            }
            return Err(AcquisitionError::ExplorerError(message));
        }
    };

    let entry: SourceEntry = serde_json::from_value(first.clone())
        .map_err(|e| AcquisitionError::ExplorerError(format!("Unexpected result shape: {}", e)))?;

    let source_code = entry
        .source_code
        .filter(|s| !s.is_empty())
        .ok_or(AcquisitionError::SourceUnverified)?;

    let contract_name = entry
        .contract_name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "Unknown Contract".to_string());

    Ok(ExplorerSource {
        contract_name,
        source_code,
    })
}
