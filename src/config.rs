use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

use crate::monitor::{AlertConfig, EVENT_CAPACITY};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chain: ChainConfig,
    pub explorer: ExplorerConfig,
    pub model: ModelConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub name: String,
    /// Ordered failover list; the first endpoint that answers wins.
    pub rpc_urls: Vec<String>,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// Shared key used when the caller has none of their own.
    pub bundled_api_key: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub primary_model: String,
    pub fallback_model: String,
    pub thinking_budget: Option<u32>,
    pub fallback_thinking_budget: Option<u32>,
    pub temperature: f32,
    pub top_k: u32,
    pub top_p: f32,
    pub seed: i64,
    pub request_timeout_secs: u64,
    pub network_label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub rpc_url: String,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub event_capacity: usize,
    pub gas_history: usize,
    pub alerts: AlertConfig,
    pub watch: Vec<WatchTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub address: String,
    pub name: String,
    pub decimals: Option<u8>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: "Polygon PoS".to_string(),
            rpc_urls: vec![
                "https://polygon-rpc.com".to_string(),
                "https://rpc.ankr.com/polygon".to_string(),
                "https://1rpc.io/matic".to_string(),
                "https://rpc-mainnet.matic.network".to_string(),
                "https://matic-mainnet.chainstacklabs.com".to_string(),
                "https://polygon-bor.publicnode.com".to_string(),
            ],
            probe_timeout_secs: 3,
            request_timeout_secs: 15,
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.polygonscan.com/api".to_string(),
            api_key: None,
            bundled_api_key: "YourApiKeyToken".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            primary_model: "gemini-3-pro-preview".to_string(),
            fallback_model: "gemini-2.5-flash".to_string(),
            thinking_budget: Some(32768),
            fallback_thinking_budget: None,
            temperature: 0.0,
            top_k: 1,
            top_p: 1.0,
            seed: 42,
            request_timeout_secs: 600,
            network_label: "EVM Compatible".to_string(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://polygon-rpc.com".to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
            poll_interval_secs: 4,
            event_capacity: EVENT_CAPACITY,
            gas_history: 20,
            alerts: AlertConfig::default(),
            watch: vec![
                WatchTarget {
                    address: "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270".to_string(),
                    name: "WMATIC (Wrapped Matic)".to_string(),
                    decimals: Some(18),
                },
                WatchTarget {
                    address: "0xc2132D05D31c914a87C6611C10748AEb04B58e8F".to_string(),
                    name: "USDT (Tether)".to_string(),
                    decimals: Some(6),
                },
            ],
        }
    }
}

impl ChainConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ExplorerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MonitorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    fn apply_env_vars(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides through an injectable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.model.api_key.is_none() {
            if let Some(key) = lookup("GEMINI_API_KEY").or_else(|| lookup("GOOGLE_API_KEY")) {
                tracing::debug!("Using model API key from environment");
                self.model.api_key = Some(key);
            }
        }

        if let Some(key) = lookup("POLYGONSCAN_API_KEY") {
            tracing::debug!("POLYGONSCAN_API_KEY found, will be used for source retrieval");
            self.explorer.api_key = Some(key);
        }

        if let Some(url) = lookup("SENTINEL_RPC_URL") {
            tracing::info!("Using SENTINEL_RPC_URL as preferred RPC endpoint");
            self.chain.rpc_urls.retain(|existing| existing != &url);
            self.chain.rpc_urls.insert(0, url.clone());
            self.monitor.rpc_url = url;
        }

        if self.model.api_key.is_none() {
            tracing::warn!("No model API key configured, audits will fail until GEMINI_API_KEY is set");
        }
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<std::path::PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-sentinel").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# Contract Sentinel Configuration File
# Controls source acquisition, the audit model, and the live monitor

[chain]
name = "Polygon PoS"
# Tried in order; the first endpoint answering within probe_timeout_secs is used
rpc_urls = [
  "https://polygon-rpc.com",
  "https://rpc.ankr.com/polygon",
  "https://1rpc.io/matic",
  "https://polygon-bor.publicnode.com",
]
probe_timeout_secs = 3
request_timeout_secs = 15

[explorer]
api_url = "https://api.polygonscan.com/api"
# api_key = "YOUR_POLYGONSCAN_KEY"
bundled_api_key = "YourApiKeyToken"
request_timeout_secs = 30

[model]
# api_key = "YOUR_GEMINI_KEY"
base_url = "https://generativelanguage.googleapis.com"
primary_model = "gemini-3-pro-preview"
fallback_model = "gemini-2.5-flash"
thinking_budget = 32768
# fallback_thinking_budget = 8192
temperature = 0.0
top_k = 1
top_p = 1.0
seed = 42
request_timeout_secs = 600
network_label = "EVM Compatible"

[monitor]
rpc_url = "https://polygon-rpc.com"
connect_timeout_secs = 5
request_timeout_secs = 10
poll_interval_secs = 4
event_capacity = 50
gas_history = 20

[monitor.alerts]
min_transfer_value = 100.0
gas_threshold_gwei = 300.0
detect_flash_loans = true
# email = "ops@example.com"
# slack_webhook = "https://hooks.slack.com/services/..."
# discord_webhook = "https://discord.com/api/webhooks/..."

[[monitor.watch]]
address = "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270"
name = "WMATIC (Wrapped Matic)"
decimals = 18

[[monitor.watch]]
address = "0xc2132D05D31c914a87C6611C10748AEb04B58e8F"
name = "USDT (Tether)"
decimals = 6

# Environment variables that can be used:
# GEMINI_API_KEY / GOOGLE_API_KEY - model credential
# POLYGONSCAN_API_KEY - block explorer key
# SENTINEL_RPC_URL - preferred RPC endpoint (also used by the monitor)
"#;
        sample_config.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_sample_config_parses() {
        let config: Config = toml::from_str(&Config::generate_sample()).unwrap();
        assert_eq!(config.chain.rpc_urls.len(), 4);
        assert_eq!(config.monitor.watch.len(), 2);
        assert_eq!(config.monitor.alerts.min_transfer_value, 100.0);
        assert_eq!(config.model.fallback_thinking_budget, None);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = toml::from_str("[monitor]\npoll_interval_secs = 10\n").unwrap();
        assert_eq!(config.monitor.poll_interval(), Duration::from_secs(10));
        assert_eq!(config.monitor.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.chain.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.model.seed, 42);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("GOOGLE_API_KEY", "model-key"),
            ("POLYGONSCAN_API_KEY", "scan-key"),
            ("SENTINEL_RPC_URL", "https://rpc.ankr.com/polygon"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.model.api_key.as_deref(), Some("model-key"));
        assert_eq!(config.explorer.api_key.as_deref(), Some("scan-key"));
        assert_eq!(config.chain.rpc_urls[0], "https://rpc.ankr.com/polygon");
        assert_eq!(
            config
                .chain
                .rpc_urls
                .iter()
                .filter(|u| u.as_str() == "https://rpc.ankr.com/polygon")
                .count(),
            1
        );
        assert_eq!(config.monitor.rpc_url, "https://rpc.ankr.com/polygon");
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.monitor.alerts.gas_threshold_gwei = 120.0;
        config.save_to_file(&path).await.unwrap();

        let loaded = Config::load_from_file(&path).await.unwrap();
        assert_eq!(loaded.monitor.alerts.gas_threshold_gwei, 120.0);
        assert_eq!(loaded.monitor.watch, config.monitor.watch);
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_default() {
        let config = Config::load_or_default(Some("/definitely/not/here.toml")).await;
        assert_eq!(config.monitor.poll_interval_secs, 4);
    }
}
