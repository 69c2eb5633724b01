//! Source acquisition: on-chain existence check through a failover RPC list,
//! then verified source from the block explorer, flattened to one blob.

pub mod flatten;

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::Config;
use crate::error::{AcquisitionError, RpcError};
use crate::ethereum::explorer::ExplorerClient;
use crate::ethereum::provider::EndpointSelector;
use crate::ethereum::utils::validate_address;
use crate::ethereum::ChainConnector;
use crate::progress::Progress;

use flatten::{flatten_source, SourceLayout};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSource {
    pub address: String,
    pub name: String,
    pub source_code: String,
    pub verified: bool,
}

pub struct SourceFetcher {
    chain_name: String,
    selector: EndpointSelector,
    request_timeout: Duration,
    explorer: ExplorerClient,
    configured_key: Option<String>,
    progress: Progress,
}

impl SourceFetcher {
    pub fn new(
        config: &Config,
        connector: Arc<dyn ChainConnector>,
        progress: Progress,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            chain_name: config.chain.name.clone(),
            selector: EndpointSelector::new(
                connector,
                config.chain.rpc_urls.clone(),
                config.chain.probe_timeout(),
            ),
            request_timeout: config.chain.request_timeout(),
            explorer: ExplorerClient::new(config.explorer.clone())?,
            configured_key: config.explorer.api_key.clone(),
            progress,
        })
    }

    /// Resolve `address` to flattened, verified source.
    ///
    /// `api_key` takes precedence over the configured explorer key. Empty
    /// bytecode fails before the explorer is contacted. Any other RPC
    /// trouble, including every endpoint being down, is only a warning; the
    /// explorer is still asked. `AllEndpointsUnreachable` is returned only
    /// when the explorer cannot be reached either.
    pub async fn fetch_source(
        &self,
        address: &str,
        api_key: Option<&str>,
    ) -> Result<ContractSource, AcquisitionError> {
        let address = address.trim();
        let parsed = validate_address(address)
            .map_err(|_| AcquisitionError::InvalidAddress(address.to_string()))?;

        self.progress.info(format!(
            "Connecting to {} ({} endpoints)...",
            self.chain_name,
            self.selector.endpoint_count()
        ));

        let unreachable = match self.selector.select().await {
            Ok(endpoint) => {
                let code =
                    tokio::time::timeout(self.request_timeout, endpoint.client.code_at(parsed))
                        .await
                        .unwrap_or_else(|_| Err(RpcError::timed_out(self.request_timeout)));

                match code {
                    Ok(code) if code.is_empty() => {
                        return Err(AcquisitionError::NotAContract(address.to_string()));
                    }
                    Ok(_) => self.progress.success("Contract bytecode verified on-chain."),
                    Err(e) => self.progress.warning(format!(
                        "RPC verification warning: {}. Proceeding to fetch source...",
                        e.user_message()
                    )),
                }
                None
            }
            Err(failures) => {
                let error = AcquisitionError::AllEndpointsUnreachable {
                    tried: failures.len(),
                };
                self.progress.warning(format!(
                    "RPC verification warning: {} Proceeding to fetch source...",
                    error
                ));
                Some(error)
            }
        };

        self.progress
            .info("Fetching verified source code from block explorer...");

        let key = api_key
            .filter(|k| !k.trim().is_empty())
            .or(self.configured_key.as_deref());
        let fetched = match (self.explorer.fetch_source(address, key).await, unreachable) {
            (Ok(fetched), _) => fetched,
            // Neither the chain nor the explorer answered.
            (Err(AcquisitionError::ExplorerUnreachable(reason)), Some(error)) => {
                debug!("Block explorer also unreachable: {}", reason);
                return Err(error);
            }
            (Err(e), _) => return Err(e),
        };

        let flattened = flatten_source(&fetched.source_code);
        match &flattened.layout {
            SourceLayout::SingleFile => self.progress.success("Single file contract source retrieved."),
            SourceLayout::Sources { files } | SourceLayout::BestEffort { files } => self
                .progress
                .success(format!("Multi-file source code flattened ({} files).", files)),
            SourceLayout::Unparsed { reason } => self.progress.warning(format!(
                "Could not parse multi-file JSON ({}). Using raw output.",
                reason
            )),
        }

        if flattened.source_code.trim().is_empty() {
            return Err(AcquisitionError::EmptySource);
        }

        Ok(ContractSource {
            address: address.to_string(),
            name: fetched.contract_name,
            source_code: flattened.source_code,
            verified: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethereum::mock::{MockChain, MockConnector};
    use crate::progress::ProgressLevel;
    use alloy::primitives::Address;
    use serde_json::json;
    use std::str::FromStr;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CONTRACT: &str = "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270";
    const EMPTY_ACCOUNT: &str = "0x000000000000000000000000000000000000dEaD";

    fn config_for(server: &MockServer, urls: &[&str]) -> Config {
        let mut config = Config::default();
        config.chain.rpc_urls = urls.iter().map(|u| u.to_string()).collect();
        config.explorer.api_url = format!("{}/api", server.uri());
        config.explorer.api_key = None;
        config.explorer.bundled_api_key = "bundled".to_string();
        config
    }

    fn live_chain() -> MockChain {
        MockChain::new(137).with_code(Address::from_str(CONTRACT).unwrap(), &[0x60, 0x80])
    }

    async fn mount_source(server: &MockServer, source: &str) {
        Mock::given(method("GET"))
            .and(query_param("action", "getsourcecode"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "1",
                "message": "OK",
                "result": [{"SourceCode": source, "ContractName": "WMATIC"}]
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_empty_bytecode_fails_before_explorer_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let connector = MockConnector::new().with_chain("https://rpc.example", MockChain::new(137));
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher.fetch_source(EMPTY_ACCOUNT, None).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::NotAContract(_)));
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let chain = Arc::new(MockChain::new(137));
        let connector = MockConnector::new().with_shared_chain("https://rpc.example", chain.clone());
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher.fetch_source("0xNotAContract", None).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::InvalidAddress(_)));
        assert_eq!(chain.code_queries(), 0);
    }

    fn unreachable_connector() -> MockConnector {
        MockConnector::new()
            .with_failure("https://a.example", RpcError::Network("refused".into()))
            .with_chain("https://b.example", MockChain::new(137).failing_probe())
    }

    #[tokio::test]
    async fn test_unreachable_endpoints_still_ask_explorer() {
        let server = MockServer::start().await;
        mount_source(&server, "contract WMATIC {}").await;

        let (progress, mut events) = Progress::channel();
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://a.example", "https://b.example"]),
            Arc::new(unreachable_connector()),
            progress,
        )
        .unwrap();

        let source = fetcher.fetch_source(CONTRACT, None).await.unwrap();
        assert_eq!(source.name, "WMATIC");
        assert_eq!(source.source_code, "contract WMATIC {}");

        drop(fetcher);
        let mut warnings = Vec::new();
        while let Some(event) = events.recv().await {
            if event.level == ProgressLevel::Warning {
                warnings.push(event.message);
            }
        }
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("2 tried"));
    }

    #[tokio::test]
    async fn test_all_endpoints_unreachable_when_explorer_is_down_too() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://a.example", "https://b.example"]),
            Arc::new(unreachable_connector()),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher.fetch_source(CONTRACT, None).await.unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::AllEndpointsUnreachable { tried: 2 }
        ));
    }

    #[tokio::test]
    async fn test_unverified_source_wins_over_unreachable_endpoints() {
        let server = MockServer::start().await;
        mount_source(&server, "").await;

        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://a.example"]),
            Arc::new(unreachable_connector()),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher.fetch_source(CONTRACT, None).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::SourceUnverified));
    }

    #[tokio::test]
    async fn test_bytecode_rpc_failure_is_only_a_warning() {
        let server = MockServer::start().await;
        mount_source(&server, "contract WMATIC {}").await;

        let chain = MockChain::new(137).failing_code(RpcError::RateLimited("429".into()));
        let connector = MockConnector::new().with_chain("https://rpc.example", chain);
        let (progress, mut events) = Progress::channel();
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            progress,
        )
        .unwrap();

        let source = fetcher.fetch_source(CONTRACT, None).await.unwrap();
        assert_eq!(source.name, "WMATIC");
        assert_eq!(source.source_code, "contract WMATIC {}");
        assert!(source.verified);

        drop(fetcher);
        let mut warned = false;
        while let Some(event) = events.recv().await {
            warned |= event.level == ProgressLevel::Warning;
        }
        assert!(warned);
    }

    #[tokio::test]
    async fn test_multi_file_source_is_flattened() {
        let server = MockServer::start().await;
        let payload = r#"{{"sources":{"B.sol":{"content":"contract B {}"},"A.sol":{"content":"contract A is B {}"}}}}"#;
        mount_source(&server, payload).await;

        let connector = MockConnector::new().with_chain("https://rpc.example", live_chain());
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            Progress::silent(),
        )
        .unwrap();

        let source = fetcher.fetch_source(CONTRACT, None).await.unwrap();
        assert!(source.source_code.contains("// File: B.sol"));
        assert!(
            source.source_code.find("contract B {}").unwrap()
                < source.source_code.find("// File: A.sol").unwrap()
        );
    }

    #[tokio::test]
    async fn test_blank_source_is_empty_source() {
        let server = MockServer::start().await;
        mount_source(&server, "   \n  ").await;

        let connector = MockConnector::new().with_chain("https://rpc.example", live_chain());
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher.fetch_source(CONTRACT, None).await.unwrap_err();
        assert!(matches!(err, AcquisitionError::EmptySource));
    }

    #[tokio::test]
    async fn test_caller_key_used_for_explorer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("apikey", "caller-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": "0",
                "message": "NOTOK",
                "result": "Max rate limit reached"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let connector = MockConnector::new().with_chain("https://rpc.example", live_chain());
        let fetcher = SourceFetcher::new(
            &config_for(&server, &["https://rpc.example"]),
            Arc::new(connector),
            Progress::silent(),
        )
        .unwrap();

        let err = fetcher
            .fetch_source(CONTRACT, Some("caller-key"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AcquisitionError::ExplorerRateLimited { keyed: true }
        ));
        assert!(err.to_string().contains("Check your API key"));
    }
}
