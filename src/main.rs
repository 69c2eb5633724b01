mod acquisition;
mod analysis;
mod audit;
mod config;
mod console;
mod error;
mod ethereum;
mod monitor;
mod progress;

use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgGroup, ArgMatches, Command};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use acquisition::SourceFetcher;
use audit::AuditEngine;
use config::Config;
use console::OperatorCommand;
use error::ErrorKind;
use ethereum::provider::AlloyConnector;
use monitor::{ConnectionState, LiveMonitor, MonitorHandle, MonitorUpdate, Watchlist};
use progress::{Progress, ProgressLevel};

fn build_cli() -> Command {
    Command::new("contract-sentinel")
        .version("0.1.0")
        .about("Smart contract source acquisition, AI-assisted auditing and live on-chain monitoring")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Path to configuration file"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .global(true)
                .help("Preferred RPC endpoint URL (tried first, also used by the monitor)"),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("init-config")
                .long("init-config")
                .help("Write the default configuration to --config (or the default path) and exit")
                .action(ArgAction::SetTrue),
        )
        .subcommand(
            Command::new("fetch")
                .about("Fetch and flatten verified source for a deployed contract")
                .arg(Arg::new("address").required(true).value_name("ADDRESS"))
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .value_name("KEY")
                        .help("Block explorer API key"),
                ),
        )
        .subcommand(
            Command::new("metrics")
                .about("Print heuristic metrics and detected libraries for a source file")
                .arg(Arg::new("file").required(true).value_name("FILE")),
        )
        .subcommand(
            Command::new("audit")
                .about("Run a full audit and print the report as JSON")
                .arg(
                    Arg::new("address")
                        .long("address")
                        .value_name("ADDRESS")
                        .help("Fetch verified source for this contract"),
                )
                .arg(
                    Arg::new("file")
                        .long("file")
                        .value_name("FILE")
                        .help("Audit a local source file"),
                )
                .group(
                    ArgGroup::new("target")
                        .args(["address", "file"])
                        .required(true),
                )
                .arg(
                    Arg::new("name")
                        .long("name")
                        .value_name("NAME")
                        .help("Contract name to report"),
                )
                .arg(
                    Arg::new("api-key")
                        .long("api-key")
                        .value_name("KEY")
                        .help("Block explorer API key"),
                ),
        )
        .subcommand(
            Command::new("monitor")
                .about("Watch contracts for on-chain activity until interrupted")
                .arg(
                    Arg::new("watch")
                        .long("watch")
                        .value_name("ADDRESS:NAME[:DECIMALS]")
                        .action(ArgAction::Append)
                        .help("Additional contract to watch"),
                ),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries reports and source
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let matches = build_cli().get_matches();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e);
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());

    if matches.get_flag("init-config") {
        let path = match config_path {
            Some(path) => std::path::PathBuf::from(path),
            None => Config::default_config_path()?,
        };
        if path.exists() {
            return Err(anyhow!("{} already exists, not overwriting", path.display()));
        }
        Config::default().save_to_file(&path).await?;
        println!("{}", path.display());
        return Ok(());
    }

    let mut config = Config::load_or_default(config_path).await;

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        config.chain.rpc_urls.retain(|url| url != rpc_url);
        config.chain.rpc_urls.insert(0, rpc_url.clone());
        config.monitor.rpc_url = rpc_url.clone();
    }

    let outcome = match matches.subcommand() {
        Some(("fetch", sub)) => run_fetch(&config, sub).await,
        Some(("metrics", sub)) => run_metrics(sub).await,
        Some(("audit", sub)) => run_audit(&config, sub).await,
        Some(("monitor", sub)) => run_monitor(config, sub).await,
        _ => {
            build_cli().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = outcome {
        let kind = ErrorKind::of(&e);
        error!("{:#}", e);
        if kind.is_some_and(|k| k.is_recoverable()) {
            error!("This failure is usually temporary. Try again in a moment.");
        }
        std::process::exit(exit_code(kind));
    }
    Ok(())
}

fn exit_code(kind: Option<ErrorKind>) -> i32 {
    kind.map(|k| k.exit_code()).unwrap_or(1)
}

async fn run_fetch(config: &Config, matches: &ArgMatches) -> Result<()> {
    let address = matches
        .get_one::<String>("address")
        .ok_or_else(|| anyhow!("address is required"))?;
    let api_key = matches.get_one::<String>("api-key").map(|s| s.as_str());

    let fetcher = SourceFetcher::new(config, Arc::new(AlloyConnector), Progress::silent())?;
    let source = fetcher.fetch_source(address, api_key).await?;

    info!("Retrieved {} ({} lines)", source.name, source.source_code.lines().count());
    println!("{}", source.source_code);
    Ok(())
}

async fn run_metrics(matches: &ArgMatches) -> Result<()> {
    let path = matches
        .get_one::<String>("file")
        .ok_or_else(|| anyhow!("file is required"))?;
    let source = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {}", path, e))?;

    let output = serde_json::json!({
        "metrics": analysis::extract_metrics(&source),
        "detectedLibraries": analysis::detect_libraries(&source),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_audit(config: &Config, matches: &ArgMatches) -> Result<()> {
    let name = matches.get_one::<String>("name").cloned();
    let api_key = matches.get_one::<String>("api-key").map(|s| s.as_str());
    let (progress, mut events) = Progress::channel();

    let (source, name, address) = match matches.get_one::<String>("address") {
        Some(address) => {
            let fetcher = SourceFetcher::new(config, Arc::new(AlloyConnector), progress.clone())?;
            let fetched = fetcher.fetch_source(address, api_key).await?;
            let name = name.unwrap_or(fetched.name);
            (fetched.source_code, Some(name), Some(fetched.address))
        }
        None => {
            let path = matches
                .get_one::<String>("file")
                .ok_or_else(|| anyhow!("either --address or --file is required"))?;
            let source = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| anyhow!("Failed to read {}: {}", path, e))?;
            (source, name, None)
        }
    };

    let engine = AuditEngine::new(&config.model, progress)?;
    let report = match engine.audit(&source, name.as_deref()).await {
        Ok(report) => report,
        Err(e) => {
            if let Some(raw) = e.raw_output() {
                error!("Raw model output:\n{}", raw);
            }
            return Err(e.into());
        }
    };
    let report = match address {
        Some(address) => report.with_address(address),
        None => report,
    };

    let mut warnings = 0;
    while let Ok(event) = events.try_recv() {
        if event.level == ProgressLevel::Warning {
            warnings += 1;
        }
    }
    if warnings > 0 {
        warn!("Audit completed with {} warning(s), see log above", warnings);
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_watch_arg(value: &str) -> Result<(String, String, Option<u8>)> {
    let mut parts = value.splitn(3, ':');
    let address = parts.next().unwrap_or_default().trim().to_string();
    let name = parts.next().unwrap_or_default().trim().to_string();
    let decimals = parts
        .next()
        .map(|d| d.trim().parse::<u8>())
        .transpose()
        .map_err(|e| anyhow!("Invalid decimals in '{}': {}", value, e))?;
    Ok((address, name, decimals))
}

async fn run_monitor(config: Config, matches: &ArgMatches) -> Result<()> {
    let watchlist =
        Watchlist::from_targets(&config.monitor.watch, config.monitor.alerts.clone()).await;
    if let Some(values) = matches.get_many::<String>("watch") {
        for value in values {
            let (address, name, decimals) = parse_watch_arg(value)?;
            watchlist.add(&address, &name, decimals).await?;
        }
    }
    if watchlist.is_empty().await {
        warn!("Watchlist is empty, only gas prices will be reported");
    }

    let monitor = LiveMonitor::new(
        config.monitor.clone(),
        Arc::new(AlloyConnector),
        Arc::new(watchlist),
    )?;
    let mut updates = monitor.subscribe();
    let handle = monitor.start();

    info!(
        "Monitoring {}. Type 'help' for commands; Ctrl-C stops.",
        config.monitor.rpc_url
    );
    let mut commands = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = commands.next_line() => match line {
                Ok(Some(line)) => match console::parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(OperatorCommand::Quit)) => break,
                    Ok(Some(OperatorCommand::Help)) => info!("{}", console::HELP),
                    Ok(Some(OperatorCommand::Retry)) => match handle.retry() {
                        Ok(true) => info!("Reconnecting..."),
                        Ok(false) => info!("Monitor is not in the failed state ({})", handle.state()),
                        Err(e) => warn!("{}", e),
                    },
                    Ok(Some(OperatorCommand::Status)) => log_status(&handle).await,
                    Ok(Some(command)) => match console::apply_command(handle.watchlist(), &command).await {
                        Ok(Some(message)) => info!("{}", message),
                        Ok(None) => {}
                        Err(e) => warn!("{}", e),
                    },
                    Err(e) => warn!("{:#}", e),
                },
                // stdin closed; keep running until Ctrl-C
                Ok(None) | Err(_) => {
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
            update = updates.recv() => match update {
                Ok(update) => log_update(&update),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} monitor updates", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    info!("Stopping monitor");
    handle.stop().await;
    Ok(())
}

async fn log_status(handle: &MonitorHandle) {
    let state = handle.state();
    if state.is_live() {
        info!("State: {}", state);
    } else {
        warn!("State: {}", state);
    }

    let history = handle.gas_history().await;
    if let Some(latest) = history.last() {
        let peak = history
            .iter()
            .map(|s| s.gas_price_gwei)
            .fold(f64::MIN, f64::max);
        info!(
            "Gas: {:.2} gwei (peak {:.2} over {} samples)",
            latest.gas_price_gwei,
            peak,
            history.len()
        );
    }

    let watchlist = handle.watchlist();
    let alerts = watchlist.alert_config().await;
    info!(
        "Alerts: high value > {} tokens, gas spike > {} gwei, flash loans {}",
        alerts.min_transfer_value,
        alerts.gas_threshold_gwei,
        if alerts.detect_flash_loans { "on" } else { "off" }
    );

    info!("Watching {} contract(s)", watchlist.len().await);
    for contract in watchlist.snapshot().await {
        info!(
            "{} {} [{:?}] events={} volume={:.2} gas={:.2} gwei",
            contract.name,
            contract.address,
            contract.status,
            contract.stats.event_count,
            contract.stats.volume,
            contract.stats.last_gas_price
        );
    }
}

fn log_update(update: &MonitorUpdate) {
    match update {
        MonitorUpdate::State(ConnectionState::Failed { reason }) => {
            error!("Monitor connection failed: {}. Type 'retry' to reconnect.", reason)
        }
        MonitorUpdate::State(state) => info!("Monitor {}", state),
        MonitorUpdate::Gas(sample) => info!("Gas price: {:.2} gwei", sample.gas_price_gwei),
        MonitorUpdate::Event { contract, event } => {
            let source = contract
                .map(|c| c.to_string())
                .unwrap_or_else(|| "network".to_string());
            info!(
                "[{}] [{}] {:?} {}",
                event.severity, source, event.event_type, event.message
            );
        }
        MonitorUpdate::Warning { message } => warn!("{}", message),
    }
}
