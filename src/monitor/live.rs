use chrono::Utc;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::classify::{classify_log, detect_flash_loans, gas_spike};
use super::notify::{Notifier, NOTIFY_THRESHOLD};
use super::types::{AlertConfig, ConnectionState, GasSample, MonitorUpdate, MonitoringEvent};
use super::watchlist::Watchlist;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, RpcError};
use crate::ethereum::provider::probe_endpoint;
use crate::ethereum::utils::wei_to_gwei;
use crate::ethereum::{ChainClient, ChainConnector};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Result of a single poll tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Chain height did not move past the cursor.
    Idle,
    /// Blocks `from..=to` were scanned and committed.
    Scanned { from: u64, to: u64, events: usize },
    /// Nothing was committed; the same range is retried next tick.
    Failed(RpcError),
}

struct Shared {
    config: MonitorConfig,
    connector: Arc<dyn ChainConnector>,
    watchlist: Arc<Watchlist>,
    notifier: Notifier,
    updates: broadcast::Sender<MonitorUpdate>,
    state: watch::Sender<ConnectionState>,
    gas_history: RwLock<VecDeque<GasSample>>,
}

impl Shared {
    fn publish(&self, update: MonitorUpdate) {
        // No subscribers is fine.
        let _ = self.updates.send(update);
    }

    fn set_state(&self, state: ConnectionState) {
        if *self.state.borrow() == state {
            return;
        }
        debug!("Monitor state: {}", state);
        self.state.send_replace(state.clone());
        self.publish(MonitorUpdate::State(state));
    }

    async fn call<T>(&self, request: impl Future<Output = Result<T, RpcError>>) -> Result<T, RpcError> {
        let timeout = self.config.request_timeout();
        tokio::time::timeout(timeout, request)
            .await
            .unwrap_or_else(|_| Err(RpcError::timed_out(timeout)))
    }

    async fn connect(&self) -> Result<(Arc<dyn ChainClient>, u64), RpcError> {
        let endpoint = probe_endpoint(
            self.connector.as_ref(),
            &self.config.rpc_url,
            self.config.connect_timeout(),
        )
        .await?;
        let block = self.call(endpoint.client.block_number()).await?;
        info!(
            "Monitor connected to {} (chain id {}) at block {}",
            endpoint.url, endpoint.chain_id, block
        );
        Ok((endpoint.client, block))
    }

    async fn push_gas(&self, sample: GasSample) {
        let mut history = self.gas_history.write().await;
        history.push_back(sample.clone());
        while history.len() > self.config.gas_history {
            history.pop_front();
        }
        drop(history);
        self.publish(MonitorUpdate::Gas(sample));
    }

    fn notify(&self, contract_name: &str, event: &MonitoringEvent, alerts: &AlertConfig) {
        if !event.severity.at_least(NOTIFY_THRESHOLD) {
            return;
        }
        let notifier = self.notifier.clone();
        let contract_name = contract_name.to_string();
        let event = event.clone();
        let alerts = alerts.clone();
        tokio::spawn(async move {
            notifier.notify(&contract_name, &event, &alerts).await;
        });
    }
}

/// Polls one connected endpoint. `cursor` is the last block whose logs have
/// been committed for every active contract.
struct Poller {
    client: Arc<dyn ChainClient>,
    cursor: u64,
    /// Gas was above the threshold on the last sample.
    gas_spiking: bool,
    shared: Arc<Shared>,
}

impl Poller {
    fn new(client: Arc<dyn ChainClient>, cursor: u64, shared: Arc<Shared>) -> Self {
        Self {
            client,
            cursor,
            gas_spiking: false,
            shared,
        }
    }
}

impl Poller {
    async fn run(&mut self, stop: &mut watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.shared.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; polling starts one interval after connecting.
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop.changed() => return,
                _ = interval.tick() => {}
            }
            self.tick().await;
        }
    }

    async fn tick(&mut self) -> TickOutcome {
        match self.poll_once().await {
            Ok(outcome) => {
                self.shared.set_state(ConnectionState::Live { block: self.cursor });
                outcome
            }
            Err(e) => {
                if e.kind().is_recoverable() {
                    warn!("Monitor tick failed, retrying next tick: {}", e);
                } else {
                    error!("Monitor tick failed, retrying next tick: {}", e);
                }
                let reason = e.user_message();
                self.shared.set_state(ConnectionState::Degraded {
                    block: self.cursor,
                    reason: reason.clone(),
                });
                self.shared.publish(MonitorUpdate::Warning { message: reason });
                TickOutcome::Failed(e)
            }
        }
    }

    async fn poll_once(&mut self) -> Result<TickOutcome, RpcError> {
        let shared = self.shared.clone();

        let latest = shared.call(self.client.block_number()).await?;
        let gas_price_gwei = wei_to_gwei(shared.call(self.client.gas_price()).await?);
        shared
            .push_gas(GasSample {
                timestamp: Utc::now(),
                gas_price_gwei,
            })
            .await;

        let alerts = shared.watchlist.alert_config().await;
        let spike = gas_spike(gas_price_gwei, latest, &alerts);
        let was_spiking = std::mem::replace(&mut self.gas_spiking, spike.is_some());
        // Only the crossing is reported, not every sample above the threshold.
        if let Some(spike) = spike.filter(|_| !was_spiking) {
            shared.notify("Network", &spike, &alerts);
            shared.publish(MonitorUpdate::Event {
                contract: None,
                event: spike,
            });
        }

        if latest <= self.cursor {
            return Ok(TickOutcome::Idle);
        }

        let from = self.cursor + 1;
        let targets = shared.watchlist.active_targets().await;

        // Query everything first; a single failure leaves the range uncommitted.
        let mut batches = Vec::with_capacity(targets.len());
        for target in targets {
            let logs = shared
                .call(self.client.logs(target.address, from, latest))
                .await?;
            batches.push((target, logs));
        }

        let mut committed = 0;
        for (target, logs) in batches {
            let mut events: Vec<MonitoringEvent> = logs
                .iter()
                .map(|log| classify_log(log, target.decimals, &alerts))
                .collect();
            events.extend(detect_flash_loans(&events, &alerts));

            committed += shared
                .watchlist
                .record(
                    target.address,
                    events.clone(),
                    gas_price_gwei,
                    shared.config.event_capacity,
                )
                .await;

            for event in events {
                shared.notify(&target.name, &event, &alerts);
                shared.publish(MonitorUpdate::Event {
                    contract: Some(target.address),
                    event,
                });
            }
        }

        debug!("Scanned blocks {}..={} ({} new events)", from, latest, committed);
        self.cursor = latest;
        Ok(TickOutcome::Scanned {
            from,
            to: latest,
            events: committed,
        })
    }
}

async fn run(shared: Arc<Shared>, retry: Arc<Notify>, mut stop: watch::Receiver<bool>) {
    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            result = shared.connect() => result,
            _ = stop.changed() => return,
        };

        match connected {
            Ok((client, baseline)) => {
                shared.set_state(ConnectionState::Live { block: baseline });
                let mut poller = Poller::new(client, baseline, shared.clone());
                poller.run(&mut stop).await;
                info!("Monitor stopped");
                return;
            }
            Err(e) => {
                error!("Monitor connection failed: {}", e);
                shared.set_state(ConnectionState::Failed {
                    reason: e.user_message(),
                });
                tokio::select! {
                    _ = retry.notified() => info!("Retrying monitor connection"),
                    _ = stop.changed() => return,
                }
            }
        }
    }
}

/// Live on-chain monitor for the contracts in a [`Watchlist`].
pub struct LiveMonitor {
    shared: Arc<Shared>,
}

impl LiveMonitor {
    pub fn new(
        config: MonitorConfig,
        connector: Arc<dyn ChainConnector>,
        watchlist: Arc<Watchlist>,
    ) -> anyhow::Result<Self> {
        let notifier = Notifier::new(config.request_timeout())?;
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Connecting);
        let gas_history = RwLock::new(VecDeque::with_capacity(config.gas_history));

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                watchlist,
                notifier,
                updates,
                state,
                gas_history,
            }),
        })
    }

    /// Subscribe before [`LiveMonitor::start`] to see the very first updates.
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorUpdate> {
        self.shared.updates.subscribe()
    }

    /// Spawn the connect-and-poll task.
    pub fn start(self) -> MonitorHandle {
        let retry = Arc::new(Notify::new());
        let (stop, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run(self.shared.clone(), retry.clone(), stop_rx));

        MonitorHandle {
            shared: self.shared,
            retry,
            stop,
            task: Some(task),
        }
    }
}

/// Control surface of a running monitor. Dropping it stops the loop at the
/// next tick boundary.
pub struct MonitorHandle {
    shared: Arc<Shared>,
    retry: Arc<Notify>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    pub async fn gas_history(&self) -> Vec<GasSample> {
        self.shared.gas_history.read().await.iter().cloned().collect()
    }

    pub fn watchlist(&self) -> &Arc<Watchlist> {
        &self.shared.watchlist
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Re-run the connection phase after a failure. Returns `false` when the
    /// monitor is not in the failed state.
    pub fn retry(&self) -> Result<bool, MonitorError> {
        if !self.is_running() {
            return Err(MonitorError::NotRunning);
        }
        if !matches!(self.state(), ConnectionState::Failed { .. }) {
            return Ok(false);
        }
        self.retry.notify_one();
        Ok(true)
    }

    /// Stop issuing ticks and wait for the task. An in-flight tick finishes first.
    pub async fn stop(mut self) {
        self.stop.send_replace(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Monitor task ended abnormally: {}", e);
            }
        }
    }
}
