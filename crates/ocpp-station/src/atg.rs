//! Automatic transaction generator
//!
//! Per-station supervisor that drives synthetic charging sessions: one
//! cooperative loop per connector waits a random delay, probabilistically
//! starts a transaction, lets it run for a random duration and stops it
//! again, until the running budget is spent or the generator is stopped.
//! Cancellation is cooperative: `stop` clears per-connector run flags and
//! the loops observe them at the head of their next iteration.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use ocpp_proto::messages::{AuthorizeResponse, StartTransactionResponse, StopTransactionResponse};
use ocpp_proto::types::{AuthorizationStatus, StopReason};
use ocpp_proto::{OcppError, OcppResult};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::{
    AtgConfig, ATG_INITIALIZATION_POLL_INTERVAL, ATG_WAIT_AFTER_REJECTED_START,
};
use crate::random::{secure_random, uniform_seconds};
use crate::ChargingStation;

/// Measurement id bracketing generator-driven transaction starts
pub const MEASURE_START_TRANSACTION: &str = "StartTransaction with ATG";
/// Measurement id bracketing generator-driven transaction stops
pub const MEASURE_STOP_TRANSACTION: &str = "StopTransaction with ATG";

/// Outcome of a generator-driven transaction start
#[derive(Debug, Clone)]
pub enum StartOutcome {
    /// StartTransaction was sent; the verdict sits in the response
    Started(StartTransactionResponse),
    /// The preceding Authorize was not accepted; no start was attempted
    AuthorizeRejected(AuthorizeResponse),
}

impl StartOutcome {
    /// Authorization verdict, whichever leg produced it
    pub fn id_tag_status(&self) -> AuthorizationStatus {
        match self {
            StartOutcome::Started(response) => response.id_tag_info.status,
            StartOutcome::AuthorizeRejected(response) => response.id_tag_info.status,
        }
    }
}

/// Outcome of a generator-driven transaction stop
#[derive(Debug, Clone)]
pub enum StopOutcome {
    Stopped(StopTransactionResponse),
    /// The connector had no open transaction; nothing was sent
    NoTransaction,
}

/// Cooperative run state observed by one connector loop
#[derive(Debug, Default)]
pub struct ConnectorRunState {
    run: AtomicBool,
    skipped_consecutive: AtomicU64,
    skipped_total: AtomicU64,
}

impl ConnectorRunState {
    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }

    /// Starts skipped since the last successful start
    pub fn skipped_consecutive(&self) -> u64 {
        self.skipped_consecutive.load(Ordering::Acquire)
    }

    /// Starts skipped over the generator's lifetime
    pub fn skipped_total(&self) -> u64 {
        self.skipped_total.load(Ordering::Acquire)
    }
}

struct ConnectorSlot {
    state: Arc<ConnectorRunState>,
    handle: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct GeneratorState {
    started: bool,
    start_date: Option<Instant>,
    last_run_date: Option<Instant>,
    stop_date: Option<Instant>,
}

/// Per-station transaction generator
pub struct AutomaticTransactionGenerator {
    station: Arc<ChargingStation>,
    config: AtgConfig,
    state: Mutex<GeneratorState>,
    connectors: RwLock<HashMap<u32, ConnectorSlot>>,
}

impl AutomaticTransactionGenerator {
    pub fn new(station: Arc<ChargingStation>) -> Arc<Self> {
        let config = station
            .station_info()
            .automatic_transaction_generator
            .clone();
        Arc::new(Self {
            station,
            config,
            state: Mutex::new(GeneratorState::default()),
            connectors: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &AtgConfig {
        &self.config
    }

    pub async fn is_started(&self) -> bool {
        self.state.lock().await.started
    }

    /// Current run window, for reporting
    pub async fn run_window(&self) -> Option<(Instant, Instant)> {
        let state = self.state.lock().await;
        Some((state.start_date?, state.stop_date?))
    }

    /// Start loops on every transacting connector
    ///
    /// A second `start` while running is a no-op with a warning. Scheduling
    /// never blocks: every loop begins on a fresh task.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            if state.started {
                warn!(
                    station = self.station.hash_id(),
                    "transaction generator is already started"
                );
                return;
            }
            Self::open_run_window(&mut state, &self.config);
            state.started = true;
        }
        for connector_id in self.station.connector_ids().await {
            if connector_id == 0 {
                continue;
            }
            self.spawn_connector_loop(connector_id).await;
        }
        info!(
            station = self.station.hash_id(),
            "transaction generator started"
        );
    }

    /// Request all loops to stop at their next safe point
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if !state.started {
                warn!(
                    station = self.station.hash_id(),
                    "transaction generator is already stopped"
                );
                return;
            }
            state.started = false;
        }
        for slot in self.connectors.read().await.values() {
            slot.state.run.store(false, Ordering::Release);
        }
        info!(
            station = self.station.hash_id(),
            "transaction generator stop requested"
        );
    }

    /// Start the loop of a single connector
    pub async fn start_connector(self: &Arc<Self>, connector_id: u32) {
        if connector_id == 0 || self.station.get_connector(connector_id).await.is_none() {
            warn!(
                station = self.station.hash_id(),
                connector_id, "cannot start a transaction loop on this connector"
            );
            return;
        }
        {
            let mut state = self.state.lock().await;
            if !state.started {
                Self::open_run_window(&mut state, &self.config);
                state.started = true;
            }
        }
        self.spawn_connector_loop(connector_id).await;
    }

    /// Stop the loop of a single connector; the generator stays started
    pub async fn stop_connector(&self, connector_id: u32) {
        match self.connectors.read().await.get(&connector_id) {
            Some(slot) => slot.state.run.store(false, Ordering::Release),
            None => warn!(
                station = self.station.hash_id(),
                connector_id, "no transaction loop to stop on this connector"
            ),
        }
    }

    /// Whether every scheduled loop has fully wound down
    ///
    /// Distinct from `!is_started()`: a stop request flips the flags first,
    /// while a loop mid-iteration still finishes its open transaction.
    pub async fn is_idle(&self) -> bool {
        self.connectors
            .read()
            .await
            .values()
            .all(|slot| slot.handle.as_ref().map_or(true, |handle| handle.is_finished()))
    }

    /// Run state of one connector loop, if it was ever scheduled
    pub async fn connector_run_state(&self, connector_id: u32) -> Option<Arc<ConnectorRunState>> {
        self.connectors
            .read()
            .await
            .get(&connector_id)
            .map(|slot| Arc::clone(&slot.state))
    }

    /// Open a fresh run window, crediting back what the previous run left
    /// unused: `stop = now + budget − (previous last_run − previous start)`.
    fn open_run_window(state: &mut GeneratorState, config: &AtgConfig) {
        let now = Instant::now();
        let consumed = match (state.start_date, state.last_run_date) {
            (Some(start), Some(last_run)) => last_run.saturating_duration_since(start),
            _ => tokio::time::Duration::ZERO,
        };
        state.stop_date = Some(now + config.stop_after().saturating_sub(consumed));
        state.start_date = Some(now);
        state.last_run_date = Some(now);
    }

    async fn spawn_connector_loop(self: &Arc<Self>, connector_id: u32) {
        let mut connectors = self.connectors.write().await;
        let slot = connectors.entry(connector_id).or_insert_with(|| ConnectorSlot {
            state: Arc::new(ConnectorRunState::default()),
            handle: None,
        });
        slot.state.run.store(true, Ordering::Release);
        if slot.handle.as_ref().is_some_and(|h| !h.is_finished()) {
            // the previous loop never observed its stop flag; reviving the
            // flag lets it carry on instead of stacking a second loop
            debug!(
                station = self.station.hash_id(),
                connector_id, "transaction loop still alive, resuming it"
            );
            return;
        }

        let generator = Arc::clone(self);
        let run_state = Arc::clone(&slot.state);
        slot.handle = Some(tokio::spawn(async move {
            info!(
                station = generator.station.hash_id(),
                connector_id, "transaction loop started"
            );
            if let Err(e) = generator.connector_loop(connector_id, &run_state).await {
                error!(
                    station = generator.station.hash_id(),
                    connector_id, "transaction loop failed: {e}"
                );
            }
            generator.terminal_stop(connector_id).await;
            run_state.run.store(false, Ordering::Release);
            info!(
                station = generator.station.hash_id(),
                connector_id, "transaction loop exited"
            );
        }));
    }

    async fn connector_loop(
        &self,
        connector_id: u32,
        run_state: &ConnectorRunState,
    ) -> OcppResult<()> {
        while run_state.is_running() {
            let stop_date = self.state.lock().await.stop_date;
            if stop_date.is_some_and(|stop| Instant::now() >= stop) {
                info!(
                    station = self.station.hash_id(),
                    connector_id, "running budget spent, stopping the generator"
                );
                self.stop().await;
                break;
            }
            if !self.station.is_registered().await {
                error!(
                    station = self.station.hash_id(),
                    connector_id, "station is not registered, ending the transaction loop"
                );
                break;
            }
            if !self.station.is_charging_station_available().await {
                info!(
                    station = self.station.hash_id(),
                    connector_id, "station unavailable, stopping the generator"
                );
                self.stop().await;
                break;
            }
            if !self.station.is_connector_available(connector_id).await {
                info!(
                    station = self.station.hash_id(),
                    connector_id, "connector unavailable, ending its transaction loop"
                );
                break;
            }
            // the only sanctioned busy-wait: the request service exists only
            // once the websocket is open
            while self.station.request_service().await.is_none() {
                if !run_state.is_running() {
                    return Ok(());
                }
                sleep(ATG_INITIALIZATION_POLL_INTERVAL).await;
            }

            let delay = uniform_seconds(
                self.config.min_delay_between_two_transactions,
                self.config.max_delay_between_two_transactions,
            );
            debug!(
                station = self.station.hash_id(),
                connector_id,
                delay_s = delay.as_secs_f64(),
                "waiting before the next start decision"
            );
            sleep(delay).await;

            if secure_random() < self.config.probability_of_start {
                match self.start_transaction(connector_id).await? {
                    StartOutcome::Started(response)
                        if response.id_tag_info.status == AuthorizationStatus::Accepted =>
                    {
                        run_state.skipped_consecutive.store(0, Ordering::Release);
                        let duration =
                            uniform_seconds(self.config.min_duration, self.config.max_duration);
                        info!(
                            station = self.station.hash_id(),
                            connector_id,
                            transaction_id = response.transaction_id,
                            duration_s = duration.as_secs_f64(),
                            "charging"
                        );
                        sleep(duration).await;
                        self.stop_transaction(connector_id, None).await?;
                    }
                    outcome => {
                        warn!(
                            station = self.station.hash_id(),
                            connector_id,
                            status = ?outcome.id_tag_status(),
                            "transaction start rejected, cooling off"
                        );
                        sleep(ATG_WAIT_AFTER_REJECTED_START).await;
                    }
                }
            } else {
                let consecutive = run_state
                    .skipped_consecutive
                    .fetch_add(1, Ordering::AcqRel)
                    + 1;
                let total = run_state.skipped_total.fetch_add(1, Ordering::AcqRel) + 1;
                info!(
                    station = self.station.hash_id(),
                    connector_id, consecutive, total, "transaction start skipped"
                );
            }

            self.state.lock().await.last_run_date = Some(Instant::now());
        }
        Ok(())
    }

    /// Start a transaction, authorizing first when the station requires it
    pub async fn start_transaction(&self, connector_id: u32) -> OcppResult<StartOutcome> {
        let statistics = self.station.statistics();
        let token = statistics.begin_measure(MEASURE_START_TRANSACTION);
        let outcome = self.do_start_transaction(connector_id).await;
        statistics.end_measure(MEASURE_START_TRANSACTION, token).await;
        outcome
    }

    async fn do_start_transaction(&self, connector_id: u32) -> OcppResult<StartOutcome> {
        let service = self
            .station
            .request_service()
            .await
            .ok_or(OcppError::NotConnected)?;
        if !self.station.has_authorized_tags() {
            let response = service
                .start_transaction(&self.station, connector_id, None)
                .await?;
            return Ok(StartOutcome::Started(response));
        }
        let id_tag = self.station.get_random_id_tag().ok_or_else(|| {
            OcppError::Internal("authorized tag list emptied underneath the generator".to_string())
        })?;
        if self
            .station
            .get_automatic_transaction_generator_require_authorize()
        {
            let authorize = service
                .authorize(&self.station, connector_id, &id_tag)
                .await?;
            if !authorize.id_tag_info.is_accepted() {
                return Ok(StartOutcome::AuthorizeRejected(authorize));
            }
        }
        let response = service
            .start_transaction(&self.station, connector_id, Some(&id_tag))
            .await?;
        Ok(StartOutcome::Started(response))
    }

    /// Stop the connector's open transaction; a no-op when there is none
    pub async fn stop_transaction(
        &self,
        connector_id: u32,
        reason: Option<StopReason>,
    ) -> OcppResult<StopOutcome> {
        let statistics = self.station.statistics();
        let token = statistics.begin_measure(MEASURE_STOP_TRANSACTION);
        let outcome = self.do_stop_transaction(connector_id, reason).await;
        statistics.end_measure(MEASURE_STOP_TRANSACTION, token).await;
        outcome
    }

    async fn do_stop_transaction(
        &self,
        connector_id: u32,
        reason: Option<StopReason>,
    ) -> OcppResult<StopOutcome> {
        let Some(connector) = self.station.get_connector(connector_id).await else {
            warn!(
                station = self.station.hash_id(),
                connector_id, "no such connector to stop a transaction on"
            );
            return Ok(StopOutcome::NoTransaction);
        };
        if !connector.transaction_started {
            warn!(
                station = self.station.hash_id(),
                connector_id, "no open transaction to stop"
            );
            return Ok(StopOutcome::NoTransaction);
        }
        let transaction_id = connector.transaction_id;
        let meter_stop = self
            .station
            .get_energy_active_import_register_by_transaction_id(transaction_id, true)
            .await
            .unwrap_or(connector.energy_active_import_register);
        let id_tag = self.station.get_transaction_id_tag(transaction_id).await;
        let service = self
            .station
            .request_service()
            .await
            .ok_or(OcppError::NotConnected)?;
        let response = service
            .stop_transaction(&self.station, transaction_id, meter_stop, id_tag, reason)
            .await?;
        Ok(StopOutcome::Stopped(response))
    }

    /// Close any transaction the loop leaves behind on its way out
    async fn terminal_stop(&self, connector_id: u32) {
        let open = self
            .station
            .get_connector(connector_id)
            .await
            .is_some_and(|c| c.transaction_started);
        if !open {
            return;
        }
        if let Err(e) = self.stop_transaction(connector_id, None).await {
            error!(
                station = self.station.hash_id(),
                connector_id, "terminal transaction stop failed: {e}"
            );
        }
    }

    #[cfg(test)]
    async fn state_snapshot(&self) -> (bool, Option<Instant>, Option<Instant>, Option<Instant>) {
        let state = self.state.lock().await;
        (
            state.started,
            state.start_date,
            state.last_run_date,
            state.stop_date,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationTemplate;
    use crate::testing::MockTransport;
    use serde_json::json;
    use tokio::time::{advance, timeout, Duration};

    struct StationSpec {
        tags: Vec<String>,
        atg: AtgConfig,
    }

    impl Default for StationSpec {
        fn default() -> Self {
            Self {
                tags: Vec::new(),
                atg: AtgConfig::default(),
            }
        }
    }

    async fn build_station(spec: StationSpec) -> Arc<ChargingStation> {
        let mut template = StationTemplate::named("CS-ATG");
        template.authorized_tags = spec.tags;
        template.automatic_transaction_generator = spec.atg;
        let station = Arc::new(ChargingStation::new(
            "CS-ATG-001".to_string(),
            template,
            "ws://localhost:9999/ocpp".to_string(),
        ));
        station.set_registered(true).await;
        station
    }

    async fn wait_until_stopped(generator: &Arc<AutomaticTransactionGenerator>) {
        timeout(Duration::from_secs(600), async {
            while generator.is_started().await || !generator.is_idle().await {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .expect("generator did not stop within the budget");
    }

    #[tokio::test(start_paused = true)]
    async fn happy_path_starts_and_stops_transactions_on_every_connector() {
        let station = build_station(StationSpec {
            atg: AtgConfig {
                probability_of_start: 1.0,
                min_duration: 2.0,
                max_duration: 2.0,
                min_delay_between_two_transactions: 1.0,
                max_delay_between_two_transactions: 1.0,
                stop_after_hours: 0.001,
                ..AtgConfig::default()
            },
            ..StationSpec::default()
        })
        .await;
        let transport = MockTransport::accepting();
        station.attach_transport(transport.clone()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        wait_until_stopped(&generator).await;

        let starts = transport.calls_for("StartTransaction");
        let stops = transport.calls_for("StopTransaction");
        assert!(starts >= 2, "expected a start per connector, got {starts}");
        assert_eq!(starts, stops, "every start must be matched by a stop");
        for id in [1, 2] {
            let connector = station.get_connector(id).await.unwrap();
            assert!(!connector.transaction_started);
            assert_eq!(connector.transaction_id, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn probability_zero_only_advances_the_skip_counters() {
        let station = build_station(StationSpec {
            atg: AtgConfig {
                probability_of_start: 0.0,
                min_delay_between_two_transactions: 1.0,
                max_delay_between_two_transactions: 1.0,
                stop_after_hours: 0.001,
                ..AtgConfig::default()
            },
            ..StationSpec::default()
        })
        .await;
        let transport = MockTransport::accepting();
        station.attach_transport(transport.clone()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        wait_until_stopped(&generator).await;

        assert_eq!(transport.calls_for("StartTransaction"), 0);
        let run_state = generator.connector_run_state(1).await.unwrap();
        assert!(run_state.skipped_total() >= 1);
        assert!(!run_state.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_authorize_cools_off_without_starting() {
        let station = build_station(StationSpec {
            tags: vec!["TAG-1".to_string()],
            atg: AtgConfig {
                probability_of_start: 1.0,
                require_authorize: true,
                min_delay_between_two_transactions: 1.0,
                max_delay_between_two_transactions: 1.0,
                stop_after_hours: 0.001,
                ..AtgConfig::default()
            },
        })
        .await;
        let transport = MockTransport::new(|action, _| match action {
            "Authorize" => Ok(json!({"idTagInfo": {"status": "Blocked"}})),
            _ => Ok(json!({})),
        });
        station.attach_transport(transport.clone()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        wait_until_stopped(&generator).await;

        assert!(transport.calls_for("Authorize") >= 1);
        assert_eq!(transport.calls_for("StartTransaction"), 0);
        let run_state = generator.connector_run_state(1).await.unwrap();
        // the probability check succeeded, so nothing was skipped
        assert_eq!(run_state.skipped_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_every_connector_flag() {
        let station = build_station(StationSpec::default()).await;
        station.attach_transport(MockTransport::accepting()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        assert!(generator.is_started().await);
        for id in [1, 2] {
            assert!(generator.connector_run_state(id).await.unwrap().is_running());
        }

        generator.stop().await;
        assert!(!generator.is_started().await);
        for id in [1, 2] {
            assert!(!generator.connector_run_state(id).await.unwrap().is_running());
        }

        // guarded re-entries only warn
        generator.stop().await;
        assert!(!generator.is_started().await);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_guarded_no_op() {
        let station = build_station(StationSpec::default()).await;
        station.attach_transport(MockTransport::accepting()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        let (_, start_date, _, _) = generator.state_snapshot().await;

        generator.start().await;
        let (started, start_date_after, _, _) = generator.state_snapshot().await;
        assert!(started);
        assert_eq!(start_date, start_date_after, "run window must not move");
    }

    #[tokio::test(start_paused = true)]
    async fn restart_preserves_the_remaining_budget() {
        let station = build_station(StationSpec {
            atg: AtgConfig {
                probability_of_start: 0.0,
                min_delay_between_two_transactions: 100.0,
                max_delay_between_two_transactions: 100.0,
                stop_after_hours: 1.0,
                ..AtgConfig::default()
            },
            ..StationSpec::default()
        })
        .await;
        station.attach_transport(MockTransport::accepting()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        let (_, start0, _, stop0) = generator.state_snapshot().await;
        assert_eq!(
            stop0.unwrap().duration_since(start0.unwrap()),
            Duration::from_secs(3600)
        );

        advance(Duration::from_secs(250)).await;
        generator.stop().await;
        let (_, _, last_run0, _) = generator.state_snapshot().await;
        let consumed = last_run0.unwrap().duration_since(start0.unwrap());

        generator.start().await;
        let (_, start1, _, stop1) = generator.state_snapshot().await;
        let remaining = stop1.unwrap().duration_since(start1.unwrap());
        assert_eq!(remaining, Duration::from_secs(3600) - consumed);
        generator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_stops_on_the_first_iteration() {
        let station = build_station(StationSpec {
            atg: AtgConfig {
                probability_of_start: 1.0,
                stop_after_hours: 0.0,
                ..AtgConfig::default()
            },
            ..StationSpec::default()
        })
        .await;
        let transport = MockTransport::accepting();
        station.attach_transport(transport.clone()).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        wait_until_stopped(&generator).await;

        assert_eq!(transport.calls_for("StartTransaction"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_station_stops_the_generator() {
        let station = build_station(StationSpec {
            atg: AtgConfig {
                min_delay_between_two_transactions: 1.0,
                max_delay_between_two_transactions: 1.0,
                ..AtgConfig::default()
            },
            ..StationSpec::default()
        })
        .await;
        station.attach_transport(MockTransport::accepting()).await;
        station.set_connector_availability(0, false).await;

        let generator = station.transaction_generator().await;
        generator.start().await;
        wait_until_stopped(&generator).await;
        assert!(!generator.is_started().await);
    }

    #[tokio::test(start_paused = true)]
    async fn per_connector_scoping_starts_and_stops_single_loops() {
        let station = build_station(StationSpec::default()).await;
        station.attach_transport(MockTransport::accepting()).await;

        let generator = station.transaction_generator().await;
        generator.start_connector(1).await;
        assert!(generator.is_started().await);
        assert!(generator.connector_run_state(1).await.unwrap().is_running());
        assert!(generator.connector_run_state(2).await.is_none());

        // connector 0 and unknown connectors never get loops
        generator.start_connector(0).await;
        generator.start_connector(9).await;
        assert!(generator.connector_run_state(0).await.is_none());
        assert!(generator.connector_run_state(9).await.is_none());

        generator.stop_connector(1).await;
        assert!(!generator.connector_run_state(1).await.unwrap().is_running());
        // a scoped stop leaves the generator started
        assert!(generator.is_started().await);
        generator.stop().await;
    }

    #[tokio::test]
    async fn manual_start_and_stop_round_trip_with_measurements() {
        let station = build_station(StationSpec::default()).await;
        let transport = MockTransport::accepting();
        station.attach_transport(transport.clone()).await;

        let generator = station.transaction_generator().await;
        let outcome = generator.start_transaction(1).await.unwrap();
        let StartOutcome::Started(response) = outcome else {
            panic!("expected a started transaction");
        };
        assert!(response.id_tag_info.is_accepted());
        assert!(station.get_connector(1).await.unwrap().transaction_started);

        let outcome = generator.stop_transaction(1, None).await.unwrap();
        assert!(matches!(outcome, StopOutcome::Stopped(_)));
        assert!(!station.get_connector(1).await.unwrap().transaction_started);

        // stopping again is an explicit no-op, not an error
        let outcome = generator.stop_transaction(1, None).await.unwrap();
        assert!(matches!(outcome, StopOutcome::NoTransaction));
        assert_eq!(transport.calls_for("StopTransaction"), 1);

        let snapshot = station.statistics().snapshot().await;
        assert!(snapshot.contains_key(MEASURE_START_TRANSACTION));
        assert!(snapshot.contains_key(MEASURE_STOP_TRANSACTION));
    }
}
