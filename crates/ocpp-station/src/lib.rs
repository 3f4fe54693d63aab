//! # Simulated OCPP 1.6J Charging Station
//!
//! One [`ChargingStation`] impersonates a charge point against a real
//! central system: it owns the connector table, the WebSocket lifecycle, the
//! registration state and the OCPP request service, and hosts the automatic
//! transaction generator that synthesizes charging sessions.

pub mod atg;
pub mod config;
pub mod connector;
pub mod random;
pub mod request;
pub mod statistics;
pub mod transport;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use ocpp_proto::messages::{
    BootNotificationRequest, BootNotificationResponse, MeterValuesRequest,
};
use ocpp_proto::types::{
    ChargePointStatus, Measurand, MeterValue, ReadingContext, RegistrationStatus, SampledValue,
    UnitOfMeasure,
};
use ocpp_proto::{OcppError, OcppResult};
use rand::Rng;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

use crate::atg::AutomaticTransactionGenerator;
use crate::config::StationTemplate;
use crate::connector::ConnectorStatus;
use crate::request::{OcppRequestService, RequestParams};
use crate::statistics::PerformanceStatistics;
use crate::transport::{OcppTransport, WsTransport};

/// One simulated charging station
pub struct ChargingStation {
    hash_id: String,
    station_info: StationTemplate,
    boot_notification_request: BootNotificationRequest,
    supervision_url: RwLock<String>,
    /// Connector table; id 0 is the station itself and never transacts
    connectors: RwLock<BTreeMap<u32, ConnectorStatus>>,
    authorized_tags: Vec<String>,
    registration: RwLock<RegistrationStatus>,
    /// Present only while the WebSocket is open
    request_service: RwLock<Option<Arc<OcppRequestService>>>,
    statistics: Arc<PerformanceStatistics>,
    transaction_generator: RwLock<Option<Arc<AutomaticTransactionGenerator>>>,
    heartbeat: RwLock<Option<JoinHandle<()>>>,
    /// Periodic MeterValues senders, one per charging connector
    meter_value_tasks: RwLock<HashMap<u32, JoinHandle<()>>>,
    started: RwLock<bool>,
}

impl ChargingStation {
    pub fn new(hash_id: String, station_info: StationTemplate, supervision_url: String) -> Self {
        let mut connectors = BTreeMap::new();
        for id in 0..=station_info.connector_count {
            connectors.insert(id, ConnectorStatus::new());
        }
        let boot_notification_request = station_info.boot_notification_request(&hash_id);
        let authorized_tags = station_info.authorized_tags.clone();
        Self {
            hash_id,
            station_info,
            boot_notification_request,
            supervision_url: RwLock::new(supervision_url),
            connectors: RwLock::new(connectors),
            authorized_tags,
            registration: RwLock::new(RegistrationStatus::Rejected),
            request_service: RwLock::new(None),
            statistics: Arc::new(PerformanceStatistics::new()),
            transaction_generator: RwLock::new(None),
            heartbeat: RwLock::new(None),
            meter_value_tasks: RwLock::new(HashMap::new()),
            started: RwLock::new(false),
        }
    }

    pub fn hash_id(&self) -> &str {
        &self.hash_id
    }

    pub fn station_info(&self) -> &StationTemplate {
        &self.station_info
    }

    pub fn boot_notification_request(&self) -> &BootNotificationRequest {
        &self.boot_notification_request
    }

    pub fn statistics(&self) -> Arc<PerformanceStatistics> {
        Arc::clone(&self.statistics)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open the connection, register with the central system and announce
    /// the connectors
    pub async fn start(self: &Arc<Self>) -> OcppResult<()> {
        if *self.started.read().await {
            warn!(station = %self.hash_id, "charging station already started");
            return Ok(());
        }
        self.open_ws_connection().await?;
        let service = self
            .request_service()
            .await
            .ok_or(OcppError::NotConnected)?;
        service
            .boot_notification(
                self,
                &self.boot_notification_request,
                RequestParams {
                    throw_error: true,
                    skip_buffering_on_error: true,
                },
            )
            .await?;
        for id in self.connector_ids().await {
            if id == 0 {
                continue;
            }
            if let Err(e) = service
                .status_notification(id, ChargePointStatus::Available)
                .await
            {
                warn!(station = %self.hash_id, connector_id = id, "initial status notification failed: {e}");
            }
        }
        *self.started.write().await = true;
        info!(station = %self.hash_id, "charging station started");
        Ok(())
    }

    /// Stop the generator, the heartbeat and the connection
    pub async fn stop(&self) -> OcppResult<()> {
        if !*self.started.read().await {
            warn!(station = %self.hash_id, "charging station already stopped");
            return Ok(());
        }
        if let Some(generator) = self.transaction_generator.read().await.clone() {
            if generator.is_started().await {
                generator.stop().await;
            }
        }
        if let Some(handle) = self.heartbeat.write().await.take() {
            handle.abort();
        }
        for (_, handle) in self.meter_value_tasks.write().await.drain() {
            handle.abort();
        }
        if let Some(service) = self.request_service().await {
            for id in self.connector_ids().await {
                if id == 0 {
                    continue;
                }
                // best effort; the socket may already be half closed
                let _ = service
                    .status_notification(id, ChargePointStatus::Unavailable)
                    .await;
            }
        }
        self.close_ws_connection().await?;
        *self.registration.write().await = RegistrationStatus::Rejected;
        *self.started.write().await = false;
        info!(station = %self.hash_id, "charging station stopped");
        Ok(())
    }

    /// Stop and discard the station's runtime state
    pub async fn delete(&self, delete_configuration: bool) -> OcppResult<()> {
        self.stop().await?;
        self.connectors.write().await.clear();
        info!(station = %self.hash_id, delete_configuration, "charging station deleted");
        Ok(())
    }

    /// Open the WebSocket and bring up the request service
    pub async fn open_ws_connection(&self) -> OcppResult<()> {
        if self.request_service().await.is_some() {
            warn!(station = %self.hash_id, "websocket connection already open");
            return Ok(());
        }
        let url = self.supervision_url.read().await.clone();
        let transport = WsTransport::connect(&url, WsTransport::DEFAULT_CALL_TIMEOUT).await?;
        self.attach_transport(transport).await;
        Ok(())
    }

    /// Tear down the request service and close the socket
    pub async fn close_ws_connection(&self) -> OcppResult<()> {
        let service = self.request_service.write().await.take();
        match service {
            Some(service) => {
                if let Err(e) = service.close().await {
                    warn!(station = %self.hash_id, "websocket close failed: {e}");
                }
            }
            None => warn!(station = %self.hash_id, "websocket connection already closed"),
        }
        Ok(())
    }

    /// Install the request service on top of an already connected transport
    pub async fn attach_transport(&self, transport: Arc<dyn OcppTransport>) {
        *self.request_service.write().await = Some(OcppRequestService::new(transport));
    }

    pub async fn set_supervision_url(&self, url: String) {
        info!(station = %self.hash_id, url = %url, "supervision url updated");
        *self.supervision_url.write().await = url;
    }

    pub async fn supervision_url(&self) -> String {
        self.supervision_url.read().await.clone()
    }

    /// The request service, present only while the socket is open
    pub async fn request_service(&self) -> Option<Arc<OcppRequestService>> {
        self.request_service.read().await.clone()
    }

    /// Record the registration outcome and (re)start the heartbeat
    pub async fn apply_boot_notification_response(
        self: &Arc<Self>,
        response: &BootNotificationResponse,
    ) {
        *self.registration.write().await = response.status;
        match response.status {
            RegistrationStatus::Accepted => {
                info!(
                    station = %self.hash_id,
                    interval = response.interval,
                    "registered with the central system"
                );
                self.start_heartbeat(response.interval).await;
            }
            RegistrationStatus::Pending => {
                warn!(station = %self.hash_id, "registration pending");
            }
            RegistrationStatus::Rejected => {
                error!(station = %self.hash_id, "registration rejected");
            }
        }
    }

    async fn start_heartbeat(self: &Arc<Self>, interval_seconds: i32) {
        let interval = Duration::from_secs(interval_seconds.max(1) as u64);
        let station = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(service) = station.request_service().await else {
                    break;
                };
                if let Err(e) = service.heartbeat().await {
                    error!(station = %station.hash_id, "heartbeat failed: {e}");
                }
            }
        });
        if let Some(previous) = self.heartbeat.write().await.replace(handle) {
            previous.abort();
        }
    }

    // ------------------------------------------------------------------
    // Automatic transaction generator
    // ------------------------------------------------------------------

    /// The station's transaction generator, created on first use
    pub async fn transaction_generator(self: &Arc<Self>) -> Arc<AutomaticTransactionGenerator> {
        if let Some(generator) = self.transaction_generator.read().await.clone() {
            return generator;
        }
        let mut guard = self.transaction_generator.write().await;
        if let Some(generator) = guard.clone() {
            return generator;
        }
        let generator = AutomaticTransactionGenerator::new(Arc::clone(self));
        *guard = Some(Arc::clone(&generator));
        generator
    }

    pub async fn start_automatic_transaction_generator(
        self: &Arc<Self>,
        connector_ids: Option<Vec<u32>>,
    ) {
        let generator = self.transaction_generator().await;
        match connector_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                for id in ids {
                    generator.start_connector(id).await;
                }
            }
            None => generator.start().await,
        }
    }

    pub async fn stop_automatic_transaction_generator(&self, connector_ids: Option<Vec<u32>>) {
        let Some(generator) = self.transaction_generator.read().await.clone() else {
            warn!(station = %self.hash_id, "transaction generator was never started");
            return;
        };
        match connector_ids.filter(|ids| !ids.is_empty()) {
            Some(ids) => {
                for id in ids {
                    generator.stop_connector(id).await;
                }
            }
            None => generator.stop().await,
        }
    }

    pub fn get_automatic_transaction_generator_require_authorize(&self) -> bool {
        self.station_info
            .automatic_transaction_generator
            .require_authorize
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn is_registered(&self) -> bool {
        *self.registration.read().await == RegistrationStatus::Accepted
    }

    /// Station-level availability, carried by connector 0
    pub async fn is_charging_station_available(&self) -> bool {
        self.connectors
            .read()
            .await
            .get(&0)
            .is_some_and(|c| c.available)
    }

    pub async fn is_connector_available(&self, connector_id: u32) -> bool {
        self.connectors
            .read()
            .await
            .get(&connector_id)
            .is_some_and(|c| c.available)
    }

    pub fn has_authorized_tags(&self) -> bool {
        !self.authorized_tags.is_empty()
    }

    pub fn get_random_id_tag(&self) -> Option<String> {
        if self.authorized_tags.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.authorized_tags.len());
        Some(self.authorized_tags[index].clone())
    }

    pub async fn get_connector(&self, connector_id: u32) -> Option<ConnectorStatus> {
        self.connectors.read().await.get(&connector_id).cloned()
    }

    pub async fn connector_ids(&self) -> Vec<u32> {
        self.connectors.read().await.keys().copied().collect()
    }

    pub async fn set_connector_availability(&self, connector_id: u32, available: bool) {
        if let Some(connector) = self.connectors.write().await.get_mut(&connector_id) {
            connector.available = available;
        }
    }

    /// Committed register of one connector, in Wh
    pub(crate) async fn connector_register(&self, connector_id: u32) -> i32 {
        self.connectors
            .read()
            .await
            .get(&connector_id)
            .map(|c| c.energy_active_import_register)
            .unwrap_or(0)
    }

    /// Energy register of the connector running `transaction_id`
    ///
    /// With `final_reading` the in-flight accrual of the transaction is
    /// included, which is what a StopTransaction's `meterStop` wants.
    pub async fn get_energy_active_import_register_by_transaction_id(
        &self,
        transaction_id: i32,
        final_reading: bool,
    ) -> Option<i32> {
        let connectors = self.connectors.read().await;
        let connector = connectors
            .values()
            .find(|c| c.transaction_started && c.transaction_id == transaction_id)?;
        if final_reading {
            Some(connector.sampled_register_wh(self.station_info.charging_power_w, Utc::now()))
        } else {
            Some(connector.energy_active_import_register)
        }
    }

    pub async fn get_transaction_id_tag(&self, transaction_id: i32) -> Option<String> {
        self.connectors
            .read()
            .await
            .values()
            .find(|c| c.transaction_started && c.transaction_id == transaction_id)
            .and_then(|c| c.transaction_id_tag.clone())
    }

    /// Transaction currently open on `connector_id`, if any
    pub async fn active_transaction_id(&self, connector_id: u32) -> Option<i32> {
        self.connectors
            .read()
            .await
            .get(&connector_id)
            .filter(|c| c.transaction_started)
            .map(|c| c.transaction_id)
    }

    /// One periodic energy sample for `connector_id`
    pub async fn sample_meter_values(&self, connector_id: u32) -> Option<MeterValue> {
        let now = Utc::now();
        let connectors = self.connectors.read().await;
        let connector = connectors.get(&connector_id)?;
        let register = connector.sampled_register_wh(self.station_info.charging_power_w, now);
        Some(MeterValue {
            timestamp: now,
            sampled_value: vec![SampledValue {
                value: register.to_string(),
                context: Some(ReadingContext::SamplePeriodic),
                measurand: Some(Measurand::EnergyActiveImportRegister),
                unit: Some(UnitOfMeasure::Wh),
            }],
        })
    }

    // ------------------------------------------------------------------
    // Connector mutation, driven by OCPP responses
    // ------------------------------------------------------------------

    /// Send a MeterValues sample every configured interval while the
    /// transaction stays open
    pub(crate) async fn start_meter_values_task(
        self: &Arc<Self>,
        connector_id: u32,
        transaction_id: i32,
    ) {
        let interval = self.station_info.meter_value_sample_interval();
        let station = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                sleep(interval).await;
                let Some(service) = station.request_service().await else {
                    break;
                };
                let Some(sample) = station.sample_meter_values(connector_id).await else {
                    break;
                };
                let request = MeterValuesRequest {
                    connector_id,
                    transaction_id: Some(transaction_id),
                    meter_value: vec![sample],
                };
                if let Err(e) = service.request(&request, RequestParams::default()).await {
                    error!(
                        station = %station.hash_id,
                        connector_id, "periodic meter values failed: {e}"
                    );
                }
            }
        });
        if let Some(previous) = self
            .meter_value_tasks
            .write()
            .await
            .insert(connector_id, handle)
        {
            previous.abort();
        }
    }

    async fn stop_meter_values_task(&self, connector_id: u32) {
        if let Some(handle) = self.meter_value_tasks.write().await.remove(&connector_id) {
            handle.abort();
        }
    }

    pub(crate) async fn open_transaction(
        &self,
        connector_id: u32,
        transaction_id: i32,
        id_tag: Option<String>,
    ) {
        let mut connectors = self.connectors.write().await;
        match connectors.get_mut(&connector_id) {
            Some(connector) => {
                if connector.transaction_started {
                    warn!(
                        station = %self.hash_id,
                        connector_id,
                        "connector already has an open transaction"
                    );
                }
                connector.begin_transaction(transaction_id, id_tag);
            }
            None => warn!(station = %self.hash_id, connector_id, "unknown connector"),
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_registered(&self, registered: bool) {
        *self.registration.write().await = if registered {
            RegistrationStatus::Accepted
        } else {
            RegistrationStatus::Rejected
        };
    }

    pub(crate) async fn close_transaction(&self, transaction_id: i32) {
        let power = self.station_info.charging_power_w;
        let now = Utc::now();
        let connector_id = {
            let mut connectors = self.connectors.write().await;
            let Some((id, connector)) = connectors
                .iter_mut()
                .find(|(_, c)| c.transaction_started && c.transaction_id == transaction_id)
            else {
                warn!(station = %self.hash_id, transaction_id, "no connector owns this transaction");
                return;
            };
            let accrued = connector.accrued_energy_wh(power, now);
            connector.end_transaction(accrued);
            *id
        };
        self.stop_meter_values_task(connector_id).await;
    }
}
