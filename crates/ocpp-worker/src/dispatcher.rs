//! Command dispatcher
//!
//! One dispatcher per station subscribes to the worker channel, validates
//! and targets incoming request envelopes, runs the matching handler and
//! publishes exactly one response envelope per accepted request. Malformed,
//! response-shaped or mistargeted messages are dropped without a reply.

use std::sync::Arc;

use ocpp_proto::messages::BootNotificationResponse;
use ocpp_proto::{OcppError, OcppResult};
use ocpp_station::request::{OcppRequestService, RequestParams};
use ocpp_station::ChargingStation;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::classifier::classify;
use crate::envelope::{
    ProcedureName, RequestEnvelope, RequestPayload, ResponseEnvelope, ResponsePayload,
    ResponseStatus,
};
use crate::WorkerChannel;

/// Per-station command dispatcher
pub struct CommandDispatcher {
    station: Arc<ChargingStation>,
    channel: WorkerChannel,
}

impl CommandDispatcher {
    pub fn new(station: Arc<ChargingStation>, channel: WorkerChannel) -> Arc<Self> {
        Arc::new(Self { station, channel })
    }

    /// Consume channel messages until the channel closes
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        let mut receiver = dispatcher.channel.subscribe();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => dispatcher.handle_message(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(
                            station = dispatcher.station.hash_id(),
                            skipped, "worker channel lagged, messages were lost"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Validate one raw channel message and dispatch it if it is ours
    pub async fn handle_message(&self, message: Value) {
        // responses loop back to every subscriber; never re-handle them
        if serde_json::from_value::<ResponseEnvelope>(message.clone()).is_ok() {
            return;
        }
        let envelope: RequestEnvelope = match serde_json::from_value(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                error!(
                    station = self.station.hash_id(),
                    "dropping malformed worker channel message: {e}"
                );
                return;
            }
        };
        if !envelope.payload.is_addressed_to(self.station.hash_id()) {
            return;
        }
        if envelope.payload.hash_id.is_some() {
            error!(
                station = self.station.hash_id(),
                uuid = %envelope.uuid,
                "dropping worker channel message using the deprecated 'hashId' targeting"
            );
            return;
        }
        self.dispatch(envelope).await;
    }

    /// Run the command and publish its response envelope
    ///
    /// Every path below funnels into the single publish at the end, which is
    /// what guarantees exactly one response per accepted request.
    async fn dispatch(&self, envelope: RequestEnvelope) {
        let RequestEnvelope {
            uuid,
            command,
            mut payload,
        } = envelope;
        let hash_id = self.station.hash_id().to_string();
        let procedure = ProcedureName::parse(&command);
        payload.strip_targeting(
            procedure.is_some_and(|procedure| procedure.is_generator_procedure()),
        );

        let response_payload = match procedure {
            None => {
                let error = OcppError::Internal(format!(
                    "Unknown worker broadcast channel command: '{command}'"
                ));
                error!(station = %hash_id, uuid = %uuid, "{error}");
                ResponsePayload::error_failure(hash_id, &command, payload, &error)
            }
            Some(procedure) => {
                // a null response counts as empty, like no response at all
                let outcome = self
                    .run_command(procedure, &payload)
                    .await
                    .map(|response| response.filter(|value| !value.is_null()));
                match outcome {
                    Ok(None) => ResponsePayload::success(hash_id),
                    Ok(Some(response)) => match classify(procedure, &response) {
                        ResponseStatus::Success => ResponsePayload::success(hash_id),
                        ResponseStatus::Failure => ResponsePayload::semantic_failure(
                            hash_id,
                            procedure.as_str(),
                            payload,
                            response,
                        ),
                    },
                    Err(error) => {
                        error!(
                            station = %hash_id,
                            uuid = %uuid,
                            command = procedure.as_str(),
                            "command failed: {error}"
                        );
                        ResponsePayload::error_failure(hash_id, procedure.as_str(), payload, &error)
                    }
                }
            }
        };

        self.channel.post_response(&ResponseEnvelope {
            uuid,
            payload: response_payload,
        });
    }

    /// Handler table; `Ok(None)` means an empty response, reported as success
    async fn run_command(
        &self,
        command: ProcedureName,
        payload: &RequestPayload,
    ) -> OcppResult<Option<Value>> {
        debug!(
            station = self.station.hash_id(),
            command = command.as_str(),
            "running command"
        );
        match command {
            ProcedureName::StartChargingStation => {
                self.station.start().await?;
                Ok(None)
            }
            ProcedureName::StopChargingStation => {
                self.station.stop().await?;
                Ok(None)
            }
            ProcedureName::DeleteChargingStations => {
                self.station
                    .delete(payload.delete_configuration.unwrap_or(false))
                    .await?;
                Ok(None)
            }
            ProcedureName::OpenConnection => {
                self.station.open_ws_connection().await?;
                Ok(None)
            }
            ProcedureName::CloseConnection => {
                self.station.close_ws_connection().await?;
                Ok(None)
            }
            ProcedureName::SetSupervisionUrl => {
                let url = payload
                    .url
                    .clone()
                    .ok_or_else(|| missing_field("url"))?;
                self.station.set_supervision_url(url).await;
                Ok(None)
            }
            ProcedureName::StartAutomaticTransactionGenerator => {
                self.station
                    .start_automatic_transaction_generator(payload.connector_ids.clone())
                    .await;
                Ok(None)
            }
            ProcedureName::StopAutomaticTransactionGenerator => {
                self.station
                    .stop_automatic_transaction_generator(payload.connector_ids.clone())
                    .await;
                Ok(None)
            }
            ProcedureName::BootNotification => {
                let service = self.service().await?;
                let defaults = serde_json::to_value(self.station.boot_notification_request())?;
                let body = merge_defaults(defaults, payload.to_ocpp_payload());
                let response = service
                    .request_raw(
                        "BootNotification",
                        body,
                        RequestParams {
                            throw_error: true,
                            skip_buffering_on_error: true,
                        },
                    )
                    .await?;
                if let Ok(parsed) =
                    serde_json::from_value::<BootNotificationResponse>(response.clone())
                {
                    self.station.apply_boot_notification_response(&parsed).await;
                }
                Ok(Some(response))
            }
            ProcedureName::StartTransaction => {
                let service = self.service().await?;
                let connector_id = payload
                    .connector_id
                    .ok_or_else(|| missing_field("connectorId"))?;
                let id_tag = payload.extra_str("idTag").map(str::to_string);
                let response = service
                    .start_transaction(&self.station, connector_id, id_tag.as_deref())
                    .await?;
                Ok(Some(serde_json::to_value(response)?))
            }
            ProcedureName::StopTransaction => {
                let service = self.service().await?;
                let transaction_id = payload
                    .transaction_id
                    .ok_or_else(|| missing_field("transactionId"))?;
                let meter_stop = self
                    .station
                    .get_energy_active_import_register_by_transaction_id(transaction_id, true)
                    .await
                    .unwrap_or(0);
                let id_tag = match payload.extra_str("idTag") {
                    Some(tag) => Some(tag.to_string()),
                    None => self.station.get_transaction_id_tag(transaction_id).await,
                };
                let reason = payload
                    .extra
                    .get("reason")
                    .cloned()
                    .and_then(|value| serde_json::from_value(value).ok());
                let response = service
                    .stop_transaction(&self.station, transaction_id, meter_stop, id_tag, reason)
                    .await?;
                Ok(Some(serde_json::to_value(response)?))
            }
            ProcedureName::Authorize => {
                let service = self.service().await?;
                let id_tag = payload
                    .extra_str("idTag")
                    .ok_or_else(|| missing_field("idTag"))?
                    .to_string();
                let connector_id = payload.connector_id.unwrap_or(0);
                let response = service
                    .authorize(&self.station, connector_id, &id_tag)
                    .await?;
                Ok(Some(serde_json::to_value(response)?))
            }
            ProcedureName::MeterValues => {
                let service = self.service().await?;
                let connector_id = payload
                    .connector_id
                    .ok_or_else(|| missing_field("connectorId"))?;
                let sample = self
                    .station
                    .sample_meter_values(connector_id)
                    .await
                    .ok_or_else(|| {
                        OcppError::Internal(format!("unknown connector {connector_id}"))
                    })?;
                debug!(
                    station = self.station.hash_id(),
                    connector_id,
                    interval_ms = self
                        .station
                        .station_info()
                        .meter_value_sample_interval()
                        .as_millis() as u64,
                    "built meter value sample"
                );
                let mut body = json!({
                    "connectorId": connector_id,
                    "meterValue": [sample],
                });
                if let Some(transaction_id) =
                    self.station.active_transaction_id(connector_id).await
                {
                    body["transactionId"] = json!(transaction_id);
                }
                let body = merge_defaults(body, payload.to_ocpp_payload());
                let response = service
                    .request_raw("MeterValues", body, RequestParams::throwing())
                    .await?;
                Ok(Some(response))
            }
            ProcedureName::Heartbeat
            | ProcedureName::StatusNotification
            | ProcedureName::DataTransfer
            | ProcedureName::DiagnosticsStatusNotification
            | ProcedureName::FirmwareStatusNotification => {
                let service = self.service().await?;
                let action = command.ocpp_action().ok_or_else(|| {
                    OcppError::Internal(format!(
                        "procedure '{}' does not forward to an OCPP action",
                        command.as_str()
                    ))
                })?;
                let response = service
                    .request_raw(action, payload.to_ocpp_payload(), RequestParams::throwing())
                    .await?;
                Ok(Some(response))
            }
        }
    }

    async fn service(&self) -> OcppResult<Arc<OcppRequestService>> {
        self.station
            .request_service()
            .await
            .ok_or(OcppError::NotConnected)
    }
}

fn missing_field(field: &str) -> OcppError {
    OcppError::Internal(format!("missing '{field}' in the request payload"))
}

/// Object merge where `overrides` wins over `defaults`
fn merge_defaults(defaults: Value, overrides: Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, overrides) => overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ResponseStatus;
    use crate::testing::MockTransport;
    use ocpp_station::config::StationTemplate;
    use serde_json::json;
    use tokio::sync::broadcast::Receiver;
    use tokio::time::{timeout, Duration};

    struct Harness {
        station: Arc<ChargingStation>,
        dispatcher: Arc<CommandDispatcher>,
        channel: WorkerChannel,
        transport: Arc<MockTransport>,
    }

    async fn harness(hash_id: &str) -> Harness {
        let mut template = StationTemplate::named("CS-BUS");
        template.authorized_tags = vec!["TAG-1".to_string()];
        let station = Arc::new(ChargingStation::new(
            hash_id.to_string(),
            template,
            "ws://localhost:9999/ocpp".to_string(),
        ));
        let transport = MockTransport::accepting();
        station.attach_transport(transport.clone()).await;
        let channel = WorkerChannel::new(64);
        let dispatcher = CommandDispatcher::new(Arc::clone(&station), channel.clone());
        Harness {
            station,
            dispatcher,
            channel,
            transport,
        }
    }

    async fn next_response(receiver: &mut Receiver<Value>) -> ResponseEnvelope {
        loop {
            let message = timeout(Duration::from_secs(5), receiver.recv())
                .await
                .expect("no response before timeout")
                .expect("channel closed");
            if let Ok(envelope) = serde_json::from_value::<ResponseEnvelope>(message) {
                return envelope;
            }
        }
    }

    fn request(uuid: &str, command: &str, payload: Value) -> Value {
        json!([uuid, command, payload])
    }

    #[tokio::test]
    async fn heartbeat_success_round_trip() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-1", "Heartbeat", json!({})))
            .await;

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.uuid, "u-1");
        assert_eq!(envelope.payload.hash_id, "A");
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
        assert!(envelope.payload.command.is_none());
        assert_eq!(h.transport.calls_for("Heartbeat"), 1);
    }

    #[tokio::test]
    async fn semantic_failure_carries_the_command_response() {
        let h = harness("A").await;
        let transport = MockTransport::new(|action, _| match action {
            "BootNotification" => Ok(json!({
                "status": "Rejected",
                "interval": 60,
                "currentTime": "2024-06-01T00:00:00Z"
            })),
            _ => Ok(json!({})),
        });
        h.station.attach_transport(transport).await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-2", "BootNotification", json!({})))
            .await;

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.uuid, "u-2");
        assert_eq!(envelope.payload.status, ResponseStatus::Failure);
        assert_eq!(envelope.payload.command.as_deref(), Some("BootNotification"));
        assert_eq!(
            envelope.payload.request_payload,
            Some(RequestPayload::default())
        );
        let command_response = envelope.payload.command_response.unwrap();
        assert_eq!(command_response["status"], "Rejected");
        assert!(envelope.payload.error_message.is_none());
        // a rejected registration must not mark the station registered
        assert!(!h.station.is_registered().await);
    }

    #[tokio::test]
    async fn thrown_failure_carries_the_error_details() {
        let h = harness("A").await;
        let transport = MockTransport::new(|action, _| match action {
            "Authorize" => Err(OcppError::call(
                ocpp_proto::CallErrorCode::GenericError,
                "timeout",
                Some(json!({"code": "NetworkError"})),
            )),
            _ => Ok(json!({})),
        });
        h.station.attach_transport(transport).await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-3", "Authorize", json!({"idTag": "TAG-1"})))
            .await;

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.uuid, "u-3");
        assert_eq!(envelope.payload.status, ResponseStatus::Failure);
        assert_eq!(envelope.payload.error_message.as_deref(), Some("timeout"));
        assert_eq!(
            envelope.payload.error_details.as_ref().unwrap()["code"],
            "NetworkError"
        );
        assert!(envelope.payload.error_stack.is_some());
        assert!(envelope.payload.command_response.is_none());
    }

    #[tokio::test]
    async fn unknown_command_fails_with_a_response() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-4", "NoSuchCommand", json!({})))
            .await;

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.uuid, "u-4");
        assert_eq!(envelope.payload.status, ResponseStatus::Failure);
        assert!(envelope
            .payload
            .error_message
            .as_deref()
            .unwrap()
            .contains("Unknown worker broadcast channel command: 'NoSuchCommand'"));
    }

    #[tokio::test]
    async fn mistargeted_and_legacy_messages_get_no_response() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request(
                "u-5",
                "Heartbeat",
                json!({"hashIds": ["B", "C"]}),
            ))
            .await;
        h.dispatcher
            .handle_message(request("u-6", "Heartbeat", json!({"hashId": "A"})))
            .await;
        h.dispatcher
            .handle_message(json!({"not": "an envelope"}))
            .await;

        // none of the above may produce a response or a side effect
        assert_eq!(h.transport.calls_for("Heartbeat"), 0);
        assert!(
            timeout(Duration::from_millis(100), responses.recv())
                .await
                .is_err(),
            "no envelope may be published"
        );
    }

    #[tokio::test]
    async fn empty_hash_ids_address_every_station() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-7", "Heartbeat", json!({"hashIds": []})))
            .await;

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
    }

    #[tokio::test]
    async fn exactly_one_response_per_request() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-8", "Heartbeat", json!({})))
            .await;

        let first = next_response(&mut responses).await;
        assert_eq!(first.uuid, "u-8");
        assert!(
            timeout(Duration::from_millis(100), responses.recv())
                .await
                .is_err(),
            "a second envelope must not appear"
        );
    }

    #[tokio::test]
    async fn start_transaction_command_marks_the_connector() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request(
                "u-9",
                "StartTransaction",
                json!({"connectorId": 1, "idTag": "TAG-1"}),
            ))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);

        let connector = h.station.get_connector(1).await.unwrap();
        assert!(connector.transaction_started);
        let transaction_id = connector.transaction_id;

        h.dispatcher
            .handle_message(request(
                "u-10",
                "StopTransaction",
                json!({"transactionId": transaction_id}),
            ))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
        assert!(!h.station.get_connector(1).await.unwrap().transaction_started);

        // the forwarded StopTransaction carried the synthesized meterStop
        let stop_payload = h
            .transport
            .recorded()
            .into_iter()
            .find(|(action, _)| action == "StopTransaction")
            .map(|(_, payload)| payload)
            .unwrap();
        assert!(stop_payload.get("meterStop").is_some());
    }

    #[tokio::test]
    async fn meter_values_command_builds_a_sample() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        h.dispatcher
            .handle_message(request("u-11", "MeterValues", json!({"connectorId": 1})))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);

        let meter_payload = h
            .transport
            .recorded()
            .into_iter()
            .find(|(action, _)| action == "MeterValues")
            .map(|(_, payload)| payload)
            .unwrap();
        assert_eq!(meter_payload["connectorId"], 1);
        let sample = &meter_payload["meterValue"][0]["sampledValue"][0];
        assert_eq!(sample["measurand"], "Energy.Active.Import.Register");
        assert_eq!(sample["unit"], "Wh");
    }

    #[tokio::test]
    async fn generator_commands_keep_their_connector_scope() {
        let h = harness("A").await;
        let mut responses = h.channel.subscribe();

        // register through the real command path first
        h.dispatcher
            .handle_message(request("u-boot", "BootNotification", json!({})))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
        assert!(h.station.is_registered().await);

        h.dispatcher
            .handle_message(request(
                "u-12",
                "StartAutomaticTransactionGenerator",
                json!({"connectorIds": [1]}),
            ))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);

        let generator = h.station.transaction_generator().await;
        assert!(generator.is_started().await);
        assert!(generator.connector_run_state(1).await.unwrap().is_running());
        assert!(generator.connector_run_state(2).await.is_none());

        h.dispatcher
            .handle_message(request(
                "u-13",
                "StopAutomaticTransactionGenerator",
                json!({}),
            ))
            .await;
        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
        assert!(!generator.is_started().await);
    }

    #[tokio::test]
    async fn spawned_dispatcher_answers_posted_requests() {
        let h = harness("A").await;
        let _worker = h.dispatcher.spawn();
        let mut responses = h.channel.subscribe();

        h.channel.post_request(&RequestEnvelope {
            uuid: "u-14".to_string(),
            command: "Heartbeat".to_string(),
            payload: RequestPayload::default(),
        });

        let envelope = next_response(&mut responses).await;
        assert_eq!(envelope.uuid, "u-14");
        assert_eq!(envelope.payload.status, ResponseStatus::Success);
    }
}
