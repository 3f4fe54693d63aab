//! OCPP request service
//!
//! Sits between station logic and the transport: serializes a typed request,
//! sends it as one OCPP Call and returns the typed response. Requests that
//! could not be delivered are buffered for retransmission unless the caller
//! opts out with `skip_buffering_on_error`. The convenience senders also
//! apply the response's side effects to the station's connector table, which
//! is why they take the station handle.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use ocpp_proto::messages::{
    AuthorizeRequest, AuthorizeResponse, BootNotificationRequest, BootNotificationResponse,
    HeartbeatRequest, HeartbeatResponse, OcppRequest, StartTransactionRequest,
    StartTransactionResponse, StatusNotificationRequest, StatusNotificationResponse,
    StopTransactionRequest, StopTransactionResponse,
};
use ocpp_proto::types::{ChargePointErrorCode, ChargePointStatus, StopReason};
use ocpp_proto::{OcppError, OcppResult};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::transport::OcppTransport;
use crate::ChargingStation;

/// Per-request behavior switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestParams {
    /// Leave error reporting to the caller instead of logging here
    pub throw_error: bool,
    /// Do not buffer the request for retransmission on delivery failure
    pub skip_buffering_on_error: bool,
}

impl RequestParams {
    pub fn throwing() -> Self {
        Self {
            throw_error: true,
            skip_buffering_on_error: false,
        }
    }
}

/// Typed request/response channel to the central system
pub struct OcppRequestService {
    transport: Arc<dyn OcppTransport>,
    buffered: Mutex<VecDeque<(String, Value)>>,
}

impl OcppRequestService {
    pub fn new(transport: Arc<dyn OcppTransport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            buffered: Mutex::new(VecDeque::new()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn close(&self) -> OcppResult<()> {
        self.transport.close().await
    }

    /// Send a typed request and return its typed response
    pub async fn request<R: OcppRequest>(
        &self,
        request: &R,
        params: RequestParams,
    ) -> OcppResult<R::Response> {
        let payload = serde_json::to_value(request)?;
        let response = self.request_raw(R::ACTION, payload, params).await?;
        Ok(serde_json::from_value(response)?)
    }

    /// Send an untyped request, used by the command bus forwarders
    pub async fn request_raw(
        &self,
        action: &str,
        payload: Value,
        params: RequestParams,
    ) -> OcppResult<Value> {
        self.flush_buffered().await;
        match self.transport.call(action, payload.clone()).await {
            Ok(response) => Ok(response),
            Err(err) => {
                let delivery_failure =
                    matches!(err, OcppError::Transport(_) | OcppError::NotConnected);
                if delivery_failure && !params.skip_buffering_on_error {
                    warn!(action, "buffering request after delivery failure");
                    self.buffered
                        .lock()
                        .await
                        .push_back((action.to_string(), payload));
                }
                if !params.throw_error {
                    error!(action, "request failed: {err}");
                }
                Err(err)
            }
        }
    }

    /// Replay buffered requests in order, stopping at the first failure
    async fn flush_buffered(&self) {
        loop {
            let next = self.buffered.lock().await.pop_front();
            let Some((action, payload)) = next else {
                return;
            };
            match self.transport.call(&action, payload.clone()).await {
                Ok(_) => debug!(action, "flushed buffered request"),
                Err(err) => {
                    warn!(action, "buffered request still undeliverable: {err}");
                    self.buffered.lock().await.push_front((action, payload));
                    return;
                }
            }
        }
    }

    /// Authorize `id_tag`; `connector_id` is carried for tracing only
    pub async fn authorize(
        &self,
        station: &Arc<ChargingStation>,
        connector_id: u32,
        id_tag: &str,
    ) -> OcppResult<AuthorizeResponse> {
        let request = AuthorizeRequest {
            id_tag: id_tag.to_string(),
        };
        let response: AuthorizeResponse = self.request(&request, RequestParams::default()).await?;
        debug!(
            station = station.hash_id(),
            connector_id,
            id_tag,
            status = ?response.id_tag_info.status,
            "authorize answered"
        );
        Ok(response)
    }

    /// Start a transaction; marks the connector on an accepted response
    pub async fn start_transaction(
        &self,
        station: &Arc<ChargingStation>,
        connector_id: u32,
        id_tag: Option<&str>,
    ) -> OcppResult<StartTransactionResponse> {
        let meter_start = station.connector_register(connector_id).await;
        let request = StartTransactionRequest {
            connector_id,
            id_tag: id_tag.unwrap_or_default().to_string(),
            meter_start,
            reservation_id: None,
            timestamp: Utc::now(),
        };
        let response: StartTransactionResponse =
            self.request(&request, RequestParams::default()).await?;
        if response.id_tag_info.is_accepted() {
            station
                .open_transaction(
                    connector_id,
                    response.transaction_id,
                    id_tag.map(str::to_string),
                )
                .await;
            station
                .start_meter_values_task(connector_id, response.transaction_id)
                .await;
            info!(
                station = station.hash_id(),
                connector_id,
                transaction_id = response.transaction_id,
                "transaction started"
            );
        } else {
            warn!(
                station = station.hash_id(),
                connector_id,
                status = ?response.id_tag_info.status,
                "transaction start rejected by the central system"
            );
        }
        Ok(response)
    }

    /// Stop a transaction; clears the owning connector afterwards
    pub async fn stop_transaction(
        &self,
        station: &Arc<ChargingStation>,
        transaction_id: i32,
        meter_stop: i32,
        id_tag: Option<String>,
        reason: Option<StopReason>,
    ) -> OcppResult<StopTransactionResponse> {
        let request = StopTransactionRequest {
            id_tag,
            meter_stop,
            timestamp: Utc::now(),
            transaction_id,
            reason,
            transaction_data: None,
        };
        let response: StopTransactionResponse =
            self.request(&request, RequestParams::default()).await?;
        station.close_transaction(transaction_id).await;
        info!(
            station = station.hash_id(),
            transaction_id, meter_stop, "transaction stopped"
        );
        Ok(response)
    }

    /// Send a BootNotification and apply the registration outcome
    pub async fn boot_notification(
        &self,
        station: &Arc<ChargingStation>,
        request: &BootNotificationRequest,
        params: RequestParams,
    ) -> OcppResult<BootNotificationResponse> {
        let response: BootNotificationResponse = self.request(request, params).await?;
        station.apply_boot_notification_response(&response).await;
        Ok(response)
    }

    pub async fn heartbeat(&self) -> OcppResult<HeartbeatResponse> {
        self.request(&HeartbeatRequest {}, RequestParams::default())
            .await
    }

    pub async fn status_notification(
        &self,
        connector_id: u32,
        status: ChargePointStatus,
    ) -> OcppResult<StatusNotificationResponse> {
        let request = StatusNotificationRequest {
            connector_id,
            error_code: ChargePointErrorCode::NoError,
            status,
            info: None,
            timestamp: Some(Utc::now()),
            vendor_id: None,
            vendor_error_code: None,
        };
        self.request(&request, RequestParams::default()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationTemplate;
    use crate::testing::MockTransport;
    use ocpp_proto::types::AuthorizationStatus;
    use serde_json::json;

    fn station_with_tags(tags: Vec<String>) -> Arc<ChargingStation> {
        let mut template = StationTemplate::named("CS-REQ");
        template.authorized_tags = tags;
        Arc::new(ChargingStation::new(
            "CS-REQ-001".to_string(),
            template,
            "ws://localhost:9999".to_string(),
        ))
    }

    #[tokio::test]
    async fn typed_request_round_trips() {
        let transport = MockTransport::accepting();
        let service = OcppRequestService::new(transport.clone());

        let response = service.heartbeat().await.unwrap();
        assert!(response.current_time.timestamp() > 0);
        assert_eq!(transport.calls_for("Heartbeat"), 1);
    }

    #[tokio::test]
    async fn accepted_start_marks_the_connector() {
        let station = station_with_tags(vec!["TAG-1".to_string()]);
        let transport = MockTransport::accepting();
        let service = OcppRequestService::new(transport.clone());

        let response = service
            .start_transaction(&station, 1, Some("TAG-1"))
            .await
            .unwrap();
        assert!(response.id_tag_info.is_accepted());

        let connector = station.get_connector(1).await.unwrap();
        assert!(connector.transaction_started);
        assert_eq!(connector.transaction_id, response.transaction_id);
        assert_eq!(connector.transaction_id_tag.as_deref(), Some("TAG-1"));

        service
            .stop_transaction(&station, response.transaction_id, 0, None, None)
            .await
            .unwrap();
        let connector = station.get_connector(1).await.unwrap();
        assert!(!connector.transaction_started);
        assert_eq!(connector.transaction_id, 0);
    }

    #[tokio::test]
    async fn rejected_start_leaves_the_connector_idle() {
        let station = station_with_tags(vec!["TAG-1".to_string()]);
        let transport = MockTransport::new(|action, _| match action {
            "StartTransaction" => Ok(json!({
                "idTagInfo": {"status": "Blocked"},
                "transactionId": 9
            })),
            _ => Ok(json!({})),
        });
        let service = OcppRequestService::new(transport);

        let response = service
            .start_transaction(&station, 1, Some("TAG-1"))
            .await
            .unwrap();
        assert_eq!(response.id_tag_info.status, AuthorizationStatus::Blocked);
        assert!(!station.get_connector(1).await.unwrap().transaction_started);
    }

    #[tokio::test]
    async fn delivery_failures_are_buffered_and_replayed() {
        let transport = MockTransport::accepting();
        transport.set_connected(false);
        let service = OcppRequestService::new(transport.clone());

        let err = service
            .request_raw("Heartbeat", json!({}), RequestParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, OcppError::NotConnected));

        // once the link is back, the buffered request goes out before the new one
        transport.set_connected(true);
        service
            .request_raw("StatusNotification", json!({}), RequestParams::default())
            .await
            .unwrap();
        let actions: Vec<String> = transport
            .recorded()
            .into_iter()
            .map(|(action, _)| action)
            .collect();
        assert_eq!(actions, vec!["Heartbeat", "StatusNotification"]);
    }

    #[tokio::test]
    async fn skip_buffering_drops_undeliverable_requests() {
        let transport = MockTransport::accepting();
        transport.set_connected(false);
        let service = OcppRequestService::new(transport.clone());

        let params = RequestParams {
            throw_error: true,
            skip_buffering_on_error: true,
        };
        assert!(service
            .request_raw("BootNotification", json!({}), params)
            .await
            .is_err());

        transport.set_connected(true);
        service.heartbeat().await.unwrap();
        assert_eq!(transport.calls_for("BootNotification"), 0);
    }
}
