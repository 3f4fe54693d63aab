//! Command channel envelopes
//!
//! Requests travel as `[uuid, command, payload]` and responses as
//! `[uuid, payload]` JSON arrays; the differing arities keep the two shapes
//! apart. The command stays a plain string until dispatch so that an unknown
//! procedure can still be answered with a failure envelope bearing it.

use ocpp_proto::OcppError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Commands understood by a station worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureName {
    StartChargingStation,
    StopChargingStation,
    DeleteChargingStations,
    OpenConnection,
    CloseConnection,
    StartAutomaticTransactionGenerator,
    StopAutomaticTransactionGenerator,
    SetSupervisionUrl,
    StartTransaction,
    StopTransaction,
    Authorize,
    BootNotification,
    StatusNotification,
    Heartbeat,
    MeterValues,
    DataTransfer,
    DiagnosticsStatusNotification,
    FirmwareStatusNotification,
}

impl ProcedureName {
    pub fn parse(name: &str) -> Option<Self> {
        serde_json::from_value(Value::String(name.to_string())).ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcedureName::StartChargingStation => "StartChargingStation",
            ProcedureName::StopChargingStation => "StopChargingStation",
            ProcedureName::DeleteChargingStations => "DeleteChargingStations",
            ProcedureName::OpenConnection => "OpenConnection",
            ProcedureName::CloseConnection => "CloseConnection",
            ProcedureName::StartAutomaticTransactionGenerator => {
                "StartAutomaticTransactionGenerator"
            }
            ProcedureName::StopAutomaticTransactionGenerator => {
                "StopAutomaticTransactionGenerator"
            }
            ProcedureName::SetSupervisionUrl => "SetSupervisionUrl",
            ProcedureName::StartTransaction => "StartTransaction",
            ProcedureName::StopTransaction => "StopTransaction",
            ProcedureName::Authorize => "Authorize",
            ProcedureName::BootNotification => "BootNotification",
            ProcedureName::StatusNotification => "StatusNotification",
            ProcedureName::Heartbeat => "Heartbeat",
            ProcedureName::MeterValues => "MeterValues",
            ProcedureName::DataTransfer => "DataTransfer",
            ProcedureName::DiagnosticsStatusNotification => "DiagnosticsStatusNotification",
            ProcedureName::FirmwareStatusNotification => "FirmwareStatusNotification",
        }
    }

    /// The two generator procedures keep their `connectorIds` scoping field
    pub fn is_generator_procedure(&self) -> bool {
        matches!(
            self,
            ProcedureName::StartAutomaticTransactionGenerator
                | ProcedureName::StopAutomaticTransactionGenerator
        )
    }

    /// OCPP action this procedure forwards to, when it maps to one
    pub fn ocpp_action(&self) -> Option<&'static str> {
        match self {
            ProcedureName::StartTransaction => Some("StartTransaction"),
            ProcedureName::StopTransaction => Some("StopTransaction"),
            ProcedureName::Authorize => Some("Authorize"),
            ProcedureName::BootNotification => Some("BootNotification"),
            ProcedureName::StatusNotification => Some("StatusNotification"),
            ProcedureName::Heartbeat => Some("Heartbeat"),
            ProcedureName::MeterValues => Some("MeterValues"),
            ProcedureName::DataTransfer => Some("DataTransfer"),
            ProcedureName::DiagnosticsStatusNotification => {
                Some("DiagnosticsStatusNotification")
            }
            ProcedureName::FirmwareStatusNotification => Some("FirmwareStatusNotification"),
            _ => None,
        }
    }
}

/// Payload of a request envelope
///
/// Known routing and lifecycle fields are typed; everything else flattens
/// into `extra` and is forwarded to the OCPP layer untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_ids: Option<Vec<String>>,
    /// Deprecated single-station targeting; messages carrying it are dropped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_ids: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete_configuration: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestPayload {
    /// Whether the target filter admits `hash_id`; an absent or empty filter
    /// addresses every station
    pub fn is_addressed_to(&self, hash_id: &str) -> bool {
        match &self.hash_ids {
            Some(ids) if !ids.is_empty() => ids.iter().any(|id| id == hash_id),
            _ => true,
        }
    }

    /// Drop the targeting fields before the payload reaches a handler
    pub fn strip_targeting(&mut self, keep_connector_ids: bool) {
        self.hash_id = None;
        self.hash_ids = None;
        if !keep_connector_ids {
            self.connector_ids = None;
        }
    }

    /// Remaining fields as an OCPP payload object
    pub fn to_ocpp_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// A string field from the procedure-specific remainder
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(Value::as_str)
    }
}

/// Verdict carried by a response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Failure,
}

/// Payload of a response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub hash_id: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_payload: Option<RequestPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
}

impl ResponsePayload {
    pub fn success(hash_id: impl Into<String>) -> Self {
        Self {
            hash_id: hash_id.into(),
            status: ResponseStatus::Success,
            command: None,
            request_payload: None,
            command_response: None,
            error_message: None,
            error_stack: None,
            error_details: None,
        }
    }

    /// The command reached the central system but its response was negative
    pub fn semantic_failure(
        hash_id: impl Into<String>,
        command: &str,
        request_payload: RequestPayload,
        command_response: Value,
    ) -> Self {
        Self {
            hash_id: hash_id.into(),
            status: ResponseStatus::Failure,
            command: Some(command.to_string()),
            request_payload: Some(request_payload),
            command_response: Some(command_response),
            error_message: None,
            error_stack: None,
            error_details: None,
        }
    }

    /// The handler failed outright
    pub fn error_failure(
        hash_id: impl Into<String>,
        command: &str,
        request_payload: RequestPayload,
        error: &OcppError,
    ) -> Self {
        Self {
            hash_id: hash_id.into(),
            status: ResponseStatus::Failure,
            command: Some(command.to_string()),
            request_payload: Some(request_payload),
            command_response: None,
            error_message: Some(error.to_string()),
            error_stack: Some(format!("{error:?}")),
            error_details: error.details().cloned(),
        }
    }
}

/// Request envelope, `[uuid, command, payload]` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RequestEnvelopeWire", into = "RequestEnvelopeWire")]
pub struct RequestEnvelope {
    pub uuid: String,
    pub command: String,
    pub payload: RequestPayload,
}

type RequestEnvelopeWire = (String, String, RequestPayload);

impl RequestEnvelope {
    pub fn new(command: ProcedureName, payload: RequestPayload) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            command: command.as_str().to_string(),
            payload,
        }
    }
}

impl From<RequestEnvelopeWire> for RequestEnvelope {
    fn from((uuid, command, payload): RequestEnvelopeWire) -> Self {
        Self {
            uuid,
            command,
            payload,
        }
    }
}

impl From<RequestEnvelope> for RequestEnvelopeWire {
    fn from(envelope: RequestEnvelope) -> Self {
        (envelope.uuid, envelope.command, envelope.payload)
    }
}

/// Response envelope, `[uuid, payload]` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ResponseEnvelopeWire", into = "ResponseEnvelopeWire")]
pub struct ResponseEnvelope {
    pub uuid: String,
    pub payload: ResponsePayload,
}

type ResponseEnvelopeWire = (String, ResponsePayload);

impl From<ResponseEnvelopeWire> for ResponseEnvelope {
    fn from((uuid, payload): ResponseEnvelopeWire) -> Self {
        Self { uuid, payload }
    }
}

impl From<ResponseEnvelope> for ResponseEnvelopeWire {
    fn from(envelope: ResponseEnvelope) -> Self {
        (envelope.uuid, envelope.payload)
    }
}
