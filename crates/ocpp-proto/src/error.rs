//! Error types for OCPP request processing

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Call error codes defined by the OCPP-J RPC framework
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum CallErrorCode {
    /// Requested action is not known by the receiver
    NotImplemented,
    /// Requested action is recognized but not supported
    NotSupported,
    /// An internal error occurred while processing the action
    InternalError,
    /// Payload for the action is incomplete
    ProtocolError,
    /// A security issue prevented the receiver from completing the action
    SecurityError,
    /// Payload is syntactically incorrect for the action
    FormationViolation,
    /// At least one field contains an invalid value
    PropertyConstraintViolation,
    /// At least one field violates occurrence constraints
    OccurrenceConstraintViolation,
    /// At least one field violates data type constraints
    TypeConstraintViolation,
    /// Any other error
    GenericError,
}

impl CallErrorCode {
    /// Wire representation as defined by the OCPP-J framework
    pub fn as_str(&self) -> &'static str {
        match self {
            CallErrorCode::NotImplemented => "NotImplemented",
            CallErrorCode::NotSupported => "NotSupported",
            CallErrorCode::InternalError => "InternalError",
            CallErrorCode::ProtocolError => "ProtocolError",
            CallErrorCode::SecurityError => "SecurityError",
            CallErrorCode::FormationViolation => "FormationViolation",
            CallErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            CallErrorCode::OccurrenceConstraintViolation => "OccurrenceConstraintViolation",
            CallErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            CallErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse a wire error code, falling back to `GenericError`
    pub fn parse(code: &str) -> Self {
        match code {
            "NotImplemented" => CallErrorCode::NotImplemented,
            "NotSupported" => CallErrorCode::NotSupported,
            "InternalError" => CallErrorCode::InternalError,
            "ProtocolError" => CallErrorCode::ProtocolError,
            "SecurityError" => CallErrorCode::SecurityError,
            "FormationViolation" => CallErrorCode::FormationViolation,
            "PropertyConstraintViolation" => CallErrorCode::PropertyConstraintViolation,
            "OccurrenceConstraintViolation" => CallErrorCode::OccurrenceConstraintViolation,
            "TypeConstraintViolation" => CallErrorCode::TypeConstraintViolation,
            _ => CallErrorCode::GenericError,
        }
    }
}

impl std::fmt::Display for CallErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure surfaced to callers of the OCPP request service
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OcppError {
    /// The central system answered with a CallError frame
    #[error("{description}")]
    Call {
        code: CallErrorCode,
        description: String,
        details: Option<Value>,
    },

    /// No CallResult arrived within the request timeout
    #[error("request '{action}' timed out after {timeout_ms} ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// The underlying WebSocket connection failed
    #[error("transport failure: {0}")]
    Transport(String),

    /// A payload could not be encoded or decoded
    #[error("codec failure: {0}")]
    Codec(String),

    /// No open connection to the central system
    #[error("no open connection to the central system")]
    NotConnected,

    /// Anything that indicates a broken internal assumption
    #[error("{0}")]
    Internal(String),
}

impl OcppError {
    /// Build a CallError-shaped failure, used by mocks and the transport
    pub fn call(code: CallErrorCode, description: impl Into<String>, details: Option<Value>) -> Self {
        OcppError::Call {
            code,
            description: description.into(),
            details,
        }
    }

    /// Structured details carried by the failure, if any
    pub fn details(&self) -> Option<&Value> {
        match self {
            OcppError::Call { details, .. } => details.as_ref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OcppError {
    fn from(err: serde_json::Error) -> Self {
        OcppError::Codec(err.to_string())
    }
}

/// Result alias used across the protocol and station crates
pub type OcppResult<T> = Result<T, OcppError>;
