//! Response classification
//!
//! Turns a forwarded OCPP response into the success/failure verdict carried
//! by the response envelope. Every rule works on the raw JSON payload so the
//! classifier stays indifferent to which handler produced the response.

use serde_json::Value;

use crate::envelope::{ProcedureName, ResponseStatus};

/// Verdict for `response` under the rules of `command`
pub fn classify(command: ProcedureName, response: &Value) -> ResponseStatus {
    let success = match command {
        ProcedureName::StartTransaction
        | ProcedureName::StopTransaction
        | ProcedureName::Authorize => {
            response.pointer("/idTagInfo/status").and_then(Value::as_str) == Some("Accepted")
        }
        ProcedureName::BootNotification | ProcedureName::DataTransfer => {
            response.get("status").and_then(Value::as_str) == Some("Accepted")
        }
        ProcedureName::StatusNotification | ProcedureName::MeterValues => {
            response.as_object().is_some_and(|object| object.is_empty())
        }
        ProcedureName::Heartbeat => response
            .get("currentTime")
            .is_some_and(|time| !time.is_null()),
        _ => false,
    };
    if success {
        ResponseStatus::Success
    } else {
        ResponseStatus::Failure
    }
}
