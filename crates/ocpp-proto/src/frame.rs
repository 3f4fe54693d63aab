//! OCPP-J wire framing
//!
//! Messages travel as JSON arrays whose first element is the message type:
//! `[2, "<id>", "<action>", {..}]` for a Call, `[3, "<id>", {..}]` for a
//! CallResult and `[4, "<id>", "<code>", "<description>", {..}]` for a
//! CallError. The arities differ, so an untagged raw enum disambiguates.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{CallErrorCode, OcppError, OcppResult};

const MESSAGE_TYPE_CALL: u8 = 2;
const MESSAGE_TYPE_CALL_RESULT: u8 = 3;
const MESSAGE_TYPE_CALL_ERROR: u8 = 4;

/// A decoded OCPP-J frame
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        code: CallErrorCode,
        description: String,
        details: Value,
    },
}

/// Raw array shapes as they appear on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawFrame {
    Call(u8, String, String, Value),
    CallError(u8, String, String, String, Value),
    CallResult(u8, String, Value),
}

impl WireMessage {
    /// Build a Call frame with a fresh unique id
    pub fn call(action: impl Into<String>, payload: Value) -> Self {
        WireMessage::Call {
            unique_id: Uuid::new_v4().to_string(),
            action: action.into(),
            payload,
        }
    }

    /// Build a CallError frame answering `unique_id`
    pub fn call_error(
        unique_id: impl Into<String>,
        code: CallErrorCode,
        description: impl Into<String>,
    ) -> Self {
        WireMessage::CallError {
            unique_id: unique_id.into(),
            code,
            description: description.into(),
            details: Value::Object(Default::default()),
        }
    }

    /// Correlation id shared between a Call and its response
    pub fn unique_id(&self) -> &str {
        match self {
            WireMessage::Call { unique_id, .. }
            | WireMessage::CallResult { unique_id, .. }
            | WireMessage::CallError { unique_id, .. } => unique_id,
        }
    }

    /// Encode to the wire text representation
    pub fn encode(&self) -> OcppResult<String> {
        let raw = match self {
            WireMessage::Call {
                unique_id,
                action,
                payload,
            } => RawFrame::Call(
                MESSAGE_TYPE_CALL,
                unique_id.clone(),
                action.clone(),
                payload.clone(),
            ),
            WireMessage::CallResult { unique_id, payload } => {
                RawFrame::CallResult(MESSAGE_TYPE_CALL_RESULT, unique_id.clone(), payload.clone())
            }
            WireMessage::CallError {
                unique_id,
                code,
                description,
                details,
            } => RawFrame::CallError(
                MESSAGE_TYPE_CALL_ERROR,
                unique_id.clone(),
                code.as_str().to_string(),
                description.clone(),
                details.clone(),
            ),
        };
        Ok(serde_json::to_string(&raw)?)
    }

    /// Decode from the wire text representation
    pub fn decode(text: &str) -> OcppResult<Self> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match raw {
            RawFrame::Call(message_type, unique_id, action, payload) => {
                if message_type != MESSAGE_TYPE_CALL {
                    return Err(invalid_message_type(message_type));
                }
                Ok(WireMessage::Call {
                    unique_id,
                    action,
                    payload,
                })
            }
            RawFrame::CallResult(message_type, unique_id, payload) => {
                if message_type != MESSAGE_TYPE_CALL_RESULT {
                    return Err(invalid_message_type(message_type));
                }
                Ok(WireMessage::CallResult { unique_id, payload })
            }
            RawFrame::CallError(message_type, unique_id, code, description, details) => {
                if message_type != MESSAGE_TYPE_CALL_ERROR {
                    return Err(invalid_message_type(message_type));
                }
                Ok(WireMessage::CallError {
                    unique_id,
                    code: CallErrorCode::parse(&code),
                    description,
                    details,
                })
            }
        }
    }
}

fn invalid_message_type(message_type: u8) -> OcppError {
    OcppError::Codec(format!("invalid OCPP message type: {message_type}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_frame_encodes_as_array() {
        let frame = WireMessage::Call {
            unique_id: "abc".to_string(),
            action: "Heartbeat".to_string(),
            payload: json!({}),
        };
        assert_eq!(frame.encode().unwrap(), r#"[2,"abc","Heartbeat",{}]"#);
    }

    #[test]
    fn call_result_decodes() {
        let frame =
            WireMessage::decode(r#"[3,"abc",{"currentTime":"2024-06-01T00:00:00Z"}]"#).unwrap();
        match frame {
            WireMessage::CallResult { unique_id, payload } => {
                assert_eq!(unique_id, "abc");
                assert_eq!(payload["currentTime"], "2024-06-01T00:00:00Z");
            }
            other => panic!("expected CallResult, got {other:?}"),
        }
    }

    #[test]
    fn call_error_decodes() {
        let frame = WireMessage::decode(
            r#"[4,"abc","NotImplemented","unknown action",{"action":"Bogus"}]"#,
        )
        .unwrap();
        match frame {
            WireMessage::CallError {
                unique_id,
                code,
                description,
                details,
            } => {
                assert_eq!(unique_id, "abc");
                assert_eq!(code, CallErrorCode::NotImplemented);
                assert_eq!(description, "unknown action");
                assert_eq!(details["action"], "Bogus");
            }
            other => panic!("expected CallError, got {other:?}"),
        }
    }

    #[test]
    fn rejects_bad_message_type() {
        assert!(WireMessage::decode(r#"[9,"abc",{}]"#).is_err());
        assert!(WireMessage::decode(r#"{"not":"an array"}"#).is_err());
    }

    #[test]
    fn round_trip_preserves_frames() {
        let frames = vec![
            WireMessage::call("Authorize", json!({"idTag": "TAG-1"})),
            WireMessage::CallResult {
                unique_id: "id-1".to_string(),
                payload: json!({"idTagInfo": {"status": "Accepted"}}),
            },
            WireMessage::call_error("id-2", CallErrorCode::GenericError, "boom"),
        ];
        for frame in frames {
            let decoded = WireMessage::decode(&frame.encode().unwrap()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn fresh_calls_get_unique_ids() {
        let a = WireMessage::call("Heartbeat", json!({}));
        let b = WireMessage::call("Heartbeat", json!({}));
        assert_ne!(a.unique_id(), b.unique_id());
    }
}
