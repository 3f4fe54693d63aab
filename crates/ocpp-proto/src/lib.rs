//! # OCPP 1.6J Protocol Layer
//!
//! Typed request/response messages, shared protocol enums, JSON array wire
//! framing and the error taxonomy used by the charging-station simulator.
//! Only the charge-point initiated subset of the protocol is covered; the
//! central-system initiated profile is out of scope for a load generator.

pub mod error;
pub mod frame;
pub mod messages;
pub mod types;

pub use error::{CallErrorCode, OcppError, OcppResult};
pub use frame::WireMessage;
pub use messages::OcppRequest;
