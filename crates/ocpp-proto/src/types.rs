//! Shared OCPP 1.6J data types and enumerations
//!
//! Wire names match OCPP 1.6J exactly; serde renames cover the dotted
//! identifiers (`Sample.Periodic`, `Energy.Active.Import.Register`) that
//! `rename_all` cannot express.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Authorization verdict returned for an id tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AuthorizationStatus {
    /// Id tag is valid
    Accepted,
    /// Id tag has been blocked
    Blocked,
    /// Id tag has expired
    Expired,
    /// Id tag is unknown
    Invalid,
    /// Id tag is already involved in another transaction
    ConcurrentTx,
}

/// Registration verdict returned for a BootNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum RegistrationStatus {
    /// Charge point is accepted by the central system
    Accepted,
    /// Charge point is not yet accepted; it must retry
    Pending,
    /// Charge point is rejected
    Rejected,
}

/// Verdict returned for a DataTransfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DataTransferStatus {
    Accepted,
    Rejected,
    UnknownMessageId,
    UnknownVendorId,
}

/// Connector status reported via StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Charging,
    SuspendedEV,
    SuspendedEVSE,
    Finishing,
    Reserved,
    Faulted,
    Unavailable,
}

/// Error code reported via StatusNotification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ChargePointErrorCode {
    ConnectorLockFailure,
    EVCommunicationError,
    GroundFailure,
    HighTemperature,
    InternalError,
    LocalListConflict,
    NoError,
    OtherError,
    OverCurrentFailure,
    OverVoltage,
    PowerMeterFailure,
    PowerSwitchFailure,
    ReaderFailure,
    ResetFailure,
    UnderVoltage,
    WeakSignal,
}

/// Diagnostics upload progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum DiagnosticsStatus {
    Idle,
    Uploaded,
    UploadFailed,
    Uploading,
}

/// Firmware update progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum FirmwareStatus {
    Downloaded,
    DownloadFailed,
    Downloading,
    Idle,
    InstallationFailed,
    Installing,
    Installed,
}

/// Reason a transaction was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StopReason {
    DeAuthorized,
    EmergencyStop,
    EVDisconnected,
    HardReset,
    Local,
    Other,
    PowerLoss,
    Reboot,
    Remote,
    SoftReset,
    UnlockCommand,
}

/// Authorization data attached to transaction-related responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdTagInfo {
    /// Authorization verdict
    pub status: AuthorizationStatus,
    /// Parent id tag, if the tag belongs to a group
    #[serde(rename = "parentIdTag", skip_serializing_if = "Option::is_none")]
    pub parent_id_tag: Option<String>,
    /// Expiry of the authorization
    #[serde(rename = "expiryDate", skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<DateTime<Utc>>,
}

impl IdTagInfo {
    /// Plain verdict with no parent tag or expiry
    pub fn with_status(status: AuthorizationStatus) -> Self {
        Self {
            status,
            parent_id_tag: None,
            expiry_date: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AuthorizationStatus::Accepted
    }
}

/// One timestamped collection of sampled values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeterValue {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sampledValue")]
    pub sampled_value: Vec<SampledValue>,
}

/// A single sampled measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledValue {
    /// Measured value, stringly typed on the wire
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ReadingContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub measurand: Option<Measurand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitOfMeasure>,
}

/// Context in which a sample was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadingContext {
    #[serde(rename = "Interruption.Begin")]
    InterruptionBegin,
    #[serde(rename = "Interruption.End")]
    InterruptionEnd,
    #[serde(rename = "Sample.Clock")]
    SampleClock,
    #[serde(rename = "Sample.Periodic")]
    SamplePeriodic,
    #[serde(rename = "Transaction.Begin")]
    TransactionBegin,
    #[serde(rename = "Transaction.End")]
    TransactionEnd,
    Other,
}

/// Measured quantity of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Measurand {
    #[serde(rename = "Energy.Active.Import.Register")]
    EnergyActiveImportRegister,
    #[serde(rename = "Power.Active.Import")]
    PowerActiveImport,
    #[serde(rename = "Current.Import")]
    CurrentImport,
    Voltage,
}

/// Unit of a sampled value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitOfMeasure {
    Wh,
    #[serde(rename = "kWh")]
    KWh,
    W,
    #[serde(rename = "kW")]
    KW,
    A,
    V,
    Percent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_status_wire_names() {
        let json = serde_json::to_string(&AuthorizationStatus::ConcurrentTx).unwrap();
        assert_eq!(json, "\"ConcurrentTx\"");

        let parsed: AuthorizationStatus = serde_json::from_str("\"Blocked\"").unwrap();
        assert_eq!(parsed, AuthorizationStatus::Blocked);
    }

    #[test]
    fn dotted_wire_names() {
        let json = serde_json::to_string(&ReadingContext::SamplePeriodic).unwrap();
        assert_eq!(json, "\"Sample.Periodic\"");

        let json = serde_json::to_string(&Measurand::EnergyActiveImportRegister).unwrap();
        assert_eq!(json, "\"Energy.Active.Import.Register\"");
    }

    #[test]
    fn id_tag_info_skips_absent_fields() {
        let info = IdTagInfo::with_status(AuthorizationStatus::Accepted);
        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"status":"Accepted"}"#);
        assert!(info.is_accepted());
    }

    #[test]
    fn sampled_value_round_trip() {
        let sample = SampledValue {
            value: "1234".to_string(),
            context: Some(ReadingContext::SamplePeriodic),
            measurand: Some(Measurand::EnergyActiveImportRegister),
            unit: Some(UnitOfMeasure::Wh),
        };
        let json = serde_json::to_string(&sample).unwrap();
        let parsed: SampledValue = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample);
    }

    #[test]
    fn stop_reason_wire_names() {
        assert_eq!(
            serde_json::to_string(&StopReason::EVDisconnected).unwrap(),
            "\"EVDisconnected\""
        );
        assert_eq!(
            serde_json::to_string(&StopReason::DeAuthorized).unwrap(),
            "\"DeAuthorized\""
        );
    }
}
