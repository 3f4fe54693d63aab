//! Station template configuration
//!
//! A template describes one class of simulated stations: identity fields fed
//! into BootNotification, the connector layout, the authorized id tags and
//! the automatic transaction generator parameters. Field names are camelCase
//! to match the configuration files.

use std::time::Duration;

use ocpp_proto::messages::BootNotificationRequest;
use serde::{Deserialize, Serialize};

/// Default share of an hour the transaction generator runs before stopping
pub const ATG_DEFAULT_STOP_AFTER_HOURS: f64 = 0.25;

/// Poll interval while waiting for the OCPP request service to come up
pub const ATG_INITIALIZATION_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Cool-off after the central system rejects a transaction start
pub const ATG_WAIT_AFTER_REJECTED_START: Duration = Duration::from_millis(5000);

/// Fallback meter value sample interval
pub const DEFAULT_METER_VALUE_SAMPLE_INTERVAL: Duration = Duration::from_millis(60_000);

/// Template describing one class of simulated stations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationTemplate {
    /// Prefix used to derive station names and hash ids
    pub base_name: String,
    pub charge_point_vendor: String,
    pub charge_point_model: String,
    #[serde(default)]
    pub firmware_version: Option<String>,
    #[serde(default = "default_connector_count")]
    pub connector_count: u32,
    /// Nominal charging power per connector, in W
    #[serde(default = "default_charging_power_w")]
    pub charging_power_w: f64,
    #[serde(default)]
    pub authorized_tags: Vec<String>,
    /// Meter value sample interval in milliseconds; 0 falls back to the default
    #[serde(default)]
    pub meter_value_sample_interval_ms: u64,
    #[serde(default)]
    pub automatic_transaction_generator: AtgConfig,
}

fn default_connector_count() -> u32 {
    2
}

fn default_charging_power_w() -> f64 {
    // 32 A at 230 V single phase
    7360.0
}

impl StationTemplate {
    /// Minimal template used as a starting point for tests and examples
    pub fn named(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
            charge_point_vendor: "EVSE Tools".to_string(),
            charge_point_model: "LoadSim".to_string(),
            firmware_version: Some("0.1.0".to_string()),
            connector_count: default_connector_count(),
            charging_power_w: default_charging_power_w(),
            authorized_tags: Vec::new(),
            meter_value_sample_interval_ms: 0,
            automatic_transaction_generator: AtgConfig::default(),
        }
    }

    /// BootNotification payload derived from the template identity fields
    pub fn boot_notification_request(&self, serial_number: &str) -> BootNotificationRequest {
        BootNotificationRequest {
            charge_point_vendor: self.charge_point_vendor.clone(),
            charge_point_model: self.charge_point_model.clone(),
            charge_point_serial_number: Some(serial_number.to_string()),
            charge_box_serial_number: None,
            firmware_version: self.firmware_version.clone(),
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
    }

    /// Configured sample interval, falling back to the protocol default
    pub fn meter_value_sample_interval(&self) -> Duration {
        if self.meter_value_sample_interval_ms == 0 {
            DEFAULT_METER_VALUE_SAMPLE_INTERVAL
        } else {
            Duration::from_millis(self.meter_value_sample_interval_ms)
        }
    }
}

/// Automatic transaction generator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AtgConfig {
    /// Whether the fleet runner starts the generator with the station
    pub enable: bool,
    /// Minimum transaction duration, in seconds
    pub min_duration: f64,
    /// Maximum transaction duration, in seconds
    pub max_duration: f64,
    /// Minimum delay between two transactions, in seconds
    pub min_delay_between_two_transactions: f64,
    /// Maximum delay between two transactions, in seconds
    pub max_delay_between_two_transactions: f64,
    /// Probability that a cycle starts a transaction, in [0, 1]
    pub probability_of_start: f64,
    /// Running budget before the generator stops itself, in hours
    pub stop_after_hours: f64,
    /// Whether an Authorize must precede every StartTransaction
    pub require_authorize: bool,
}

impl Default for AtgConfig {
    fn default() -> Self {
        Self {
            enable: false,
            min_duration: 60.0,
            max_duration: 120.0,
            min_delay_between_two_transactions: 15.0,
            max_delay_between_two_transactions: 30.0,
            probability_of_start: 1.0,
            stop_after_hours: ATG_DEFAULT_STOP_AFTER_HOURS,
            require_authorize: false,
        }
    }
}

impl AtgConfig {
    /// Running budget as a duration
    pub fn stop_after(&self) -> Duration {
        Duration::from_secs_f64(self.stop_after_hours.max(0.0) * 3600.0)
    }
}
