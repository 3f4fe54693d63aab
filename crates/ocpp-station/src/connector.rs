//! Per-connector transaction bookkeeping
//!
//! A connector either has no transaction (`transaction_id == 0`) or exactly
//! one; `begin_transaction`/`end_transaction` keep
//! `transaction_started ⇔ transaction_id != 0` by construction. While a
//! transaction runs, energy accrues linearly at the station's nominal power
//! and is committed into the register when the transaction ends.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// State of one charging connector
#[derive(Debug, Clone, Serialize)]
pub struct ConnectorStatus {
    /// Whether the connector accepts new transactions
    pub available: bool,
    /// Whether a transaction is currently open
    pub transaction_started: bool,
    /// Id of the open transaction; 0 when none
    pub transaction_id: i32,
    /// Id tag that authorized the open transaction
    pub transaction_id_tag: Option<String>,
    /// Cumulative imported energy, in Wh
    pub energy_active_import_register: i32,
    /// Start instant of the open transaction
    pub transaction_started_at: Option<DateTime<Utc>>,
}

impl ConnectorStatus {
    pub fn new() -> Self {
        Self {
            available: true,
            transaction_started: false,
            transaction_id: 0,
            transaction_id_tag: None,
            energy_active_import_register: 0,
            transaction_started_at: None,
        }
    }

    /// Open a transaction on this connector
    pub fn begin_transaction(&mut self, transaction_id: i32, id_tag: Option<String>) {
        self.transaction_started = true;
        self.transaction_id = transaction_id;
        self.transaction_id_tag = id_tag;
        self.transaction_started_at = Some(Utc::now());
    }

    /// Close the open transaction, committing `energy_wh` into the register
    pub fn end_transaction(&mut self, energy_wh: i32) {
        self.energy_active_import_register = self
            .energy_active_import_register
            .saturating_add(energy_wh);
        self.transaction_started = false;
        self.transaction_id = 0;
        self.transaction_id_tag = None;
        self.transaction_started_at = None;
    }

    /// Energy charged so far by the open transaction, in Wh
    pub fn accrued_energy_wh(&self, charging_power_w: f64, now: DateTime<Utc>) -> i32 {
        let Some(started_at) = self.transaction_started_at else {
            return 0;
        };
        let elapsed = now.signed_duration_since(started_at);
        let seconds = (elapsed.num_milliseconds().max(0) as f64) / 1000.0;
        (seconds * charging_power_w / 3600.0) as i32
    }

    /// Register value including any in-flight accrual
    pub fn sampled_register_wh(&self, charging_power_w: f64, now: DateTime<Utc>) -> i32 {
        self.energy_active_import_register
            .saturating_add(self.accrued_energy_wh(charging_power_w, now))
    }
}

impl Default for ConnectorStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn new_connector_is_idle_and_available() {
        let connector = ConnectorStatus::new();
        assert!(connector.available);
        assert!(!connector.transaction_started);
        assert_eq!(connector.transaction_id, 0);
        assert_eq!(connector.energy_active_import_register, 0);
    }

    #[test]
    fn transaction_invariant_holds_through_lifecycle() {
        let mut connector = ConnectorStatus::new();

        connector.begin_transaction(42, Some("TAG-1".to_string()));
        assert!(connector.transaction_started);
        assert_ne!(connector.transaction_id, 0);
        assert_eq!(connector.transaction_id_tag.as_deref(), Some("TAG-1"));

        connector.end_transaction(500);
        assert!(!connector.transaction_started);
        assert_eq!(connector.transaction_id, 0);
        assert!(connector.transaction_id_tag.is_none());
        assert_eq!(connector.energy_active_import_register, 500);
    }

    #[test]
    fn energy_accrues_at_nominal_power() {
        let mut connector = ConnectorStatus::new();
        connector.begin_transaction(1, None);
        let started = connector.transaction_started_at.unwrap();

        // 3600 W for half an hour is 1800 Wh
        let later = started + ChronoDuration::minutes(30);
        assert_eq!(connector.accrued_energy_wh(3600.0, later), 1800);
        assert_eq!(connector.sampled_register_wh(3600.0, later), 1800);

        // nothing accrues without a transaction
        connector.end_transaction(1800);
        assert_eq!(connector.accrued_energy_wh(3600.0, later), 0);
        assert_eq!(connector.sampled_register_wh(3600.0, later), 1800);
    }
}
