//! Simulator configuration file
//!
//! A JSON document naming the central system and the station groups to
//! expand, each group being a template plus a station count.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use ocpp_station::config::StationTemplate;
use serde::{Deserialize, Serialize};
use url::Url;

fn default_channel_capacity() -> usize {
    256
}

/// Top-level simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorConfig {
    /// Central system WebSocket URL shared by every station
    pub supervision_url: String,
    /// Station groups to expand into individual stations
    pub stations: Vec<StationGroup>,
    /// Worker channel backlog before slow dispatchers start lagging
    #[serde(default = "default_channel_capacity")]
    pub worker_channel_capacity: usize,
}

/// One template expanded into `count` stations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationGroup {
    pub count: u32,
    pub template: StationTemplate,
}

impl SimulatorConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration file {}", path.display()))?;
        let config: SimulatorConfig = serde_json::from_str(&text)
            .with_context(|| format!("cannot parse configuration file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.supervision_url)
            .with_context(|| format!("invalid supervision url '{}'", self.supervision_url))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            bail!(
                "supervision url '{}' must use the ws or wss scheme",
                self.supervision_url
            );
        }
        if self.worker_channel_capacity == 0 {
            bail!("workerChannelCapacity must be at least 1");
        }
        if self.stations.is_empty() {
            bail!("configuration defines no station groups");
        }
        for group in &self.stations {
            if group.count == 0 {
                bail!(
                    "station group '{}' has a zero count",
                    group.template.base_name
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config(url: &str, count: u32) -> SimulatorConfig {
        SimulatorConfig {
            supervision_url: url.to_string(),
            stations: vec![StationGroup {
                count,
                template: StationTemplate::named("CS-CFG"),
            }],
            worker_channel_capacity: default_channel_capacity(),
        }
    }

    #[test]
    fn parses_a_complete_document() {
        let json = r#"{
            "supervisionUrl": "ws://csms.example:8080/ocpp",
            "stations": [
                {
                    "count": 3,
                    "template": {
                        "baseName": "CS-EU",
                        "chargePointVendor": "Vendor",
                        "chargePointModel": "Model",
                        "automaticTransactionGenerator": {"enable": true}
                    }
                }
            ]
        }"#;
        let config: SimulatorConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();
        assert_eq!(config.stations[0].count, 3);
        assert_eq!(config.worker_channel_capacity, 256);
        assert!(
            config.stations[0]
                .template
                .automatic_transaction_generator
                .enable
        );
    }

    #[test]
    fn rejects_non_websocket_urls() {
        assert!(minimal_config("http://csms.example", 1).validate().is_err());
        assert!(minimal_config("not a url", 1).validate().is_err());
        assert!(minimal_config("wss://csms.example/ocpp", 1)
            .validate()
            .is_ok());
    }

    #[test]
    fn rejects_empty_fleets() {
        let mut config = minimal_config("ws://csms.example", 1);
        config.stations.clear();
        assert!(config.validate().is_err());

        assert!(minimal_config("ws://csms.example", 0).validate().is_err());
    }
}
