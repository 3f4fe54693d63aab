//! # Fleet Orchestration
//!
//! Expands the simulator configuration into individual stations, wires one
//! command dispatcher per station onto a shared worker channel and drives
//! the fleet's lifecycle.

pub mod config;

use std::sync::Arc;

use ocpp_station::ChargingStation;
use ocpp_worker::{CommandDispatcher, WorkerChannel};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SimulatorConfig;

/// A running set of simulated stations sharing one worker channel
pub struct Fleet {
    stations: Vec<Arc<ChargingStation>>,
    channel: WorkerChannel,
    workers: Vec<JoinHandle<()>>,
}

impl Fleet {
    /// Expand the configuration into stations and spawn their dispatchers
    pub fn build(config: &SimulatorConfig) -> Self {
        let channel = WorkerChannel::new(config.worker_channel_capacity);
        let mut stations = Vec::new();
        let mut workers = Vec::new();
        for group in &config.stations {
            for index in 1..=group.count {
                let hash_id = format!("{}-{:03}", group.template.base_name, index);
                let station = Arc::new(ChargingStation::new(
                    hash_id,
                    group.template.clone(),
                    config.supervision_url.clone(),
                ));
                let dispatcher = CommandDispatcher::new(Arc::clone(&station), channel.clone());
                workers.push(dispatcher.spawn());
                stations.push(station);
            }
        }
        Self {
            stations,
            channel,
            workers,
        }
    }

    pub fn stations(&self) -> &[Arc<ChargingStation>] {
        &self.stations
    }

    /// Command channel shared with every station dispatcher
    pub fn channel(&self) -> WorkerChannel {
        self.channel.clone()
    }

    /// Start every station; a failing station is logged and skipped
    pub async fn start(&self) {
        for station in &self.stations {
            if let Err(e) = station.start().await {
                error!(station = station.hash_id(), "failed to start: {e}");
                continue;
            }
            if station
                .station_info()
                .automatic_transaction_generator
                .enable
            {
                station.start_automatic_transaction_generator(None).await;
            }
        }
        info!(stations = self.stations.len(), "fleet started");
    }

    /// Stop every station and retire the dispatchers
    pub async fn stop(&self) {
        for station in &self.stations {
            if let Err(e) = station.stop().await {
                error!(station = station.hash_id(), "failed to stop: {e}");
            }
        }
        for worker in &self.workers {
            worker.abort();
        }
        info!("fleet stopped");
    }
}
