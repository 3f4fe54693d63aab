//! Performance measurement for bracketed operations
//!
//! `begin_measure` hands out a token, `end_measure` folds the elapsed time
//! into the per-id aggregate. The aggregate map sits behind an exclusive
//! async lock because it is shared across every connector loop and the
//! command dispatcher of a station.

use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Opaque handle returned by [`PerformanceStatistics::begin_measure`]
#[derive(Debug)]
pub struct MeasureToken {
    started: Instant,
}

/// Aggregate timings for one measurement id
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasureSummary {
    pub count: u64,
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl MeasureSummary {
    fn record(&mut self, elapsed_ms: f64) {
        if self.count == 0 {
            self.min_ms = elapsed_ms;
            self.max_ms = elapsed_ms;
        } else {
            self.min_ms = self.min_ms.min(elapsed_ms);
            self.max_ms = self.max_ms.max(elapsed_ms);
        }
        self.count += 1;
        self.total_ms += elapsed_ms;
    }

    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Shared per-station measurement store
#[derive(Debug, Default)]
pub struct PerformanceStatistics {
    measures: Mutex<HashMap<String, MeasureSummary>>,
}

impl PerformanceStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a measurement bracket for `id`
    pub fn begin_measure(&self, id: &str) -> MeasureToken {
        debug!(measure = id, "begin measure");
        MeasureToken {
            started: Instant::now(),
        }
    }

    /// Close the bracket opened by `token` and fold it into the aggregate
    pub async fn end_measure(&self, id: &str, token: MeasureToken) {
        let elapsed_ms = token.started.elapsed().as_secs_f64() * 1000.0;
        let mut measures = self.measures.lock().await;
        measures.entry(id.to_string()).or_default().record(elapsed_ms);
        debug!(measure = id, elapsed_ms, "end measure");
    }

    /// Copy of the current aggregates
    pub async fn snapshot(&self) -> HashMap<String, MeasureSummary> {
        self.measures.lock().await.clone()
    }
}
