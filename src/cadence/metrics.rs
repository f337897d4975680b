use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const MAX_RECENT_TICKS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    pub started_at: DateTime<Utc>,
    pub frame_seq: u64,
    pub duration_ms: u64,
    pub sales: usize,
    pub alerts: usize,
    /// Pipeline steps that failed and were logged during this tick.
    pub failed_steps: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMetricsSnapshot {
    pub recent_ticks: Vec<TickRecord>,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Ticks passed over because no frame had arrived yet.
    pub idle: u64,
}

#[derive(Default)]
struct TickMetricsState {
    recent_ticks: Vec<TickRecord>,
    completed: u64,
    skipped: u64,
    failed: u64,
    idle: u64,
}

/// Rolling record of cadence ticks, shared between the loop and the query
/// façade.
#[derive(Clone, Default)]
pub struct TickMetrics {
    inner: Arc<Mutex<TickMetricsState>>,
}

impl TickMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_tick(&self, record: TickRecord) {
        let mut state = self.inner.lock().await;

        state.completed += 1;
        if record.failed_steps > 0 {
            state.failed += 1;
        }

        state.recent_ticks.push(record);
        if state.recent_ticks.len() > MAX_RECENT_TICKS {
            state.recent_ticks.remove(0);
        }
    }

    pub async fn record_skipped(&self, missed: u64) {
        self.inner.lock().await.skipped += missed;
    }

    pub async fn record_idle(&self) {
        self.inner.lock().await.idle += 1;
    }

    pub async fn get_snapshot(&self) -> TickMetricsSnapshot {
        let state = self.inner.lock().await;
        TickMetricsSnapshot {
            recent_ticks: state.recent_ticks.clone(),
            completed: state.completed,
            skipped: state.skipped,
            failed: state.failed,
            idle: state.idle,
        }
    }
}
