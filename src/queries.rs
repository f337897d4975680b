//! Read-side API for the transport layer.
//!
//! Store-backed queries run on the read-only connection, so they never
//! queue behind tick writes.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::cadence::{OutcomeReceiver, TickMetrics, TickMetricsSnapshot, TickOutcome};
use crate::db::{
    AlertEvent, AlertQuery, Database, FreshnessStatus, SaleEvent, StoreStats,
};
use crate::error::StoreError;
use crate::models::{CategoryCounts, CategoryKey, SmoothedSnapshot};
use crate::smoothing::SmootherHandle;

#[derive(Clone)]
pub struct InventoryQueries {
    db: Database,
    smoother: SmootherHandle,
    metrics: TickMetrics,
    outcome_rx: OutcomeReceiver,
}

impl InventoryQueries {
    pub(crate) fn new(
        db: Database,
        smoother: SmootherHandle,
        metrics: TickMetrics,
        outcome_rx: OutcomeReceiver,
    ) -> Self {
        Self {
            db,
            smoother,
            metrics,
            outcome_rx,
        }
    }

    /// The last snapshot taken (or restored). Falls back to the store when
    /// nothing has been published yet.
    pub async fn current_inventory(&self) -> Result<Option<SmoothedSnapshot>, StoreError> {
        let published = self
            .outcome_rx
            .borrow()
            .as_ref()
            .map(|outcome| outcome.snapshot.clone());
        match published {
            Some(snapshot) => Ok(Some(snapshot)),
            None => self.db.latest_snapshot().await,
        }
    }

    /// Smoother output right now, between snapshots.
    pub fn live_counts(&self) -> CategoryCounts {
        self.smoother.stable_counts().0
    }

    pub async fn freshness_state(
        &self,
    ) -> Result<BTreeMap<CategoryKey, FreshnessStatus>, StoreError> {
        let now = Utc::now();
        let records = self.db.list_freshness().await?;
        Ok(records
            .into_iter()
            .map(|record| (record.category.clone(), record.status(now)))
            .collect())
    }

    pub async fn recent_sales(
        &self,
        limit: usize,
        category: Option<CategoryKey>,
    ) -> Result<Vec<SaleEvent>, StoreError> {
        self.db.recent_sales(limit, category).await
    }

    pub async fn recent_alerts(&self, query: AlertQuery) -> Result<Vec<AlertEvent>, StoreError> {
        self.db.recent_alerts(query).await
    }

    pub async fn acknowledge_alert(&self, alert_id: i64) -> Result<bool, StoreError> {
        self.db.acknowledge_alert(alert_id).await
    }

    pub async fn recent_snapshots(&self, limit: usize) -> Result<Vec<SmoothedSnapshot>, StoreError> {
        self.db.recent_snapshots(limit).await
    }

    pub async fn store_stats(&self) -> Result<StoreStats, StoreError> {
        self.db.store_stats().await
    }

    pub async fn tick_metrics(&self) -> TickMetricsSnapshot {
        self.metrics.get_snapshot().await
    }

    /// Latest tick outcome; `changed()` fires after every tick.
    pub fn subscribe(&self) -> OutcomeReceiver {
        self.outcome_rx.clone()
    }

    pub fn latest_outcome(&self) -> Option<TickOutcome> {
        self.outcome_rx.borrow().clone()
    }
}
