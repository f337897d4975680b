use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{error, info, warn};

use crate::alerts::{AlertEngine, Notifier};
use crate::cadence::{CadenceController, OutcomeReceiver, TickMetrics, TickPipeline};
use crate::config::AppConfig;
use crate::db::{Database, RetentionReport};
use crate::freshness::FreshnessTracker;
use crate::queries::InventoryQueries;
use crate::sales::SalesAttributionEngine;
use crate::smoothing::{SmootherHandle, TemporalSmoother};

/// A running inventory core: store open and locked, state restored, cadence
/// ticking.
pub struct InventorySystem {
    db: Database,
    smoother: SmootherHandle,
    controller: CadenceController,
    metrics: TickMetrics,
    outcome_rx: OutcomeReceiver,
    shutdown_timeout: Duration,
    retention: RetentionReport,
}

impl InventorySystem {
    pub async fn start(config: AppConfig) -> Result<Self> {
        let notifier = Notifier::from_config(&config.notification);
        Self::start_with_notifier(config, notifier).await
    }

    /// Startup order: validate, lock and open the store, prune history,
    /// restore engine state, then start the cadence. No frame is accepted
    /// before restoration completes.
    pub async fn start_with_notifier(config: AppConfig, notifier: Notifier) -> Result<Self> {
        config.validate()?;
        let zone = config.display_zone()?;
        let interval = config.snapshot_interval()?;
        let shutdown_timeout = config.shutdown_timeout()?;
        let store_options = config.store_options()?;
        let sales_settings = config.sales_settings()?;
        let alert_settings = config.alert_settings()?;
        let scope = config.freshness_scope()?;

        let db_path = config.db_path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(db_path, store_options))
            .await
            .context("database open task failed")??;

        let policy = config.retention_policy();
        let retention = match db.apply_retention(policy, Utc::now()).await {
            Ok(report) => {
                info!(
                    "Retention pass removed {} records ({} snapshots, {} sales, {} alerts)",
                    report.total(),
                    report.snapshots_deleted,
                    report.sales_deleted,
                    report.alerts_deleted
                );
                report
            }
            Err(err) => {
                warn!("Retention pass failed, continuing with full history: {err}");
                RetentionReport::default()
            }
        };

        let snapshot = db
            .latest_snapshot()
            .await
            .context("failed to restore latest snapshot")?;
        let freshness = db
            .load_freshness()
            .await
            .context("failed to restore freshness records")?;
        if !freshness.dropped.is_empty() {
            warn!(
                "Dropped {} corrupt freshness records during restore",
                freshness.dropped.len()
            );
        }

        if !alert_settings.enabled {
            info!("Alert engine disabled by configuration");
        }

        let (mut pipeline, outcome_rx) = TickPipeline::new(
            db.clone(),
            FreshnessTracker::new(scope, config.expiration_days),
            SalesAttributionEngine::new(sales_settings, zone),
            AlertEngine::new(alert_settings, zone),
            notifier,
        );
        pipeline.restore(snapshot, freshness.records);

        let smoother = SmootherHandle::new(TemporalSmoother::new(
            config.smoothing_window,
            config.smoothing_method,
        ));

        let metrics = TickMetrics::new();
        let mut controller = CadenceController::new(metrics.clone());
        controller.start(smoother.clone(), pipeline, interval)?;

        Ok(Self {
            db,
            smoother,
            controller,
            metrics,
            outcome_rx,
            shutdown_timeout,
            retention,
        })
    }

    /// Handle the detection feed pushes frames into.
    pub fn frame_sink(&self) -> SmootherHandle {
        self.smoother.clone()
    }

    pub fn queries(&self) -> InventoryQueries {
        InventoryQueries::new(
            self.db.clone(),
            self.smoother.clone(),
            self.metrics.clone(),
            self.outcome_rx.clone(),
        )
    }

    pub fn retention_report(&self) -> &RetentionReport {
        &self.retention
    }

    /// Stops the cadence (the in-flight tick drains), then flushes and closes
    /// the store and releases the writer lock. The caller stops the frame
    /// feed first.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Err(err) = self.controller.stop(self.shutdown_timeout).await {
            error!("Cadence did not stop cleanly: {err:#}");
        }

        self.db.close().await.context("failed to close store")?;
        info!("Inventory system stopped");
        Ok(())
    }
}
