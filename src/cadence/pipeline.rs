use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alerts::{AlertEngine, AlertStats, Notifier};
use crate::db::{AlertEvent, Database, FreshnessRecord, FreshnessStatus, SaleEvent};
use crate::freshness::FreshnessTracker;
use crate::models::SmoothedSnapshot;
use crate::sales::{SalesAttributionEngine, SalesStats};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// Everything a tick produced, as published to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickOutcome {
    pub snapshot: SmoothedSnapshot,
    pub sales: Vec<SaleEvent>,
    pub alerts: Vec<AlertEvent>,
    pub freshness: Vec<FreshnessStatus>,
    pub sales_stats: SalesStats,
    pub alert_stats: AlertStats,
    /// True for the outcome rebuilt from the store at startup.
    pub restored: bool,
}

pub type OutcomeReceiver = watch::Receiver<Option<TickOutcome>>;

/// Summary handed back to the loop for metrics.
#[derive(Debug, Default)]
pub struct TickReport {
    pub sales: usize,
    pub alerts: usize,
    pub failed_steps: usize,
    /// Detached notification tasks started by this tick.
    pub dispatches: Vec<JoinHandle<()>>,
}

/// The decision-domain half of the system: owns the engines and writes
/// their outputs to the store. Only the cadence loop drives it.
pub struct TickPipeline {
    db: Database,
    freshness: FreshnessTracker,
    sales: SalesAttributionEngine,
    alerts: AlertEngine,
    notifier: Notifier,
    outcome_tx: watch::Sender<Option<TickOutcome>>,
}

impl TickPipeline {
    pub fn new(
        db: Database,
        freshness: FreshnessTracker,
        sales: SalesAttributionEngine,
        alerts: AlertEngine,
        notifier: Notifier,
    ) -> (Self, OutcomeReceiver) {
        let (outcome_tx, outcome_rx) = watch::channel(None);
        (
            Self {
                db,
                freshness,
                sales,
                alerts,
                notifier,
                outcome_tx,
            },
            outcome_rx,
        )
    }

    /// Seeds the engines from persisted state before the first tick.
    pub fn restore(&mut self, snapshot: Option<SmoothedSnapshot>, freshness: Vec<FreshnessRecord>) {
        let restored_records = freshness.len();
        self.freshness.restore(freshness);

        let Some(snapshot) = snapshot else {
            log_info!("No snapshot to restore; starting from an empty shelf ({restored_records} freshness records)");
            return;
        };

        self.sales.seed(&snapshot);
        log_info!(
            "Restored snapshot from {} ({} categories, total {}) and {restored_records} freshness records",
            snapshot.captured_at().to_rfc3339(),
            snapshot.counts().len(),
            snapshot.total()
        );

        let now = snapshot.captured_at();
        let outcome = TickOutcome {
            freshness: self.freshness.status(now),
            sales_stats: self.sales.stats(now),
            alert_stats: self.alerts.stats(now),
            snapshot,
            sales: Vec::new(),
            alerts: Vec::new(),
            restored: true,
        };
        self.outcome_tx.send_replace(Some(outcome));
    }

    pub fn subscribe(&self) -> OutcomeReceiver {
        self.outcome_tx.subscribe()
    }

    /// Runs one snapshot through persistence and every engine. Failures are
    /// logged per step and never abort the tick.
    pub async fn run_tick(&mut self, snapshot: SmoothedSnapshot) -> TickReport {
        let now = snapshot.captured_at();
        let mut report = TickReport::default();

        if let Err(err) = self.db.insert_snapshot(&snapshot).await {
            report.failed_steps += 1;
            log_error!("failed to persist snapshot {}: {err}", snapshot.frame_seq());
        }

        let changed = self.freshness.observe(&snapshot);
        if !changed.is_empty() {
            let count = changed.len();
            if let Err(err) = self.db.upsert_freshness(changed).await {
                report.failed_steps += 1;
                log_error!("failed to upsert {count} freshness records: {err}");
            }
        }

        let mut sales = self.sales.process(&snapshot);
        for sale in &mut sales {
            match self.db.insert_sale(sale).await {
                Ok(id) => sale.id = Some(id),
                Err(err) => {
                    report.failed_steps += 1;
                    log_error!(
                        "failed to persist sale of {} x{} at {}: {err}",
                        sale.category,
                        sale.quantity,
                        sale.display_time
                    );
                }
            }
        }

        let freshness = self.freshness.status(now);
        let mut alerts = self.alerts.evaluate(&snapshot, &freshness);
        for alert in &mut alerts {
            match self.db.insert_alert(alert).await {
                Ok(id) => alert.id = Some(id),
                Err(err) => {
                    report.failed_steps += 1;
                    log_error!(
                        "failed to persist {} alert for {}: {err}",
                        alert.kind.as_str(),
                        alert.category
                    );
                }
            }
        }

        report.sales = sales.len();
        report.alerts = alerts.len();

        let outcome = TickOutcome {
            snapshot,
            sales,
            alerts,
            freshness,
            sales_stats: self.sales.stats(now),
            alert_stats: self.alerts.stats(now),
            restored: false,
        };
        let to_dispatch = outcome.alerts.clone();
        self.outcome_tx.send_replace(Some(outcome));

        for alert in to_dispatch {
            if let Some(handle) = self.notifier.spawn_dispatch(alert) {
                report.dispatches.push(handle);
            }
        }

        if report.failed_steps > 0 {
            log_warn!("tick completed with {} failed steps", report.failed_steps);
        } else {
            log_debug!("tick completed: {} sales, {} alerts", report.sales, report.alerts);
        }
        report
    }
}
