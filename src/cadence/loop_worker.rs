use chrono::Utc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::models::SmoothedSnapshot;
use crate::smoothing::SmootherHandle;

use super::metrics::{TickMetrics, TickRecord};
use super::pipeline::TickPipeline;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_info, log_warn};

/// Drives the pipeline at a fixed cadence until cancelled. Cancellation is
/// only observed between ticks, so a tick in flight always completes.
pub async fn cadence_loop(
    smoother: SmootherHandle,
    mut pipeline: TickPipeline,
    metrics: TickMetrics,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut last_deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            deadline = ticker.tick() => {
                if let Some(previous) = last_deadline {
                    let missed = missed_ticks(previous, deadline, interval);
                    if missed > 0 {
                        log_warn!("previous tick overran the {}ms cadence; skipped {missed} tick(s)", interval.as_millis());
                        metrics.record_skipped(missed).await;
                    }
                }
                last_deadline = Some(deadline);

                let (counts, frame_seq) = smoother.stable_counts();
                if frame_seq == 0 {
                    log_debug!("no frames observed yet; skipping tick");
                    metrics.record_idle().await;
                    continue;
                }

                let started_at = Utc::now();
                let tick_start = Instant::now();
                let snapshot = SmoothedSnapshot::new(started_at, frame_seq, counts);
                let report = pipeline.run_tick(snapshot).await;

                metrics.record_tick(TickRecord {
                    started_at,
                    frame_seq,
                    duration_ms: tick_start.elapsed().as_millis() as u64,
                    sales: report.sales,
                    alerts: report.alerts,
                    failed_steps: report.failed_steps,
                }).await;
            }
            _ = cancel_token.cancelled() => {
                log_info!("cadence loop shutting down");
                break;
            }
        }
    }
}

fn missed_ticks(previous: Instant, deadline: Instant, interval: Duration) -> u64 {
    let gap = deadline.saturating_duration_since(previous);
    let periods = gap.as_nanos() / interval.as_nanos().max(1);
    periods.saturating_sub(1) as u64
}
