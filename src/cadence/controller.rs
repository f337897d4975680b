use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::smoothing::SmootherHandle;

use super::loop_worker::cadence_loop;
use super::metrics::TickMetrics;
use super::pipeline::TickPipeline;

pub struct CadenceController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    metrics: TickMetrics,
}

impl CadenceController {
    pub fn new(metrics: TickMetrics) -> Self {
        Self {
            handle: None,
            cancel_token: None,
            metrics,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(
        &mut self,
        smoother: SmootherHandle,
        pipeline: TickPipeline,
        interval: Duration,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("cadence already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(cadence_loop(
            smoother,
            pipeline,
            self.metrics.clone(),
            interval,
            cancel_token.clone(),
        ));

        info!("Cadence started at {}ms", interval.as_millis());
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Cancels the loop and waits for the in-flight tick to finish, at most
    /// `timeout`.
    pub async fn stop(&mut self, timeout: Duration) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(joined) => joined.context("cadence loop task failed to join"),
            Err(_) => {
                warn!("Cadence loop did not drain within {}ms", timeout.as_millis());
                Err(anyhow!("cadence loop did not stop within {timeout:?}"))
            }
        }
    }
}
