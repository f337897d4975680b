pub mod alerts;
pub mod cadence;
pub mod config;
pub mod db;
pub mod debounce;
pub mod error;
pub mod freshness;
pub mod models;
pub mod queries;
pub mod sales;
pub mod simulation;
pub mod smoothing;
pub mod system;
pub mod utils;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use cadence::OutcomeReceiver;
use config::AppConfig;
use models::CategoryCounts;
use simulation::SyntheticFeed;
use smoothing::SmootherHandle;
use system::InventorySystem;

pub const FEED_ENV: &str = "SHELFWATCH_FEED";

const SYNTHETIC_FRAME_INTERVAL: Duration = Duration::from_millis(200);
const SYNTHETIC_FRAMES_PER_SALE: u64 = 150;

pub fn run() -> Result<()> {
    // RUST_LOG overrides the default level
    utils::init_logging(log::LevelFilter::Info);

    info!("shelfwatch starting up...");

    let config = AppConfig::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("shelfwatch")
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(serve(config))
}

async fn serve(config: AppConfig) -> Result<()> {
    let system = InventorySystem::start(config).await?;
    let queries = system.queries();

    let feed_cancel = CancellationToken::new();
    let synthetic = std::env::var(FEED_ENV)
        .map(|value| value.eq_ignore_ascii_case("synthetic"))
        .unwrap_or(false);
    let feed = if synthetic {
        info!("Using synthetic frame feed");
        tokio::spawn(synthetic_feed(system.frame_sink(), feed_cancel.clone()))
    } else {
        info!("Reading frames from stdin, one JSON object per line");
        tokio::spawn(stdin_feed(system.frame_sink(), feed_cancel.clone()))
    };
    let reporter = spawn_reporter(queries.subscribe(), feed_cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    feed_cancel.cancel();
    for (name, handle) in [("frame feed", feed), ("outcome reporter", reporter)] {
        if let Err(err) = handle.await {
            warn!("{name} task failed to join: {err}");
        }
    }

    system.shutdown().await
}

/// Parses one stdin line such as `{"Mango": 3, "watermelon": 1}`.
fn parse_frame(line: &str) -> Result<CategoryCounts> {
    let raw: BTreeMap<String, u32> =
        serde_json::from_str(line).context("frame must be a JSON object of non-negative counts")?;
    Ok(CategoryCounts::from_raw(raw))
}

async fn stdin_feed(smoother: SmootherHandle, cancel_token: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match parse_frame(&line) {
                    Ok(frame) => smoother.observe_frame(&frame),
                    Err(err) => warn!("Ignoring malformed frame: {err:#}"),
                },
                Ok(None) => {
                    info!("stdin closed; waiting for ctrl-c");
                    break;
                }
                Err(err) => {
                    warn!("Failed to read stdin: {err}");
                    break;
                }
            },
            _ = cancel_token.cancelled() => break,
        }
    }
}

async fn synthetic_feed(smoother: SmootherHandle, cancel_token: CancellationToken) {
    let mut feed = SyntheticFeed::demo(rand::random());
    let mut ticker = tokio::time::interval(SYNTHETIC_FRAME_INTERVAL);
    let mut frames = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                frames += 1;
                if frames % SYNTHETIC_FRAMES_PER_SALE == 0 {
                    if let Some(category) = feed.random_stocked() {
                        let sold = feed.sell(category.as_str(), 1);
                        info!("Synthetic shopper took {sold} {category}");
                    }
                }
                smoother.observe_frame(&feed.next_frame());
            }
            _ = cancel_token.cancelled() => break,
        }
    }
}

/// Prints sales and alerts as JSON lines, standing in for a transport.
fn spawn_reporter(mut outcomes: OutcomeReceiver, cancel_token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = outcomes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let lines: Vec<String> = match outcomes.borrow_and_update().as_ref() {
                        Some(outcome) => outcome
                            .sales
                            .iter()
                            .filter_map(|sale| serde_json::to_string(sale).ok())
                            .chain(
                                outcome
                                    .alerts
                                    .iter()
                                    .filter_map(|alert| serde_json::to_string(alert).ok()),
                            )
                            .collect(),
                        None => Vec::new(),
                    };
                    for line in lines {
                        println!("{line}");
                    }
                }
                _ = cancel_token.cancelled() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CategoryKey;

    #[test]
    fn frames_are_normalized() {
        let frame = parse_frame(r#"{"Mango": 3, " mango ": 1, "watermelon": 0}"#).unwrap();
        assert_eq!(frame.get(&CategoryKey::normalize("mango").unwrap()), 4);
        assert_eq!(frame.len(), 1);
    }

    #[test]
    fn malformed_frames_are_rejected() {
        assert!(parse_frame(r#"{"mango": -1}"#).is_err());
        assert!(parse_frame("[1, 2]").is_err());
    }
}
