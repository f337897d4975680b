//! Fixed-interval bridge between the frame stream and the decision engines.

mod controller;
mod loop_worker;
mod metrics;
mod pipeline;

pub use controller::CadenceController;
pub use metrics::{TickMetrics, TickMetricsSnapshot, TickRecord};
pub use pipeline::{OutcomeReceiver, TickOutcome, TickPipeline, TickReport};
