//! Sales attribution: confirmed decreases become sale events.

mod engine;
mod state;

pub use engine::{SalesAttributionEngine, SalesSettings, SalesStats};
pub use state::{AttributionState, PendingChange};
