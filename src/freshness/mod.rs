//! Freshness tracking: how long each category has been on the shelf.

mod scope;
mod tracker;

pub use scope::FreshnessScope;
pub use tracker::FreshnessTracker;
