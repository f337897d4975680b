pub mod alerts;
pub mod freshness;
pub mod maintenance;
pub mod sales;
pub mod snapshots;

pub use freshness::FreshnessLoad;
pub use maintenance::{RetentionPolicy, RetentionReport, StoreStats};
