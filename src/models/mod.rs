mod category;
mod display_time;
mod snapshot;

pub use category::{CategoryCounts, CategoryKey, UNKNOWN_CATEGORY};
pub use display_time::DisplayZone;
pub use snapshot::SmoothedSnapshot;
