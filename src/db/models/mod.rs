pub mod alert_event;
pub mod freshness;
pub mod sale_event;

pub use alert_event::{AlertEvent, AlertKind, AlertQuery, AlertSeverity};
pub use freshness::{FreshnessRecord, FreshnessStatus};
pub use sale_event::SaleEvent;
