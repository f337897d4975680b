mod connection;
mod helpers;
mod lock;
mod migrations;
pub mod models;
mod repositories;

pub use connection::{Database, StoreOptions};
pub use models::{
    AlertEvent, AlertKind, AlertQuery, AlertSeverity, FreshnessRecord, FreshnessStatus, SaleEvent,
};
pub use repositories::{FreshnessLoad, RetentionPolicy, RetentionReport, StoreStats};
