use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::CategoryKey;

/// A confirmed sale. Append-only once persisted.
///
/// `attributed` is false for sales inferred from an unexplained drop in the
/// total; those carry the `unknown` category and total counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleEvent {
    pub id: Option<i64>,
    pub captured_at: DateTime<Utc>,
    pub display_time: String,
    pub category: CategoryKey,
    pub quantity: u64,
    pub count_before: u64,
    pub count_after: u64,
    pub attributed: bool,
}
