use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::category::{CategoryCounts, CategoryKey};

/// One cadence-timed, smoothed observation of every category.
///
/// Snapshots are minted by the cadence loop (or rebuilt from the store on
/// restart) and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmoothedSnapshot {
    captured_at: DateTime<Utc>,
    frame_seq: u64,
    counts: CategoryCounts,
}

impl SmoothedSnapshot {
    pub fn new(captured_at: DateTime<Utc>, frame_seq: u64, counts: CategoryCounts) -> Self {
        Self {
            captured_at,
            frame_seq,
            counts,
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn frame_seq(&self) -> u64 {
        self.frame_seq
    }

    pub fn counts(&self) -> &CategoryCounts {
        &self.counts
    }

    pub fn count(&self, key: &CategoryKey) -> u32 {
        self.counts.get(key)
    }

    pub fn total(&self) -> u64 {
        self.counts.total()
    }
}
