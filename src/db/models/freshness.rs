//! Freshness record data model.
//!
//! One row per category: when it was first and last seen on the shelf.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CorruptRecord;
use crate::models::CategoryKey;

const SECONDS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessRecord {
    pub category: CategoryKey,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub expiration_days: u32,
}

impl FreshnessRecord {
    pub fn first_observed(category: CategoryKey, at: DateTime<Utc>, expiration_days: u32) -> Self {
        Self {
            category,
            first_seen: at,
            last_seen: at,
            expiration_days,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.first_seen).max(Duration::zero())
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        self.age(now).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.age_days(now) > f64::from(self.expiration_days)
    }

    pub fn status(&self, now: DateTime<Utc>) -> FreshnessStatus {
        FreshnessStatus {
            category: self.category.clone(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
            age_days: self.age_days(now),
            expired: self.is_expired(now),
            expiration_days: self.expiration_days,
        }
    }

    /// Sanity check applied to records read back from the store.
    pub fn check(&self) -> Result<(), CorruptRecord> {
        if self.last_seen < self.first_seen {
            return Err(CorruptRecord {
                table: "freshness",
                key: self.category.to_string(),
                reason: format!(
                    "last_seen {} precedes first_seen {}",
                    self.last_seen.to_rfc3339(),
                    self.first_seen.to_rfc3339()
                ),
            });
        }
        Ok(())
    }
}

/// Point-in-time view of a freshness record for the transport layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessStatus {
    pub category: CategoryKey,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub age_days: f64,
    pub expired: bool,
    pub expiration_days: u32,
}
