use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::Serialize;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, to_u64},
};
use crate::error::StoreError;

// (table, timestamp column) pairs subject to retention.
const RETAINED_TABLES: [(&str, &str); 3] = [
    ("snapshots", "captured_at"),
    ("sale_events", "captured_at"),
    ("alert_events", "raised_at"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub keep_last: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: 30,
            keep_last: 100,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionReport {
    pub snapshots_deleted: u64,
    pub sales_deleted: u64,
    pub alerts_deleted: u64,
}

impl RetentionReport {
    pub fn total(&self) -> u64 {
        self.snapshots_deleted + self.sales_deleted + self.alerts_deleted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub snapshots: u64,
    pub freshness_records: u64,
    pub sale_events: u64,
    pub alert_events: u64,
    pub unacknowledged_alerts: u64,
    pub size_bytes: u64,
}

impl Database {
    /// Deletes history older than the policy horizon while always keeping
    /// the newest `keep_last` rows of each table. Freshness is untouched.
    pub async fn apply_retention(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> Result<RetentionReport, StoreError> {
        let cutoff = format_datetime(now - Duration::days(i64::from(policy.max_age_days)));
        let keep_last = i64::from(policy.keep_last);

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut deleted = [0u64; RETAINED_TABLES.len()];
            for (slot, (table, column)) in deleted.iter_mut().zip(RETAINED_TABLES) {
                let sql = format!(
                    "DELETE FROM {table}
                     WHERE {column} <= ?1
                       AND id NOT IN (
                           SELECT id FROM {table}
                           ORDER BY {column} DESC, id DESC
                           LIMIT ?2
                       )"
                );
                *slot = tx
                    .execute(&sql, params![cutoff, keep_last])
                    .with_context(|| format!("failed to apply retention to {table}"))?
                    as u64;
            }
            tx.commit().context("failed to commit retention")?;

            Ok(RetentionReport {
                snapshots_deleted: deleted[0],
                sales_deleted: deleted[1],
                alerts_deleted: deleted[2],
            })
        })
        .await
    }

    pub async fn store_stats(&self) -> Result<StoreStats, StoreError> {
        self.read(|conn| {
            let count = |sql: &str| -> anyhow::Result<u64> {
                let value: i64 = conn.query_row(sql, [], |row| row.get(0))?;
                to_u64(value, "count")
            };

            let page_count: i64 = conn.pragma_query_value(None, "page_count", |row| row.get(0))?;
            let page_size: i64 = conn.pragma_query_value(None, "page_size", |row| row.get(0))?;

            Ok(StoreStats {
                snapshots: count("SELECT COUNT(*) FROM snapshots")?,
                freshness_records: count("SELECT COUNT(*) FROM freshness")?,
                sale_events: count("SELECT COUNT(*) FROM sale_events")?,
                alert_events: count("SELECT COUNT(*) FROM alert_events")?,
                unacknowledged_alerts: count(
                    "SELECT COUNT(*) FROM alert_events WHERE acknowledged = 0",
                )?,
                size_bytes: to_u64(page_count.saturating_mul(page_size), "size_bytes")?,
            })
        })
        .await
    }
}
