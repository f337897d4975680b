use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, to_i64, to_limit, to_u64},
};
use crate::error::{CorruptRecord, StoreError};
use crate::models::{CategoryCounts, SmoothedSnapshot};

// Rows scanned past when the newest snapshots fail to parse.
const RESTORE_SCAN_LIMIT: i64 = 10;

fn row_to_snapshot(row: &Row) -> Result<SmoothedSnapshot> {
    let captured_at: String = row.get("captured_at")?;
    let frame_seq: i64 = row.get("frame_seq")?;
    let counts_json: String = row.get("counts_json")?;

    let counts: CategoryCounts =
        serde_json::from_str(&counts_json).context("failed to parse counts_json")?;

    Ok(SmoothedSnapshot::new(
        parse_datetime(&captured_at, "captured_at")?,
        to_u64(frame_seq, "frame_seq")?,
        counts,
    ))
}

impl Database {
    pub async fn insert_snapshot(&self, snapshot: &SmoothedSnapshot) -> Result<i64, StoreError> {
        let record = snapshot.clone();
        self.execute(move |conn| {
            let counts_json = serde_json::to_string(record.counts())?;
            conn.execute(
                "INSERT INTO snapshots (captured_at, frame_seq, total_count, counts_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    format_datetime(record.captured_at()),
                    to_i64(record.frame_seq())?,
                    to_i64(record.total())?,
                    counts_json,
                    format_datetime(Utc::now()),
                ],
            )
            .context("failed to insert snapshot")?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent snapshot that parses cleanly. Unparseable rows are skipped
    /// and logged.
    pub async fn latest_snapshot(&self) -> Result<Option<SmoothedSnapshot>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, captured_at, frame_seq, counts_json
                 FROM snapshots
                 ORDER BY captured_at DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![RESTORE_SCAN_LIMIT])?;
            while let Some(row) = rows.next()? {
                match row_to_snapshot(row) {
                    Ok(snapshot) => return Ok(Some(snapshot)),
                    Err(err) => {
                        let id: i64 = row.get("id")?;
                        let corrupt = CorruptRecord {
                            table: "snapshots",
                            key: id.to_string(),
                            reason: format!("{err:#}"),
                        };
                        warn!("Skipping snapshot during restore: {corrupt}");
                    }
                }
            }
            Ok(None)
        })
        .await
    }

    pub async fn recent_snapshots(&self, limit: usize) -> Result<Vec<SmoothedSnapshot>, StoreError> {
        let limit = to_limit(limit);
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT captured_at, frame_seq, counts_json
                 FROM snapshots
                 ORDER BY captured_at DESC, id DESC
                 LIMIT ?1",
            )?;

            let mut rows = stmt.query(params![limit])?;
            let mut snapshots = Vec::new();
            while let Some(row) = rows.next()? {
                snapshots.push(row_to_snapshot(row)?);
            }
            Ok(snapshots)
        })
        .await
    }
}
