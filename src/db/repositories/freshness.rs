use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_category, parse_datetime, to_u32},
    models::FreshnessRecord,
};
use crate::error::{CorruptRecord, StoreError};

/// Freshness records read back at startup, minus the ones that failed their
/// sanity check.
#[derive(Debug, Default)]
pub struct FreshnessLoad {
    pub records: Vec<FreshnessRecord>,
    pub dropped: Vec<CorruptRecord>,
}

fn row_to_freshness(row: &Row) -> Result<FreshnessRecord> {
    let category: String = row.get("category")?;
    let first_seen: String = row.get("first_seen")?;
    let last_seen: String = row.get("last_seen")?;
    let expiration_days: i64 = row.get("expiration_days")?;

    Ok(FreshnessRecord {
        category: parse_category(&category, "category")?,
        first_seen: parse_datetime(&first_seen, "first_seen")?,
        last_seen: parse_datetime(&last_seen, "last_seen")?,
        expiration_days: to_u32(expiration_days, "expiration_days")?,
    })
}

impl Database {
    /// Upserts in one transaction. `first_seen` is written only on insert and
    /// `last_seen` never moves backwards.
    pub async fn upsert_freshness(&self, records: Vec<FreshnessRecord>) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let updated_at = format_datetime(Utc::now());
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO freshness (category, first_seen, last_seen, expiration_days, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(category) DO UPDATE SET
                         last_seen = MAX(freshness.last_seen, excluded.last_seen),
                         expiration_days = excluded.expiration_days,
                         updated_at = excluded.updated_at",
                )?;
                for record in &records {
                    stmt.execute(params![
                        record.category.as_str(),
                        format_datetime(record.first_seen),
                        format_datetime(record.last_seen),
                        record.expiration_days,
                        updated_at,
                    ])
                    .with_context(|| format!("failed to upsert freshness for {}", record.category))?;
                }
            }
            tx.commit().context("failed to commit freshness upsert")?;
            Ok(records.len())
        })
        .await
    }

    /// Loads every freshness record for restoration. Rows that fail to parse
    /// or violate `last_seen >= first_seen` are deleted so the tracker starts
    /// them fresh.
    pub async fn load_freshness(&self) -> Result<FreshnessLoad, StoreError> {
        self.execute(|conn| {
            let tx = conn.transaction()?;
            let mut load = FreshnessLoad::default();
            {
                let mut stmt = tx.prepare(
                    "SELECT category, first_seen, last_seen, expiration_days
                     FROM freshness
                     ORDER BY category",
                )?;
                let mut rows = stmt.query([])?;
                while let Some(row) = rows.next()? {
                    let key: String = row.get("category")?;
                    let checked = row_to_freshness(row)
                        .map_err(|err| CorruptRecord {
                            table: "freshness",
                            key: key.clone(),
                            reason: format!("{err:#}"),
                        })
                        .and_then(|record| record.check().map(|_| record));
                    match checked {
                        Ok(record) => load.records.push(record),
                        Err(corrupt) => load.dropped.push(corrupt),
                    }
                }
            }

            for corrupt in &load.dropped {
                warn!("Dropping {corrupt}");
                tx.execute("DELETE FROM freshness WHERE category = ?1", params![corrupt.key])?;
            }
            tx.commit().context("failed to commit freshness restore")?;
            Ok(load)
        })
        .await
    }

    pub async fn list_freshness(&self) -> Result<Vec<FreshnessRecord>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT category, first_seen, last_seen, expiration_days
                 FROM freshness
                 ORDER BY category",
            )?;
            let mut rows = stmt.query([])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_freshness(row)?);
            }
            Ok(records)
        })
        .await
    }
}
