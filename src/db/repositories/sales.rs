use anyhow::{Context, Result};
use rusqlite::{params, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_category, parse_datetime, to_i64, to_limit, to_u64},
    models::SaleEvent,
};
use crate::error::StoreError;
use crate::models::CategoryKey;

fn row_to_sale(row: &Row) -> Result<SaleEvent> {
    let captured_at: String = row.get("captured_at")?;
    let category: String = row.get("category")?;
    let quantity: i64 = row.get("quantity")?;
    let count_before: i64 = row.get("count_before")?;
    let count_after: i64 = row.get("count_after")?;

    Ok(SaleEvent {
        id: Some(row.get("id")?),
        captured_at: parse_datetime(&captured_at, "captured_at")?,
        display_time: row.get("display_time")?,
        category: parse_category(&category, "category")?,
        quantity: to_u64(quantity, "quantity")?,
        count_before: to_u64(count_before, "count_before")?,
        count_after: to_u64(count_after, "count_after")?,
        attributed: row.get("attributed")?,
    })
}

impl Database {
    pub async fn insert_sale(&self, event: &SaleEvent) -> Result<i64, StoreError> {
        let record = event.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sale_events (captured_at, display_time, category, quantity, count_before, count_after, attributed)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    format_datetime(record.captured_at),
                    record.display_time,
                    record.category.as_str(),
                    to_i64(record.quantity)?,
                    to_i64(record.count_before)?,
                    to_i64(record.count_after)?,
                    record.attributed,
                ],
            )
            .with_context(|| format!("failed to insert sale for {}", record.category))?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent first, optionally for one category.
    pub async fn recent_sales(
        &self,
        limit: usize,
        category: Option<CategoryKey>,
    ) -> Result<Vec<SaleEvent>, StoreError> {
        let limit = to_limit(limit);
        let category = category.map(String::from);
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, captured_at, display_time, category, quantity, count_before, count_after, attributed
                 FROM sale_events
                 WHERE (?1 IS NULL OR category = ?1)
                 ORDER BY captured_at DESC, id DESC
                 LIMIT ?2",
            )?;

            let mut rows = stmt.query(params![category, limit])?;
            let mut sales = Vec::new();
            while let Some(row) = rows.next()? {
                sales.push(row_to_sale(row)?);
            }
            Ok(sales)
        })
        .await
    }
}
