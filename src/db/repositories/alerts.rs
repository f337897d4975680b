use anyhow::{Context, Result};
use rusqlite::{params, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_category, parse_datetime, to_limit},
    models::{AlertEvent, AlertKind, AlertQuery, AlertSeverity},
};
use crate::error::StoreError;

fn row_to_alert(row: &Row) -> Result<AlertEvent> {
    let uid: String = row.get("uid")?;
    let raised_at: String = row.get("raised_at")?;
    let kind: String = row.get("kind")?;
    let category: String = row.get("category")?;
    let severity: String = row.get("severity")?;
    let metadata_json: String = row.get("metadata_json")?;

    Ok(AlertEvent {
        id: Some(row.get("id")?),
        uid: Uuid::parse_str(&uid).context("failed to parse uid")?,
        raised_at: parse_datetime(&raised_at, "raised_at")?,
        display_time: row.get("display_time")?,
        kind: AlertKind::parse(&kind)?,
        category: parse_category(&category, "category")?,
        severity: AlertSeverity::parse(&severity)?,
        message: row.get("message")?,
        metadata: serde_json::from_str(&metadata_json).context("failed to parse metadata_json")?,
        acknowledged: row.get("acknowledged")?,
    })
}

impl Database {
    pub async fn insert_alert(&self, alert: &AlertEvent) -> Result<i64, StoreError> {
        let record = alert.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO alert_events (uid, raised_at, display_time, kind, category, severity, message, metadata_json, acknowledged)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.uid.to_string(),
                    format_datetime(record.raised_at),
                    record.display_time,
                    record.kind.as_str(),
                    record.category.as_str(),
                    record.severity.as_str(),
                    record.message,
                    serde_json::to_string(&record.metadata)?,
                    record.acknowledged,
                ],
            )
            .with_context(|| {
                format!("failed to insert {} alert for {}", record.kind.as_str(), record.category)
            })?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    /// Most recent first, filtered by the optional fields of `query`.
    pub async fn recent_alerts(&self, query: AlertQuery) -> Result<Vec<AlertEvent>, StoreError> {
        let limit = to_limit(query.limit);
        let kind = query.kind.map(|kind| kind.as_str());
        let category = query.category.map(String::from);
        let acknowledged = query.acknowledged;
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, uid, raised_at, display_time, kind, category, severity, message, metadata_json, acknowledged
                 FROM alert_events
                 WHERE (?1 IS NULL OR kind = ?1)
                   AND (?2 IS NULL OR category = ?2)
                   AND (?3 IS NULL OR acknowledged = ?3)
                 ORDER BY raised_at DESC, id DESC
                 LIMIT ?4",
            )?;

            let mut rows = stmt.query(params![kind, category, acknowledged, limit])?;
            let mut alerts = Vec::new();
            while let Some(row) = rows.next()? {
                alerts.push(row_to_alert(row)?);
            }
            Ok(alerts)
        })
        .await
    }

    /// Returns false when no alert has that id.
    pub async fn acknowledge_alert(&self, alert_id: i64) -> Result<bool, StoreError> {
        self.execute(move |conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE alert_events SET acknowledged = 1 WHERE id = ?1",
                    params![alert_id],
                )
                .context("failed to acknowledge alert")?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
