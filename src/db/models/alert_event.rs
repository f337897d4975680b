use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::CategoryKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowStock,
    Expiration,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowStock => "low_stock",
            AlertKind::Expiration => "expiration",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            AlertKind::LowStock => "Low Stock",
            AlertKind::Expiration => "Expiration",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "low_stock" => Ok(AlertKind::LowStock),
            "expiration" => Ok(AlertKind::Expiration),
            other => Err(anyhow!("unknown alert kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(anyhow!("unknown alert severity {other}")),
        }
    }
}

/// A fired alert. Append-only apart from `acknowledged`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: Option<i64>,
    /// Stable identifier handed to notification receivers for deduplication.
    pub uid: Uuid,
    pub raised_at: DateTime<Utc>,
    pub display_time: String,
    pub kind: AlertKind,
    pub category: CategoryKey,
    pub severity: AlertSeverity,
    pub message: String,
    pub metadata: serde_json::Value,
    pub acknowledged: bool,
}

/// Filters for alert history queries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertQuery {
    pub limit: usize,
    pub kind: Option<AlertKind>,
    pub category: Option<CategoryKey>,
    pub acknowledged: Option<bool>,
}

impl AlertQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}
