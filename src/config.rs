use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    alerts::AlertSettings,
    db::{RetentionPolicy, StoreOptions},
    error::ConfigError,
    freshness::FreshnessScope,
    models::{CategoryKey, DisplayZone},
    sales::SalesSettings,
    smoothing::SmoothingMethod,
};

pub const CONFIG_PATH_ENV: &str = "SHELFWATCH_CONFIG";
pub const DB_PATH_ENV: &str = "SHELFWATCH_DB_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/shelfwatch.json";

/// Longest accepted cooldown: one year.
pub const MAX_COOLDOWN_SECONDS: f64 = 365.0 * 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreshnessScopeMode {
    All,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub timeout_seconds: f64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: 10.0,
        }
    }
}

/// Every tunable of the inventory core. A missing file or missing key falls
/// back to the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub smoothing_window: usize,
    pub smoothing_method: SmoothingMethod,
    pub snapshot_interval_seconds: f64,
    pub expiration_days: u32,
    pub freshness_scope: FreshnessScopeMode,
    pub freshness_categories: Vec<String>,
    pub sales_confirm_intervals: u32,
    pub sales_min_delta: u32,
    pub sales_cooldown_seconds: f64,
    pub alerts_enabled: bool,
    pub alert_confirm_intervals: u32,
    pub alert_cooldown_seconds: f64,
    pub low_stock_thresholds: BTreeMap<String, i64>,
    pub retention_days: u32,
    pub retention_keep_last: u32,
    pub db_path: PathBuf,
    pub display_timezone: String,
    pub persistence_timeout_seconds: f64,
    pub shutdown_timeout_seconds: f64,
    pub notification: NotificationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 10,
            smoothing_method: SmoothingMethod::Median,
            snapshot_interval_seconds: 5.0,
            expiration_days: 5,
            freshness_scope: FreshnessScopeMode::All,
            freshness_categories: Vec::new(),
            sales_confirm_intervals: 2,
            sales_min_delta: 1,
            sales_cooldown_seconds: 10.0,
            alerts_enabled: true,
            alert_confirm_intervals: 2,
            alert_cooldown_seconds: 3600.0,
            low_stock_thresholds: BTreeMap::new(),
            retention_days: 30,
            retention_keep_last: 100,
            db_path: PathBuf::from("data/inventory.sqlite3"),
            display_timezone: "America/New_York".into(),
            persistence_timeout_seconds: 10.0,
            shutdown_timeout_seconds: 10.0,
            notification: NotificationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Reads the config file named by `SHELFWATCH_CONFIG` (or the default
    /// path) and applies the `SHELFWATCH_DB_PATH` override.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = Self::load(&path)?;
        if let Some(db_path) = std::env::var_os(DB_PATH_ENV) {
            config.db_path = PathBuf::from(db_path);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}; using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smoothing_window == 0 {
            return Err(ConfigError::invalid("smoothing_window", "must be at least 1"));
        }
        if self.sales_confirm_intervals == 0 {
            return Err(ConfigError::invalid("sales_confirm_intervals", "must be at least 1"));
        }
        if self.sales_min_delta == 0 {
            return Err(ConfigError::invalid("sales_min_delta", "must be at least 1"));
        }
        if self.alert_confirm_intervals == 0 {
            return Err(ConfigError::invalid("alert_confirm_intervals", "must be at least 1"));
        }

        self.snapshot_interval()?;
        self.persistence_timeout()?;
        self.shutdown_timeout()?;
        cooldown_seconds("sales_cooldown_seconds", self.sales_cooldown_seconds)?;
        cooldown_seconds("alert_cooldown_seconds", self.alert_cooldown_seconds)?;
        positive_seconds("notification.timeout_seconds", self.notification.timeout_seconds)?;

        self.sales_settings()?;
        self.display_zone()?;
        self.freshness_scope()?;
        self.low_stock_thresholds()?;
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Result<Duration, ConfigError> {
        positive_seconds("snapshot_interval_seconds", self.snapshot_interval_seconds)
    }

    pub fn persistence_timeout(&self) -> Result<Duration, ConfigError> {
        positive_seconds("persistence_timeout_seconds", self.persistence_timeout_seconds)
    }

    pub fn shutdown_timeout(&self) -> Result<Duration, ConfigError> {
        positive_seconds("shutdown_timeout_seconds", self.shutdown_timeout_seconds)
    }

    pub fn display_zone(&self) -> Result<DisplayZone, ConfigError> {
        DisplayZone::parse(&self.display_timezone)
    }

    pub fn freshness_scope(&self) -> Result<FreshnessScope, ConfigError> {
        match self.freshness_scope {
            FreshnessScopeMode::All => Ok(FreshnessScope::All),
            FreshnessScopeMode::Explicit => {
                let categories: BTreeSet<CategoryKey> = self
                    .freshness_categories
                    .iter()
                    .filter_map(|name| CategoryKey::normalize(name))
                    .collect();
                if categories.is_empty() {
                    return Err(ConfigError::invalid(
                        "freshness_categories",
                        "explicit scope needs at least one category",
                    ));
                }
                Ok(FreshnessScope::Explicit(categories))
            }
        }
    }

    pub fn low_stock_thresholds(&self) -> Result<BTreeMap<CategoryKey, u32>, ConfigError> {
        let mut thresholds = BTreeMap::new();
        for (name, &threshold) in &self.low_stock_thresholds {
            let key = CategoryKey::normalize(name).ok_or_else(|| {
                ConfigError::invalid("low_stock_thresholds", "category name must not be blank")
            })?;
            let threshold = u32::try_from(threshold).map_err(|_| {
                ConfigError::invalid(
                    "low_stock_thresholds",
                    format!("threshold for {key} must be a non-negative integer, got {threshold}"),
                )
            })?;
            thresholds.insert(key, threshold);
        }
        Ok(thresholds)
    }

    pub fn sales_settings(&self) -> Result<SalesSettings, ConfigError> {
        let interval = self.snapshot_interval()?;
        let stale_after = interval
            .checked_mul(self.sales_confirm_intervals.saturating_add(2))
            .and_then(|stale_after| chrono::Duration::from_std(stale_after).ok())
            .ok_or_else(|| {
                ConfigError::invalid(
                    "sales_confirm_intervals",
                    "confirmation window does not fit in a duration",
                )
            })?;
        Ok(SalesSettings {
            confirm_intervals: self.sales_confirm_intervals,
            min_delta: self.sales_min_delta,
            cooldown: cooldown_seconds("sales_cooldown_seconds", self.sales_cooldown_seconds)?,
            pending_max_age: stale_after,
        })
    }

    pub fn alert_settings(&self) -> Result<AlertSettings, ConfigError> {
        Ok(AlertSettings {
            enabled: self.alerts_enabled,
            confirm_intervals: self.alert_confirm_intervals,
            cooldown: cooldown_seconds("alert_cooldown_seconds", self.alert_cooldown_seconds)?,
            low_stock_thresholds: self.low_stock_thresholds()?,
        })
    }

    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            max_age_days: self.retention_days,
            keep_last: self.retention_keep_last,
        }
    }

    pub fn store_options(&self) -> Result<StoreOptions, ConfigError> {
        Ok(StoreOptions {
            op_timeout: self.persistence_timeout()?,
            shutdown_timeout: self.shutdown_timeout()?,
        })
    }
}

fn positive_seconds(field: &'static str, seconds: f64) -> Result<Duration, ConfigError> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(ConfigError::invalid(field, format!("must be a positive number of seconds, got {seconds}")));
    }
    Duration::try_from_secs_f64(seconds).map_err(|err| ConfigError::invalid(field, err.to_string()))
}

fn cooldown_seconds(field: &'static str, seconds: f64) -> Result<chrono::Duration, ConfigError> {
    if !(seconds.is_finite() && (0.0..=MAX_COOLDOWN_SECONDS).contains(&seconds)) {
        return Err(ConfigError::invalid(
            field,
            format!("must be between 0 and {MAX_COOLDOWN_SECONDS} seconds, got {seconds}"),
        ));
    }
    Ok(chrono::Duration::milliseconds((seconds * 1000.0).round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.smoothing_window, 10);
        assert_eq!(config.snapshot_interval().unwrap(), Duration::from_secs(5));
        assert_eq!(config.freshness_scope().unwrap(), FreshnessScope::All);
        assert_eq!(config.retention_policy().keep_last, 100);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write_config(
            r#"{"smoothing_method": "mode", "low_stock_thresholds": {"Mango": 3}}"#,
        );
        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.smoothing_method, SmoothingMethod::Mode);
        assert_eq!(config.sales_confirm_intervals, 2);
        let thresholds = config.low_stock_thresholds().unwrap();
        assert_eq!(thresholds.get(&CategoryKey::normalize("mango").unwrap()), Some(&3));
    }

    #[test]
    fn unknown_smoothing_method_is_rejected() {
        let file = write_config(r#"{"smoothing_method": "harmonic"}"#);
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let file = write_config(r#"{"low_stock_thresholds": {"kiwi": -1}}"#);
        let err = AppConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "low_stock_thresholds", .. }));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = AppConfig {
            snapshot_interval_seconds: 0.0,
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "snapshot_interval_seconds", .. })
        ));
    }

    #[test]
    fn explicit_scope_needs_categories() {
        let mut config = AppConfig {
            freshness_scope: FreshnessScopeMode::Explicit,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());

        config.freshness_categories = vec!["Watermelon".into()];
        let scope = config.freshness_scope().unwrap();
        assert!(scope.includes(&CategoryKey::normalize("watermelon").unwrap()));
    }

    #[test]
    fn sales_staleness_scales_with_interval() {
        let settings = AppConfig::default().sales_settings().unwrap();
        assert_eq!(settings.pending_max_age, chrono::Duration::seconds(20));
        assert_eq!(settings.cooldown, chrono::Duration::seconds(10));
    }

    #[test]
    fn oversized_cooldowns_are_rejected() {
        for (field, config) in [
            (
                "alert_cooldown_seconds",
                AppConfig {
                    alert_cooldown_seconds: 1e300,
                    ..AppConfig::default()
                },
            ),
            (
                "sales_cooldown_seconds",
                AppConfig {
                    sales_cooldown_seconds: MAX_COOLDOWN_SECONDS + 1.0,
                    ..AppConfig::default()
                },
            ),
        ] {
            match config.validate() {
                Err(ConfigError::Invalid { field: rejected, .. }) => assert_eq!(rejected, field),
                other => panic!("expected {field} to be rejected, got {other:?}"),
            }
        }

        let longest = AppConfig {
            alert_cooldown_seconds: MAX_COOLDOWN_SECONDS,
            ..AppConfig::default()
        };
        longest.validate().unwrap();
    }

    #[test]
    fn huge_confirmation_count_is_rejected_not_overflowed() {
        let config = AppConfig {
            snapshot_interval_seconds: 1e9,
            sales_confirm_intervals: u32::MAX,
            ..AppConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "sales_confirm_intervals", .. })
        ));
    }
}
