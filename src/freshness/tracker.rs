use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::db::{FreshnessRecord, FreshnessStatus};
use crate::models::{CategoryKey, SmoothedSnapshot};

use super::scope::FreshnessScope;

/// First-seen/last-seen bookkeeping per category.
pub struct FreshnessTracker {
    scope: FreshnessScope,
    expiration_days: u32,
    records: BTreeMap<CategoryKey, FreshnessRecord>,
}

impl FreshnessTracker {
    pub fn new(scope: FreshnessScope, expiration_days: u32) -> Self {
        Self {
            scope,
            expiration_days,
            records: BTreeMap::new(),
        }
    }

    /// Loads records read back from the store at startup.
    pub fn restore(&mut self, records: Vec<FreshnessRecord>) {
        for record in records {
            self.records.insert(record.category.clone(), record);
        }
    }

    /// Applies one snapshot and returns the records that changed, ready to
    /// be upserted.
    pub fn observe(&mut self, snapshot: &SmoothedSnapshot) -> Vec<FreshnessRecord> {
        let seen_at = snapshot.captured_at();
        let expiration_days = self.expiration_days;
        let mut changed = Vec::new();

        for (category, count) in snapshot.counts().iter() {
            if count == 0 || !self.scope.includes(category) {
                continue;
            }

            let record = self
                .records
                .entry(category.clone())
                .and_modify(|record| {
                    if seen_at > record.last_seen {
                        record.last_seen = seen_at;
                    }
                    record.expiration_days = expiration_days;
                })
                .or_insert_with(|| {
                    FreshnessRecord::first_observed(category.clone(), seen_at, expiration_days)
                });
            changed.push(record.clone());
        }

        changed
    }

    pub fn get(&self, category: &CategoryKey) -> Option<&FreshnessRecord> {
        self.records.get(category)
    }

    pub fn status(&self, now: DateTime<Utc>) -> Vec<FreshnessStatus> {
        self.records.values().map(|record| record.status(now)).collect()
    }

    pub fn expired(&self, now: DateTime<Utc>) -> Vec<FreshnessStatus> {
        self.records
            .values()
            .filter(|record| record.is_expired(now))
            .map(|record| record.status(now))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
