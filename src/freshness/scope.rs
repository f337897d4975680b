use std::collections::BTreeSet;

use crate::models::CategoryKey;

/// Which categories get freshness tracking.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FreshnessScope {
    #[default]
    All,
    Explicit(BTreeSet<CategoryKey>),
}

impl FreshnessScope {
    pub fn includes(&self, category: &CategoryKey) -> bool {
        match self {
            FreshnessScope::All => true,
            FreshnessScope::Explicit(categories) => categories.contains(category),
        }
    }
}
