use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Label used for sales that no single category explains.
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// Normalized category name: trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CategoryKey(String);

impl CategoryKey {
    /// Returns `None` when the name is blank after trimming.
    pub fn normalize(raw: &str) -> Option<Self> {
        let key = raw.trim().to_lowercase();
        if key.is_empty() {
            None
        } else {
            Some(Self(key))
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN_CATEGORY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CategoryKey {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CategoryKey::normalize(&value).ok_or_else(|| "category name must not be blank".to_string())
    }
}

impl From<CategoryKey> for String {
    fn from(key: CategoryKey) -> Self {
        key.0
    }
}

/// Per-category counts. Absent categories read as zero and zero counts are
/// never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryCounts(BTreeMap<CategoryKey, u32>);

impl CategoryCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds counts from detector output, merging names that normalize to
    /// the same key and dropping blank names.
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let mut counts = Self::new();
        for (name, count) in raw {
            if let Some(key) = CategoryKey::normalize(name.as_ref()) {
                let merged = counts.get(&key).saturating_add(count);
                counts.set(key, merged);
            }
        }
        counts
    }

    pub fn get(&self, key: &CategoryKey) -> u32 {
        self.0.get(key).copied().unwrap_or(0)
    }

    pub fn set(&mut self, key: CategoryKey, count: u32) {
        if count == 0 {
            self.0.remove(&key);
        } else {
            self.0.insert(key, count);
        }
    }

    pub fn total(&self) -> u64 {
        self.0.values().map(|&count| u64::from(count)).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CategoryKey, u32)> {
        self.0.iter().map(|(key, &count)| (key, count))
    }

    pub fn keys(&self) -> impl Iterator<Item = &CategoryKey> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(CategoryKey, u32)> for CategoryCounts {
    fn from_iter<T: IntoIterator<Item = (CategoryKey, u32)>>(iter: T) -> Self {
        let mut counts = Self::new();
        for (key, count) in iter {
            counts.set(key, count);
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CategoryKey {
        CategoryKey::normalize(name).unwrap()
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(key("  Mango "), key("mango"));
        assert!(CategoryKey::normalize("   ").is_none());
    }

    #[test]
    fn raw_counts_merge_after_normalization() {
        let counts = CategoryCounts::from_raw([("Mango", 2), ("mango ", 3), ("", 7), ("kiwi", 0)]);
        assert_eq!(counts.get(&key("mango")), 5);
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.total(), 5);
    }

    #[test]
    fn absent_category_reads_zero() {
        let counts = CategoryCounts::new();
        assert_eq!(counts.get(&key("watermelon")), 0);
    }

    #[test]
    fn deserializes_through_normalization() {
        let counts: CategoryCounts = serde_json::from_str(r#"{"Apple": 4}"#).unwrap();
        assert_eq!(counts.get(&key("apple")), 4);
    }
}
