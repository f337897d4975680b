use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

/// How a window of per-frame counts collapses into one stable count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingMethod {
    #[default]
    Median,
    Mean,
    Mode,
}

impl SmoothingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SmoothingMethod::Median => "median",
            SmoothingMethod::Mean => "mean",
            SmoothingMethod::Mode => "mode",
        }
    }

    /// Aggregates a window ordered oldest to newest. An empty window is 0.
    pub fn aggregate(&self, window: &VecDeque<u32>) -> u32 {
        if window.is_empty() {
            return 0;
        }
        match self {
            SmoothingMethod::Median => median(window),
            SmoothingMethod::Mean => mean(window),
            SmoothingMethod::Mode => mode(window),
        }
    }
}

fn median(window: &VecDeque<u32>) -> u32 {
    let mut sorted: Vec<u32> = window.iter().copied().collect();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        let sum = u64::from(sorted[mid - 1]) + u64::from(sorted[mid]);
        ((sum + 1) / 2) as u32
    }
}

fn mean(window: &VecDeque<u32>) -> u32 {
    let len = window.len() as u64;
    let sum: u64 = window.iter().map(|&count| u64::from(count)).sum();
    ((sum + len / 2) / len) as u32
}

// Ties go to the value seen most recently.
fn mode(window: &VecDeque<u32>) -> u32 {
    let mut tallies: HashMap<u32, (usize, usize)> = HashMap::new();
    for (position, &count) in window.iter().enumerate() {
        let entry = tallies.entry(count).or_insert((0, position));
        entry.0 += 1;
        entry.1 = position;
    }
    tallies
        .into_iter()
        .max_by_key(|&(_, (frequency, last_position))| (frequency, last_position))
        .map(|(count, _)| count)
        .unwrap_or(0)
}
