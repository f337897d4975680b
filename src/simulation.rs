//! Seeded noisy frame generator standing in for the detector.
//!
//! Frames jitter around a true shelf: occasional occlusions read as zero and
//! occasional miscounts read a little high or low. Only `sell` and `restock`
//! change the true shelf.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::{CategoryCounts, CategoryKey};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedNoise {
    /// Chance a category is missing from a frame.
    pub dropout_rate: f64,
    /// Chance a category is miscounted in a frame.
    pub spike_rate: f64,
    pub max_spike: u32,
}

impl Default for FeedNoise {
    fn default() -> Self {
        Self {
            dropout_rate: 0.05,
            spike_rate: 0.1,
            max_spike: 2,
        }
    }
}

pub struct SyntheticFeed {
    rng: StdRng,
    shelf: BTreeMap<CategoryKey, u32>,
    noise: FeedNoise,
}

impl SyntheticFeed {
    pub fn new<I, S>(seed: u64, shelf: I) -> Self
    where
        I: IntoIterator<Item = (S, u32)>,
        S: AsRef<str>,
    {
        let shelf = CategoryCounts::from_raw(shelf)
            .iter()
            .map(|(key, count)| (key.clone(), count))
            .collect();
        Self {
            rng: StdRng::seed_from_u64(seed),
            shelf,
            noise: FeedNoise::default(),
        }
    }

    /// A small fruit stand used by the demo binary.
    pub fn demo(seed: u64) -> Self {
        Self::new(
            seed,
            [("mango", 8), ("watermelon", 3), ("banana", 12), ("apple", 10)],
        )
    }

    pub fn with_noise(mut self, noise: FeedNoise) -> Self {
        self.noise = noise;
        self
    }

    /// True shelf contents, without noise.
    pub fn shelf(&self) -> CategoryCounts {
        self.shelf
            .iter()
            .map(|(key, &count)| (key.clone(), count))
            .collect()
    }

    /// Removes up to `quantity` items and returns how many were removed.
    pub fn sell(&mut self, category: &str, quantity: u32) -> u32 {
        let Some(count) = CategoryKey::normalize(category).and_then(|key| self.shelf.get_mut(&key))
        else {
            return 0;
        };
        let sold = quantity.min(*count);
        *count -= sold;
        sold
    }

    pub fn restock(&mut self, category: &str, quantity: u32) {
        if let Some(key) = CategoryKey::normalize(category) {
            let count = self.shelf.entry(key).or_insert(0);
            *count = count.saturating_add(quantity);
        }
    }

    /// Picks a random in-stock category, for demo sales.
    pub fn random_stocked(&mut self) -> Option<CategoryKey> {
        let stocked: Vec<&CategoryKey> = self
            .shelf
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(key, _)| key)
            .collect();
        if stocked.is_empty() {
            return None;
        }
        let index = self.rng.gen_range(0..stocked.len());
        Some(stocked[index].clone())
    }

    pub fn next_frame(&mut self) -> CategoryCounts {
        let noise = self.noise;
        let mut frame = CategoryCounts::new();
        for (key, &count) in &self.shelf {
            let observed = if self.rng.gen_bool(noise.dropout_rate) {
                0
            } else if noise.max_spike > 0 && self.rng.gen_bool(noise.spike_rate) {
                let offset = self.rng.gen_range(1..=noise.max_spike);
                if self.rng.gen_bool(0.5) {
                    count.saturating_add(offset)
                } else {
                    count.saturating_sub(offset)
                }
            } else {
                count
            };
            frame.set(key.clone(), observed);
        }
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SaleEvent;
    use crate::models::{DisplayZone, SmoothedSnapshot};
    use crate::sales::{SalesAttributionEngine, SalesSettings};
    use crate::smoothing::{SmoothingMethod, TemporalSmoother};
    use chrono::{Duration, TimeZone, Utc};

    const FRAMES_PER_SNAPSHOT: usize = 10;

    fn noisy_stand(seed: u64) -> SyntheticFeed {
        SyntheticFeed::demo(seed).with_noise(FeedNoise {
            dropout_rate: 0.05,
            spike_rate: 0.05,
            max_spike: 1,
        })
    }

    /// Runs the feed through a smoother and the sales engine on simulated
    /// time; `sell_at` maps snapshot index to (category, quantity).
    fn simulate(
        feed: &mut SyntheticFeed,
        snapshots: usize,
        sell_at: &[(usize, &str, u32)],
    ) -> Vec<SaleEvent> {
        let mut smoother = TemporalSmoother::new(10, SmoothingMethod::Median);
        let mut engine =
            SalesAttributionEngine::new(SalesSettings::default(), DisplayZone::default());
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let mut sales = Vec::new();

        for index in 0..snapshots {
            for &(at, category, quantity) in sell_at {
                if at == index {
                    feed.sell(category, quantity);
                }
            }
            for _ in 0..FRAMES_PER_SNAPSHOT {
                smoother.observe(&feed.next_frame());
            }
            let snapshot = SmoothedSnapshot::new(
                start + Duration::seconds(5 * index as i64),
                smoother.frames_seen(),
                smoother.stable(),
            );
            if index == 0 {
                engine.seed(&snapshot);
            } else {
                sales.extend(engine.process(&snapshot));
            }
        }
        sales
    }

    #[test]
    fn same_seed_gives_same_frames() {
        let mut first = SyntheticFeed::demo(7);
        let mut second = SyntheticFeed::demo(7);
        for _ in 0..50 {
            assert_eq!(first.next_frame(), second.next_frame());
        }
    }

    #[test]
    fn single_frame_noise_produces_no_sales() {
        let mut feed = noisy_stand(42);
        let sales = simulate(&mut feed, 40, &[]);
        assert!(sales.is_empty(), "noise produced sales: {sales:?}");
    }

    #[test]
    fn a_real_sale_is_found_through_the_noise() {
        let mut feed = noisy_stand(42);
        let sales = simulate(&mut feed, 20, &[(5, "banana", 3)]);

        let banana: Vec<&SaleEvent> = sales
            .iter()
            .filter(|sale| sale.category.as_str() == "banana")
            .collect();
        assert_eq!(banana.len(), 1, "sales: {sales:?}");
        assert_eq!(banana[0].quantity, 3);
        assert!(banana[0].attributed);
    }

    #[test]
    fn one_frame_misdetection_of_a_new_category_is_not_a_sale() {
        let mut smoother = TemporalSmoother::new(10, SmoothingMethod::Median);
        let mut engine =
            SalesAttributionEngine::new(SalesSettings::default(), DisplayZone::default());
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let shelf = CategoryCounts::from_raw([("mango", 5)]);
        let glitch = CategoryCounts::from_raw([("mango", 5), ("kiwi", 3)]);

        let mut sales = Vec::new();
        for tick in 0..6i64 {
            for frame in 0..FRAMES_PER_SNAPSHOT {
                if tick == 1 && frame == FRAMES_PER_SNAPSHOT - 1 {
                    smoother.observe(&glitch);
                } else {
                    smoother.observe(&shelf);
                }
            }
            let snapshot = SmoothedSnapshot::new(
                start + Duration::seconds(5 * tick),
                smoother.frames_seen(),
                smoother.stable(),
            );
            assert_eq!(snapshot.count(&CategoryKey::normalize("kiwi").unwrap()), 0);
            sales.extend(engine.process(&snapshot));
        }
        assert!(sales.is_empty(), "glitch produced sales: {sales:?}");
    }

    #[test]
    fn sell_is_bounded_by_stock() {
        let mut feed = SyntheticFeed::new(1, [("Watermelon", 2)]);
        assert_eq!(feed.sell("watermelon", 5), 2);
        assert_eq!(feed.sell("kiwi", 1), 0);
        feed.restock("watermelon", 4);
        assert_eq!(feed.shelf().get(&CategoryKey::normalize("watermelon").unwrap()), 4);
    }
}
