use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::{CategoryCounts, CategoryKey};

use super::method::SmoothingMethod;

/// Sliding-window smoother over per-frame category counts.
pub struct TemporalSmoother {
    window: usize,
    method: SmoothingMethod,
    buffers: BTreeMap<CategoryKey, VecDeque<u32>>,
    frames_seen: u64,
}

impl TemporalSmoother {
    pub fn new(window: usize, method: SmoothingMethod) -> Self {
        Self {
            window: window.max(1),
            method,
            buffers: BTreeMap::new(),
            frames_seen: 0,
        }
    }

    /// Records one frame. Known categories missing from the frame record 0.
    /// A category seen for the first time starts with a zero for every
    /// earlier frame still inside the window.
    pub fn observe(&mut self, frame: &CategoryCounts) {
        let earlier = usize::try_from(self.frames_seen)
            .unwrap_or(usize::MAX)
            .min(self.window - 1);
        self.frames_seen += 1;

        for key in frame.keys() {
            if !self.buffers.contains_key(key) {
                let mut buffer = VecDeque::with_capacity(self.window);
                buffer.resize(earlier, 0);
                self.buffers.insert(key.clone(), buffer);
            }
        }

        for (key, buffer) in self.buffers.iter_mut() {
            buffer.push_back(frame.get(key));
            while buffer.len() > self.window {
                buffer.pop_front();
            }
        }

        // A window of zeros has fully decayed.
        self.buffers.retain(|_, buffer| buffer.iter().any(|&count| count > 0));
    }

    pub fn stable(&self) -> CategoryCounts {
        self.buffers
            .iter()
            .map(|(key, buffer)| (key.clone(), self.method.aggregate(buffer)))
            .collect()
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn method(&self) -> SmoothingMethod {
        self.method
    }

    pub fn tracked_categories(&self) -> usize {
        self.buffers.len()
    }
}

/// Cloneable handle shared by the frame feed and the cadence loop.
#[derive(Clone)]
pub struct SmootherHandle {
    inner: Arc<Mutex<TemporalSmoother>>,
}

impl SmootherHandle {
    pub fn new(smoother: TemporalSmoother) -> Self {
        Self {
            inner: Arc::new(Mutex::new(smoother)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TemporalSmoother> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called at frame rate; holds the lock only for the buffer update.
    pub fn observe_frame(&self, frame: &CategoryCounts) {
        self.lock().observe(frame);
    }

    /// Current stable counts together with the number of frames observed.
    pub fn stable_counts(&self) -> (CategoryCounts, u64) {
        let guard = self.lock();
        (guard.stable(), guard.frames_seen())
    }

    pub fn frames_seen(&self) -> u64 {
        self.lock().frames_seen()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pairs: &[(&str, u32)]) -> CategoryCounts {
        CategoryCounts::from_raw(pairs.iter().copied())
    }

    fn key(name: &str) -> CategoryKey {
        CategoryKey::normalize(name).unwrap()
    }

    #[test]
    fn constant_input_is_idempotent() {
        for method in [SmoothingMethod::Median, SmoothingMethod::Mean, SmoothingMethod::Mode] {
            let mut smoother = TemporalSmoother::new(10, method);
            for _ in 0..10 {
                smoother.observe(&frame(&[("mango", 4), ("kiwi", 2)]));
            }
            let stable = smoother.stable();
            assert_eq!(stable.get(&key("mango")), 4);
            assert_eq!(stable.get(&key("kiwi")), 2);
        }
    }

    #[test]
    fn single_frame_spike_is_rejected_by_median() {
        let mut smoother = TemporalSmoother::new(10, SmoothingMethod::Median);
        for _ in 0..9 {
            smoother.observe(&frame(&[("mango", 5)]));
        }
        smoother.observe(&frame(&[("mango", 1)]));
        assert_eq!(smoother.stable().get(&key("mango")), 5);
    }

    #[test]
    fn absent_category_decays_out_of_window() {
        let mut smoother = TemporalSmoother::new(3, SmoothingMethod::Median);
        smoother.observe(&frame(&[("kiwi", 2)]));
        smoother.observe(&frame(&[("kiwi", 2)]));
        smoother.observe(&frame(&[]));
        assert_eq!(smoother.stable().get(&key("kiwi")), 2);

        smoother.observe(&frame(&[]));
        smoother.observe(&frame(&[]));
        assert_eq!(smoother.stable().get(&key("kiwi")), 0);
        assert_eq!(smoother.tracked_categories(), 0);
    }

    #[test]
    fn late_single_frame_category_reads_zero() {
        let mut smoother = TemporalSmoother::new(10, SmoothingMethod::Median);
        for _ in 0..30 {
            smoother.observe(&frame(&[("mango", 5)]));
        }
        smoother.observe(&frame(&[("mango", 5), ("kiwi", 3)]));
        let stable = smoother.stable();
        assert_eq!(stable.get(&key("kiwi")), 0);
        assert_eq!(stable.get(&key("mango")), 5);
    }

    #[test]
    fn new_category_appears_once_it_holds_half_the_window() {
        let mut smoother = TemporalSmoother::new(4, SmoothingMethod::Median);
        for _ in 0..4 {
            smoother.observe(&frame(&[]));
        }
        smoother.observe(&frame(&[("kiwi", 2)]));
        assert_eq!(smoother.stable().get(&key("kiwi")), 0);
        smoother.observe(&frame(&[("kiwi", 2)]));
        smoother.observe(&frame(&[("kiwi", 2)]));
        assert_eq!(smoother.stable().get(&key("kiwi")), 2);
    }

    #[test]
    fn empty_smoother_reports_nothing() {
        let smoother = TemporalSmoother::new(10, SmoothingMethod::Median);
        assert!(smoother.stable().is_empty());
        assert_eq!(smoother.frames_seen(), 0);
    }

    #[test]
    fn handle_counts_frames() {
        let handle = SmootherHandle::new(TemporalSmoother::new(5, SmoothingMethod::Mean));
        let feeder = handle.clone();
        feeder.observe_frame(&frame(&[("apple", 3)]));
        feeder.observe_frame(&frame(&[("apple", 3)]));
        let (counts, frames) = handle.stable_counts();
        assert_eq!(frames, 2);
        assert_eq!(counts.get(&key("apple")), 3);
    }
}
