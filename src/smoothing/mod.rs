//! Frame-rate smoothing of raw detector counts.

mod method;
mod smoother;

pub use method::SmoothingMethod;
pub use smoother::{SmootherHandle, TemporalSmoother};
