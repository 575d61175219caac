//! [`RateTracker`] – rolling-window event rate estimate.
//!
//! Records the instant of each [`RateTracker::tick`] and reports the average
//! rate over the last `window` ticks.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use meshlink_bridge::rate::RateTracker;
//!
//! let mut rt = RateTracker::new(10);
//! let start = Instant::now();
//! for i in 0..5 {
//!     rt.tick_at(start + Duration::from_millis(100 * i));
//! }
//! let hz = rt.rate_avg().unwrap();
//! assert!((hz - 10.0).abs() < 1e-6);
//! ```

use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct RateTracker {
    window: usize,
    ticks: VecDeque<Instant>,
}

impl RateTracker {
    /// Track the rate over the most recent `window` ticks (at least 2).
    pub fn new(window: usize) -> Self {
        let window = window.max(2);
        Self {
            window,
            ticks: VecDeque::with_capacity(window),
        }
    }

    /// Record a tick now.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// Record a tick at `at`.
    pub fn tick_at(&mut self, at: Instant) {
        self.ticks.push_back(at);
        while self.ticks.len() > self.window {
            self.ticks.pop_front();
        }
    }

    /// Average ticks per second across the window, or `None` until two
    /// distinct instants have been recorded.
    pub fn rate_avg(&self) -> Option<f64> {
        let (first, last) = (self.ticks.front()?, self.ticks.back()?);
        let span = last.saturating_duration_since(*first).as_secs_f64();
        if span <= 0.0 {
            return None;
        }
        Some((self.ticks.len() - 1) as f64 / span)
    }

    pub fn reset(&mut self) {
        self.ticks.clear();
    }
}
