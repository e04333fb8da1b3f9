use std::collections::VecDeque;

use crate::bearing::normalize_heading;

/// Circular-mean smoothing for compass headings.
///
/// A plain arithmetic mean of 359° and 1° gives 180°, so the window is
/// averaged as unit vectors. When a new sample lands more than 180° away
/// from the current mean the window is flushed and restarted from that
/// sample.
pub struct HeadingFilter {
    window: VecDeque<f64>,
    window_size: usize,
}

impl HeadingFilter {
    /// Create a new filter with given window size (typically 10)
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        HeadingFilter {
            window: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    /// Push a raw heading and return the smoothed heading in [0, 360).
    ///
    /// Non-finite readings are dropped and leave the window untouched.
    pub fn apply(&mut self, heading_deg: f64) -> Option<f64> {
        if !heading_deg.is_finite() {
            return None;
        }
        let heading = normalize_heading(heading_deg);

        if let Some(mean) = self.smoothed() {
            if (heading - mean).abs() > 180.0 {
                self.window.clear();
            }
        }

        self.window.push_back(heading);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        Some(self.smoothed().unwrap_or(heading))
    }

    /// Circular mean of the current window, None when empty
    pub fn smoothed(&self) -> Option<f64> {
        if self.window.is_empty() {
            return None;
        }

        let (sum_sin, sum_cos) = self.window.iter().fold((0.0, 0.0), |(s, c), h| {
            let rad = h.to_radians();
            (s + rad.sin(), c + rad.cos())
        });

        Some(normalize_heading(sum_sin.atan2(sum_cos).to_degrees()))
    }

    /// Get current window size (actual, not max)
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Check if window is empty
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}
