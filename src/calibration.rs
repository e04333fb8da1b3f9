//! Compass calibration coverage: the user turns the phone through a full
//! circle and every 30° sector has to be seen at least once.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProgress {
    pub covered: usize,
    pub total: usize,
    pub fraction: f64,
}

pub struct CalibrationTracker {
    segments: usize,
    coverage: u64,
    started_at: f64,
    skip_grace_secs: f64,
    completed: bool,
}

impl CalibrationTracker {
    /// `segments` must be in 1..=64
    pub fn new(segments: usize, started_at: f64, skip_grace_secs: f64) -> Self {
        Self {
            segments: segments.clamp(1, 64),
            coverage: 0,
            started_at,
            skip_grace_secs,
            completed: false,
        }
    }

    fn sector_width(&self) -> f64 {
        360.0 / self.segments as f64
    }

    /// Sector index for a heading in [0, 360)
    pub fn sector_of(&self, heading_deg: f64) -> usize {
        let heading = crate::bearing::normalize_heading(heading_deg);
        ((heading / self.sector_width()).floor() as usize).min(self.segments - 1)
    }

    /// Record a smoothed heading. Returns true exactly once, on the sample
    /// that completes coverage. Non-finite headings cover nothing.
    pub fn record(&mut self, heading_deg: f64) -> bool {
        if !heading_deg.is_finite() {
            return false;
        }
        let sector = self.sector_of(heading_deg);
        self.coverage |= 1u64 << sector;

        if !self.completed && self.covered() == self.segments {
            self.completed = true;
            return true;
        }
        false
    }

    pub fn covered(&self) -> usize {
        self.coverage.count_ones() as usize
    }

    pub fn covered_sectors(&self) -> Vec<usize> {
        (0..self.segments)
            .filter(|s| self.coverage & (1u64 << s) != 0)
            .collect()
    }

    pub fn progress(&self) -> CalibrationProgress {
        let covered = self.covered();
        CalibrationProgress {
            covered,
            total: self.segments,
            fraction: covered as f64 / self.segments as f64,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Seconds until the skip button may be offered (0 once available)
    pub fn skip_remaining(&self, now: f64) -> f64 {
        (self.started_at + self.skip_grace_secs - now).max(0.0)
    }

    pub fn can_skip(&self, now: f64) -> bool {
        self.skip_remaining(now) <= 0.0
    }
}
