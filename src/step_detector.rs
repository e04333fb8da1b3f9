//! Peak/trough step detection on linear acceleration magnitude.
//!
//! A footfall shows up as a spike in |a| followed by a drop. The detector
//! arms when the magnitude rises above `threshold` and confirms the step
//! when it falls back below `release_ratio * threshold`. After each
//! confirmed step a fixed lockout window swallows every sample, so a
//! ringing trace from one footfall cannot count twice.

use nalgebra::Vector3;

use crate::config::NavConfig;
use crate::types::StepEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPhase {
    Idle,
    /// Magnitude crossed the upper threshold; waiting for the drop
    Potential,
}

#[derive(Clone, Debug)]
pub struct StepDetectorConfig {
    pub threshold: f64,
    pub release_ratio: f64,
    pub lockout_secs: f64,
}

impl Default for StepDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 1.8,
            release_ratio: 0.7,
            lockout_secs: 0.4,
        }
    }
}

impl From<&NavConfig> for StepDetectorConfig {
    fn from(config: &NavConfig) -> Self {
        Self {
            threshold: config.step_threshold,
            release_ratio: config.step_release_ratio,
            lockout_secs: config.step_lockout_secs,
        }
    }
}

pub struct StepDetector {
    config: StepDetectorConfig,
    phase: StepPhase,
    last_step_time: Option<f64>,
    steps_emitted: u64,
}

impl StepDetector {
    pub fn new(config: StepDetectorConfig) -> Self {
        Self {
            config,
            phase: StepPhase::Idle,
            last_step_time: None,
            steps_emitted: 0,
        }
    }

    /// Feed one linear-acceleration vector. Returns the step it confirms, if any.
    pub fn update(&mut self, linear: Vector3<f64>, timestamp: f64) -> Option<StepEvent> {
        self.update_magnitude(linear.norm(), timestamp)
    }

    pub fn update_magnitude(&mut self, magnitude: f64, timestamp: f64) -> Option<StepEvent> {
        if self.in_lockout(timestamp) {
            return None;
        }

        match self.phase {
            StepPhase::Idle => {
                if magnitude > self.config.threshold {
                    self.phase = StepPhase::Potential;
                }
                None
            }
            StepPhase::Potential => {
                if magnitude < self.config.threshold * self.config.release_ratio {
                    self.phase = StepPhase::Idle;
                    self.last_step_time = Some(timestamp);
                    self.steps_emitted += 1;
                    Some(StepEvent {
                        sequence: self.steps_emitted,
                        timestamp,
                    })
                } else {
                    None
                }
            }
        }
    }

    fn in_lockout(&self, timestamp: f64) -> bool {
        self.last_step_time
            .map(|last| timestamp - last < self.config.lockout_secs)
            .unwrap_or(false)
    }

    pub fn phase(&self) -> StepPhase {
        self.phase
    }

}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new(StepDetectorConfig::default())
    }
}
