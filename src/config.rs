use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{NavError, NavResult};
use crate::types::Checkpoint;

/// Tunables for one navigation session.
///
/// Every field has a default, so a JSON config only needs the keys it
/// changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NavConfig {
    // ── Route ──
    pub destination_bearing_deg: f64,
    pub total_steps: u32,
    pub arrival_threshold: f64,
    pub checkpoints: Vec<Checkpoint>,

    // ── Heading smoothing ──
    pub heading_window: usize,

    // ── Gravity removal ──
    pub gravity_alpha: f64,

    // ── Step detection ──
    pub step_threshold: f64,
    pub step_release_ratio: f64,
    pub step_lockout_secs: f64,

    // ── Beacon ranging ──
    pub tx_power_dbm: f64,
    pub env_factor: f64,

    // ── Calibration ──
    pub calibration_segments: usize,
    pub skip_grace_secs: f64,

    // ── Sensor health ──
    pub heading_silence_secs: f64,
    pub motion_silence_secs: f64,
    pub beacon_silence_secs: f64,
}

impl Default for NavConfig {
    fn default() -> Self {
        Self {
            destination_bearing_deg: 296.0,
            total_steps: 10,
            arrival_threshold: 0.5,
            checkpoints: Vec::new(),
            heading_window: 10,
            gravity_alpha: 0.8,
            step_threshold: 1.8,
            step_release_ratio: 0.7,
            step_lockout_secs: 0.4,
            tx_power_dbm: -59.0,
            env_factor: 2.0,
            calibration_segments: 12,
            skip_grace_secs: 7.0,
            heading_silence_secs: 3.0,
            motion_silence_secs: 3.0,
            beacon_silence_secs: 10.0,
        }
    }
}

impl NavConfig {
    /// Load from a JSON file and validate
    pub fn load(path: impl AsRef<Path>) -> NavResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: NavConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> NavResult<()> {
        if !self.destination_bearing_deg.is_finite() {
            return Err(NavError::Config("destination bearing must be finite".to_string()));
        }
        if self.total_steps == 0 {
            return Err(NavError::Config("total_steps must be positive".to_string()));
        }
        if self.heading_window == 0 {
            return Err(NavError::Config("heading_window must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.gravity_alpha) {
            return Err(NavError::Config(format!(
                "gravity_alpha {} outside [0, 1]",
                self.gravity_alpha
            )));
        }
        if !(self.step_threshold > 0.0 && self.step_threshold.is_finite()) {
            return Err(NavError::Config("step_threshold must be positive".to_string()));
        }
        if !(0.0..1.0).contains(&self.step_release_ratio) {
            return Err(NavError::Config(format!(
                "step_release_ratio {} outside [0, 1)",
                self.step_release_ratio
            )));
        }
        if !(self.step_lockout_secs >= 0.0 && self.step_lockout_secs.is_finite()) {
            return Err(NavError::Config("step_lockout_secs must be finite and not negative".to_string()));
        }
        if !(self.arrival_threshold >= 0.0 && self.arrival_threshold.is_finite()) {
            return Err(NavError::Config("arrival_threshold must be finite and not negative".to_string()));
        }
        let ranging_ok = self.tx_power_dbm < 0.0 && self.tx_power_dbm.is_finite();
        if !(ranging_ok && self.env_factor > 0.0 && self.env_factor.is_finite()) {
            return Err(NavError::Config(
                "tx_power_dbm must be negative and env_factor positive".to_string(),
            ));
        }
        if self.calibration_segments == 0 || self.calibration_segments > 64 {
            return Err(NavError::Config(format!(
                "calibration_segments {} outside 1..=64",
                self.calibration_segments
            )));
        }
        let timings = [
            ("skip_grace_secs", self.skip_grace_secs),
            ("heading_silence_secs", self.heading_silence_secs),
            ("motion_silence_secs", self.motion_silence_secs),
            ("beacon_silence_secs", self.beacon_silence_secs),
        ];
        for (name, secs) in timings {
            if !(secs >= 0.0 && secs.is_finite()) {
                return Err(NavError::Config(format!("{} must be finite and not negative", name)));
            }
        }
        for cp in &self.checkpoints {
            if !(cp.radius_m > 0.0 && cp.radius_m.is_finite()) {
                return Err(NavError::Config(format!(
                    "checkpoint {} needs a finite positive radius",
                    cp.beacon_name
                )));
            }
        }
        Ok(())
    }

    /// Step count at which the session counts as arrived
    pub fn arrival_step_count(&self) -> f64 {
        self.total_steps as f64 - self.arrival_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NavConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arrival_step_count(), 9.5);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "destination_bearing_deg": 90.0,
            "checkpoints": [{ "beacon_name": "lobby", "step_value": 5, "radius_m": 1.5 }]
        }"#;
        let config: NavConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.destination_bearing_deg, 90.0);
        assert_eq!(config.total_steps, 10);
        assert_eq!(config.checkpoints.len(), 1);
        assert_eq!(config.checkpoints[0].step_value, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = NavConfig { heading_window: 0, ..NavConfig::default() };
        assert!(matches!(config.validate(), Err(NavError::Config(_))));

        let config = NavConfig { step_release_ratio: 1.2, ..NavConfig::default() };
        assert!(config.validate().is_err());

        let config = NavConfig {
            checkpoints: vec![Checkpoint::new("hall", 3, 0.0)],
            ..NavConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nan_values_rejected() {
        let nan = f64::NAN;
        let configs = [
            NavConfig { step_threshold: nan, ..NavConfig::default() },
            NavConfig { step_lockout_secs: nan, ..NavConfig::default() },
            NavConfig { arrival_threshold: nan, ..NavConfig::default() },
            NavConfig { env_factor: nan, ..NavConfig::default() },
            NavConfig { tx_power_dbm: nan, ..NavConfig::default() },
            NavConfig { skip_grace_secs: nan, ..NavConfig::default() },
            NavConfig { motion_silence_secs: f64::INFINITY, ..NavConfig::default() },
            NavConfig {
                checkpoints: vec![Checkpoint::new("hall", 3, nan)],
                ..NavConfig::default()
            },
        ];
        for config in configs {
            assert!(matches!(config.validate(), Err(NavError::Config(_))), "{:?}", config);
        }
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("wayfind_config_{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "total_steps": 20 }"#).unwrap();
        let config = NavConfig::load(&path).unwrap();
        assert_eq!(config.total_steps, 20);
        let _ = std::fs::remove_file(&path);

        assert!(matches!(NavConfig::load("/nonexistent/wayfind.json"), Err(NavError::Io(_))));
    }
}
