use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::checkpoint::BeaconSighting;
use crate::error::AccessFailure;
use crate::sensor_health::StreamReport;
use crate::session::NavState;

/// Snapshot of a session for the presentation layer
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct NavStatus {
    pub session_id: String,
    pub state: NavState,
    pub closed: bool,
    /// Where to point the arrow, degrees in (-180, 180]
    pub relative_bearing_deg: f64,
    pub steps_remaining: u32,
    pub calibration_progress: f64,
    pub can_skip_calibration: bool,
    /// Only set while calibrating
    pub skip_available_in_secs: Option<f64>,
    pub last_failure: Option<AccessFailure>,
    pub failure_message: Option<String>,
    pub diagnostics: Diagnostics,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Diagnostics {
    pub clock_secs: f64,
    pub heading_source: String,
    pub raw_heading: Option<f64>,
    pub smoothed_heading: Option<f64>,
    pub simulated_heading: Option<f64>,
    pub destination_bearing: f64,
    pub relative_bearing: f64,
    pub step_count: u32,
    // Gravity estimate (m/s²)
    pub gravity: [f64; 3],
    pub calibration_sectors: Vec<usize>,
    pub beacons: Vec<BeaconSighting>,
    pub sensor_health: Vec<StreamReport>,
}

impl NavStatus {
    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// One-line summary for periodic console output
    pub fn summary_line(&self) -> String {
        let heading = self
            .diagnostics
            .simulated_heading
            .or(self.diagnostics.smoothed_heading)
            .map(|h| format!("{:.1}°", h))
            .unwrap_or_else(|| "--".to_string());
        format!(
            "[{:?}] heading {} | turn {:+.1}° | steps {} (remaining {}) | calib {:.0}%",
            self.state,
            heading,
            self.relative_bearing_deg,
            self.diagnostics.step_count,
            self.steps_remaining,
            self.calibration_progress * 100.0
        )
    }
}
