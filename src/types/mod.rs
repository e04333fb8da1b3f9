use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Raw compass heading after platform correction, degrees in [0, 360)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadingSample {
    pub timestamp: f64,
    pub heading_deg: f64,
}

impl HeadingSample {
    pub fn new(heading_deg: f64, timestamp: f64) -> Self {
        Self {
            timestamp,
            heading_deg: crate::bearing::normalize_heading(heading_deg),
        }
    }
}

/// Whether an accelerometer reading still contains gravity
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccelKind {
    Linear,
    IncludingGravity,
}

/// Accelerometer reading in m/s²
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub timestamp: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub kind: AccelKind,
}

impl AccelerationSample {
    pub fn linear(x: f64, y: f64, z: f64, timestamp: f64) -> Self {
        Self { timestamp, x, y, z, kind: AccelKind::Linear }
    }

    pub fn with_gravity(x: f64, y: f64, z: f64, timestamp: f64) -> Self {
        Self { timestamp, x, y, z, kind: AccelKind::IncludingGravity }
    }

    pub fn vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

/// One confirmed footfall
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    pub sequence: u64,
    pub timestamp: f64,
}

/// Decoded advertisement from a short-range radio beacon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconObservation {
    pub timestamp: f64,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Received signal strength in dBm; 0 means no reading
    pub rssi: i32,
}

impl BeaconObservation {
    pub fn new(id: &str, name: Option<&str>, rssi: i32, timestamp: f64) -> Self {
        Self {
            timestamp,
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi,
        }
    }
}

/// Known physical location on the route, tied to a beacon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub beacon_name: String,
    pub step_value: u32,
    pub radius_m: f64,
}

impl Checkpoint {
    pub fn new(beacon_name: &str, step_value: u32, radius_m: f64) -> Self {
        Self {
            beacon_name: beacon_name.to_string(),
            step_value,
            radius_m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_sample_is_normalized() {
        assert_eq!(HeadingSample::new(370.0, 0.0).heading_deg, 10.0);
        assert_eq!(HeadingSample::new(-10.0, 0.0).heading_deg, 350.0);
    }

    #[test]
    fn test_accel_kind_serialization() {
        let sample = AccelerationSample::with_gravity(0.0, 0.0, 9.81, 1.5);
        let json = serde_json::to_string(&sample).unwrap();
        assert!(json.contains("\"including_gravity\""));
        let back: AccelerationSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, AccelKind::IncludingGravity);
        assert_eq!(back.vector().norm(), 9.81);
    }
}
