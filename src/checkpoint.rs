//! Beacon ranging and forward-only step correction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::NavConfig;
use crate::types::{BeaconObservation, Checkpoint};

/// Log-distance path-loss model calibrated at 1 m.
#[derive(Clone, Copy, Debug)]
pub struct PathLossModel {
    pub tx_power_dbm: f64,
    pub env_factor: f64,
}

impl Default for PathLossModel {
    fn default() -> Self {
        Self {
            tx_power_dbm: -59.0,
            env_factor: 2.0,
        }
    }
}

impl PathLossModel {
    /// Estimated distance in meters, None when the reading carries no signal
    pub fn distance(&self, rssi: i32) -> Option<f64> {
        if rssi == 0 {
            return None;
        }
        let rssi = rssi as f64;
        let ratio = rssi / self.tx_power_dbm;
        let distance = if ratio < 1.0 {
            ratio.powi(10)
        } else {
            10f64.powf((self.tx_power_dbm - rssi) / (10.0 * self.env_factor))
        };
        distance.is_finite().then_some(distance)
    }
}

/// Latest sighting of one beacon, kept for diagnostics
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BeaconSighting {
    pub id: String,
    pub name: Option<String>,
    pub rssi: i32,
    pub distance_m: Option<f64>,
    pub timestamp: f64,
}

/// A forward snap applied to the step count
#[derive(Clone, Debug, PartialEq)]
pub struct StepCorrection {
    pub beacon_name: String,
    pub from: u32,
    pub to: u32,
    pub distance_m: f64,
}

pub struct CheckpointCorrector {
    model: PathLossModel,
    checkpoints: Vec<Checkpoint>,
    sightings: BTreeMap<String, BeaconSighting>,
}

impl CheckpointCorrector {
    pub fn new(model: PathLossModel, checkpoints: Vec<Checkpoint>) -> Self {
        Self {
            model,
            checkpoints,
            sightings: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &NavConfig) -> Self {
        Self::new(
            PathLossModel {
                tx_power_dbm: config.tx_power_dbm,
                env_factor: config.env_factor,
            },
            config.checkpoints.clone(),
        )
    }

    /// Record the observation and return the corrected step count if a
    /// checkpoint is in range and ahead of `step_count`.
    pub fn observe(&mut self, obs: &BeaconObservation, step_count: u32) -> Option<StepCorrection> {
        let distance = self.model.distance(obs.rssi);
        self.sightings.insert(
            obs.id.clone(),
            BeaconSighting {
                id: obs.id.clone(),
                name: obs.name.clone(),
                rssi: obs.rssi,
                distance_m: distance,
                timestamp: obs.timestamp,
            },
        );

        let distance = distance?;
        let name = obs.name.as_deref()?;

        // Several checkpoints may share a beacon; take the furthest one that applies
        self.checkpoints
            .iter()
            .filter(|cp| cp.beacon_name == name)
            .filter(|cp| distance < cp.radius_m && step_count < cp.step_value)
            .max_by_key(|cp| cp.step_value)
            .map(|cp| StepCorrection {
                beacon_name: cp.beacon_name.clone(),
                from: step_count,
                to: cp.step_value,
                distance_m: distance,
            })
    }

    /// Sightings ordered by beacon id
    pub fn sightings(&self) -> Vec<BeaconSighting> {
        self.sightings.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// RSSI that the default model maps to (about) `meters` for ratio >= 1
    fn rssi_for(meters: f64) -> i32 {
        (-59.0 - 20.0 * meters.log10()).round() as i32
    }

    fn corrector() -> CheckpointCorrector {
        CheckpointCorrector::new(
            PathLossModel::default(),
            vec![Checkpoint::new("stairwell", 5, 1.5)],
        )
    }

    #[test]
    fn test_distance_model() {
        let model = PathLossModel::default();
        assert!(model.distance(0).is_none());
        assert_relative_eq!(model.distance(-59).unwrap(), 1.0);
        // ratio < 1 branch: (-50 / -59)^10
        assert_relative_eq!(model.distance(-50).unwrap(), (50.0f64 / 59.0).powi(10), epsilon = 1e-12);
        // ratio >= 1 branch: 10^((−59 + 79) / 20) = 10
        assert_relative_eq!(model.distance(-79).unwrap(), 10.0, epsilon = 1e-9);
        assert_eq!(rssi_for(1.0), -59);
    }

    #[test]
    fn test_snaps_forward_when_close() {
        let mut c = corrector();
        let obs = BeaconObservation::new("b1", Some("stairwell"), -59, 1.0);
        let correction = c.observe(&obs, 2).unwrap();
        assert_eq!(correction.from, 2);
        assert_eq!(correction.to, 5);
        assert_relative_eq!(correction.distance_m, 1.0);
    }

    #[test]
    fn test_never_regresses() {
        let mut c = corrector();
        let obs = BeaconObservation::new("b1", Some("stairwell"), -59, 1.0);
        assert!(c.observe(&obs, 7).is_none());
        assert!(c.observe(&obs, 5).is_none());
    }

    #[test]
    fn test_out_of_range_or_unknown_ignored() {
        let mut c = corrector();
        let far = BeaconObservation::new("b1", Some("stairwell"), rssi_for(3.0), 1.0);
        assert!(c.observe(&far, 2).is_none());

        let silent = BeaconObservation::new("b1", Some("stairwell"), 0, 2.0);
        assert!(c.observe(&silent, 2).is_none());

        let unnamed = BeaconObservation::new("b2", None, -59, 3.0);
        assert!(c.observe(&unnamed, 2).is_none());

        let other = BeaconObservation::new("b3", Some("lobby"), -59, 4.0);
        assert!(c.observe(&other, 2).is_none());
    }

    #[test]
    fn test_sightings_kept_for_diagnostics() {
        let mut c = corrector();
        c.observe(&BeaconObservation::new("b2", None, 0, 1.0), 0);
        c.observe(&BeaconObservation::new("b1", Some("stairwell"), -70, 2.0), 0);
        c.observe(&BeaconObservation::new("b1", Some("stairwell"), -59, 3.0), 0);

        let sightings = c.sightings();
        assert_eq!(sightings.len(), 2);
        assert_eq!(sightings[0].id, "b1");
        assert_eq!(sightings[0].rssi, -59);
        assert!(sightings[1].distance_m.is_none());
    }
}
