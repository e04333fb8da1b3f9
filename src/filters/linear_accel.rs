use nalgebra::Vector3;

use crate::types::{AccelKind, AccelerationSample};

/// Separates motion-induced acceleration from gravity.
///
/// Platforms that report linear acceleration are passed straight through.
/// Gravity-inclusive readings feed a per-axis exponential low-pass that
/// tracks the gravity vector; the residual is the linear part.
pub struct LinearAccelerationEstimator {
    alpha: f64,
    gravity: Vector3<f64>,
}

impl LinearAccelerationEstimator {
    /// `alpha` is the weight kept on the previous gravity estimate (0.8 by default)
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            gravity: Vector3::zeros(),
        }
    }

    /// Linear acceleration for one sample. None for a reading with a
    /// non-finite axis, which never reaches the gravity estimate.
    pub fn update(&mut self, sample: &AccelerationSample) -> Option<Vector3<f64>> {
        let raw = sample.vector();
        if !raw.iter().all(|v| v.is_finite()) {
            return None;
        }
        match sample.kind {
            AccelKind::Linear => Some(raw),
            AccelKind::IncludingGravity => {
                self.gravity = self.gravity * self.alpha + raw * (1.0 - self.alpha);
                Some(raw - self.gravity)
            }
        }
    }

    pub fn gravity(&self) -> Vector3<f64> {
        self.gravity
    }
}

impl Default for LinearAccelerationEstimator {
    fn default() -> Self {
        Self::new(0.8)
    }
}
