//! Platform heading adapters.
//!
//! Some platforms expose a ready-made compass heading (clockwise from
//! north), others only the orientation `alpha` angle which increases
//! counter-clockwise. One adapter is chosen when the session starts and
//! every orientation reading goes through it.

use serde::{Deserialize, Serialize};

use crate::bearing::normalize_heading;
use crate::types::HeadingSample;

/// Raw orientation event as delivered by the host
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrientationReading {
    pub timestamp: f64,
    /// Compass heading field, clockwise from north
    #[serde(default)]
    pub compass_heading: Option<f64>,
    /// Orientation alpha angle, counter-clockwise
    #[serde(default)]
    pub alpha: Option<f64>,
    /// Whether `alpha` is referenced to north rather than the start pose
    #[serde(default)]
    pub absolute: bool,
}

pub trait HeadingSource: Send {
    fn name(&self) -> &'static str;

    /// Convert a reading into a heading sample, None if the reading carries
    /// nothing this source can use
    fn heading(&self, reading: &OrientationReading) -> Option<HeadingSample>;
}

/// Uses the compass heading field directly
#[derive(Clone, Copy, Debug, Default)]
pub struct CompassHeadingSource;

impl HeadingSource for CompassHeadingSource {
    fn name(&self) -> &'static str {
        "compass_heading"
    }

    fn heading(&self, reading: &OrientationReading) -> Option<HeadingSample> {
        let heading = reading.compass_heading.filter(|h| h.is_finite())?;
        Some(HeadingSample::new(heading, reading.timestamp))
    }
}

/// Converts the orientation alpha angle: heading = 360 − alpha
#[derive(Clone, Copy, Debug)]
pub struct OrientationAlphaSource {
    /// Drop readings that are not north-referenced
    pub require_absolute: bool,
}

impl Default for OrientationAlphaSource {
    fn default() -> Self {
        Self { require_absolute: true }
    }
}

impl HeadingSource for OrientationAlphaSource {
    fn name(&self) -> &'static str {
        "orientation_alpha"
    }

    fn heading(&self, reading: &OrientationReading) -> Option<HeadingSample> {
        if self.require_absolute && !reading.absolute {
            return None;
        }
        let alpha = reading.alpha.filter(|a| a.is_finite())?;
        Some(HeadingSample::new(normalize_heading(360.0 - alpha), reading.timestamp))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum HeadingSourceKind {
    CompassHeading,
    OrientationAlpha,
}

impl HeadingSourceKind {
    pub fn build(self) -> Box<dyn HeadingSource> {
        match self {
            HeadingSourceKind::CompassHeading => Box::new(CompassHeadingSource),
            HeadingSourceKind::OrientationAlpha => Box::new(OrientationAlphaSource::default()),
        }
    }

    /// Pick the adapter from the first reading the host delivers
    pub fn detect(reading: &OrientationReading) -> Self {
        if reading.compass_heading.is_some() {
            HeadingSourceKind::CompassHeading
        } else {
            HeadingSourceKind::OrientationAlpha
        }
    }
}
