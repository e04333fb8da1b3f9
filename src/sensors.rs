//! Simulated platform for desktop runs: permission prompts, a camera, and
//! producers for the three sensor streams.
//!
//! Each producer ticks at its own rate, waits for its stream to be
//! subscribed, then pushes synthetic readings through the session handle.
//! Signal time starts when the stream opens.

use std::f64::consts::PI;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, sleep, Duration, Instant};

use crate::bearing::normalize_heading;
use crate::error::CameraError;
use crate::heading_source::{HeadingSourceKind, OrientationReading};
use crate::platform::{CameraStream, MotionPermission, PermissionApi, StreamKind};
use crate::runtime::{PushOutcome, SessionHandle};
use crate::types::{AccelerationSample, BeaconObservation};

pub const GRAVITY: f64 = 9.81;

/// Phone rotation: a steady sweep for calibration, then hold a heading
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeadingPlan {
    pub start_deg: f64,
    pub sweep_deg_per_sec: f64,
    /// Total rotation before settling
    pub sweep_deg: f64,
    pub settle_deg: f64,
    /// Amplitude of hand tremor once settled
    pub wobble_deg: f64,
}

impl Default for HeadingPlan {
    fn default() -> Self {
        Self {
            start_deg: 0.0,
            sweep_deg_per_sec: 60.0,
            sweep_deg: 420.0,
            settle_deg: 296.0,
            wobble_deg: 2.0,
        }
    }
}

impl HeadingPlan {
    pub fn sweep_secs(&self) -> f64 {
        if self.sweep_deg_per_sec <= 0.0 {
            0.0
        } else {
            self.sweep_deg / self.sweep_deg_per_sec
        }
    }

    pub fn heading_at(&self, t: f64) -> f64 {
        if t < self.sweep_secs() {
            normalize_heading(self.start_deg + self.sweep_deg_per_sec * t)
        } else {
            let settled = t - self.sweep_secs();
            normalize_heading(self.settle_deg + self.wobble_deg * (settled * 1.3).sin())
        }
    }
}

/// Build the orientation event a platform of the given kind would deliver
pub fn orientation_reading(kind: HeadingSourceKind, heading_deg: f64, timestamp: f64) -> OrientationReading {
    match kind {
        HeadingSourceKind::CompassHeading => OrientationReading {
            timestamp,
            compass_heading: Some(heading_deg),
            alpha: None,
            absolute: true,
        },
        HeadingSourceKind::OrientationAlpha => OrientationReading {
            timestamp,
            compass_heading: None,
            alpha: Some(normalize_heading(360.0 - heading_deg)),
            absolute: true,
        },
    }
}

/// Walking accelerometer trace: one vertical impact pulse per step on top
/// of gravity, with a little lateral sway
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WalkPlan {
    pub step_period_secs: f64,
    pub pulse_secs: f64,
    /// Peak of the impact pulse (m/s²)
    pub amplitude: f64,
    pub sway: f64,
}

impl Default for WalkPlan {
    fn default() -> Self {
        Self {
            step_period_secs: 0.6,
            pulse_secs: 0.16,
            amplitude: 6.0,
            sway: 0.3,
        }
    }
}

impl WalkPlan {
    pub fn sample_at(&self, t: f64, timestamp: f64) -> AccelerationSample {
        let phase = t.rem_euclid(self.step_period_secs);
        let impact = if phase < self.pulse_secs {
            self.amplitude * (PI * phase / self.pulse_secs).sin()
        } else {
            0.0
        };
        let x = self.sway * (2.0 * PI * t / self.step_period_secs).sin();
        AccelerationSample::with_gravity(x, 0.0, GRAVITY + impact, timestamp)
    }
}

/// A beacon that gets stronger as the walker approaches it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BeaconPlan {
    pub id: String,
    pub name: Option<String>,
    /// Seconds of walking before the beacon is in close range
    pub near_after_secs: f64,
    pub far_rssi: i32,
    pub near_rssi: i32,
}

impl BeaconPlan {
    pub fn new(id: &str, name: &str, near_after_secs: f64) -> Self {
        Self {
            id: id.to_string(),
            name: Some(name.to_string()),
            near_after_secs,
            far_rssi: -88,
            near_rssi: -55,
        }
    }

    pub fn observation_at(&self, t: f64, timestamp: f64) -> BeaconObservation {
        let rssi = if t >= self.near_after_secs {
            self.near_rssi
        } else {
            self.far_rssi
        };
        BeaconObservation::new(&self.id, self.name.as_deref(), rssi, timestamp)
    }
}

/// Tick at `period`, and once `kind` is open, call `emit(signal_time, now)`.
/// Ends when the session is gone.
async fn run_producer<F>(handle: SessionHandle, kind: StreamKind, period: Duration, mut emit: F)
where
    F: FnMut(&SessionHandle, f64, f64) -> PushOutcome,
{
    let mut ticker = interval(period);
    let mut opened_at: Option<f64> = None;
    let mut sample_count = 0u64;
    let label = kind.label().to_lowercase();

    loop {
        ticker.tick().await;
        if handle.is_closed() {
            break;
        }
        if !handle.is_open(kind) {
            continue;
        }

        let now = handle.elapsed();
        let start = *opened_at.get_or_insert(now);
        match emit(&handle, now - start, now) {
            PushOutcome::Delivered => {
                sample_count += 1;
                if sample_count % 100 == 0 {
                    log::debug!("[{}] {} samples", label, sample_count);
                }
            }
            PushOutcome::Closed => break,
            // Stream closed between the check and the push, or queue full
            PushOutcome::Gated | PushOutcome::Dropped => {}
        }
    }
    log::info!("[{}] producer stopped after {} samples", label, sample_count);
}

pub async fn compass_loop(handle: SessionHandle, plan: HeadingPlan, kind: HeadingSourceKind) {
    // ~20Hz
    run_producer(handle, StreamKind::Heading, Duration::from_millis(50), |h, t, now| {
        h.push_orientation(orientation_reading(kind, plan.heading_at(t), now))
    })
    .await
}

pub async fn walk_loop(handle: SessionHandle, plan: WalkPlan) {
    // ~50Hz
    run_producer(handle, StreamKind::Motion, Duration::from_millis(20), |h, t, now| {
        h.push_motion(plan.sample_at(t, now))
    })
    .await
}

pub async fn beacon_loop(handle: SessionHandle, beacons: Vec<BeaconPlan>) {
    if beacons.is_empty() {
        return;
    }
    // One advertisement per beacon per second
    let mut next = 0usize;
    let period = Duration::from_millis(1000 / beacons.len().min(1000) as u64);
    run_producer(handle, StreamKind::Beacon, period, |h, t, now| {
        let beacon = &beacons[next % beacons.len()];
        next += 1;
        h.push_beacon(beacon.observation_at(t, now))
    })
    .await
}

/// Camera that only logs its lifetime
pub struct SimulatedCamera {
    started: Instant,
    running: bool,
}

impl SimulatedCamera {
    pub fn start() -> Self {
        log::info!("[camera] capture started");
        Self {
            started: Instant::now(),
            running: true,
        }
    }
}

impl CameraStream for SimulatedCamera {
    fn stop(&mut self) {
        if self.running {
            self.running = false;
            log::info!("[camera] capture stopped after {:.1}s", self.started.elapsed().as_secs_f64());
        }
    }
}

/// Permission prompts that resolve after `delay` with fixed outcomes
#[derive(Clone, Debug)]
pub struct SimulatedPermissions {
    pub motion: MotionPermission,
    /// None grants the camera
    pub camera_failure: Option<CameraError>,
    pub delay: Duration,
}

impl Default for SimulatedPermissions {
    fn default() -> Self {
        Self {
            motion: MotionPermission::Granted,
            camera_failure: None,
            delay: Duration::from_millis(300),
        }
    }
}

impl PermissionApi for SimulatedPermissions {
    fn request_motion_permission(&self) -> BoxFuture<'static, MotionPermission> {
        let (delay, outcome) = (self.delay, self.motion);
        async move {
            sleep(delay).await;
            outcome
        }
        .boxed()
    }

    fn request_camera_access(&self) -> BoxFuture<'static, Result<Box<dyn CameraStream>, CameraError>> {
        let (delay, failure) = (self.delay, self.camera_failure);
        async move {
            sleep(delay).await;
            match failure {
                Some(cause) => Err(cause),
                None => Ok(Box::new(SimulatedCamera::start()) as Box<dyn CameraStream>),
            }
        }
        .boxed()
    }
}
