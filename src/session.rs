//! Navigation session state machine.
//!
//! One `NavigationSession` covers a single attempt at reaching the
//! destination. It owns every filter buffer, the camera handle and the
//! sensor subscriptions, and is driven by exactly one writer (see
//! `runtime`). Each input returns the `SessionEvent`s it produced.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::bearing::{normalize_heading, relative_bearing};
use crate::calibration::{CalibrationProgress, CalibrationTracker};
use crate::checkpoint::CheckpointCorrector;
use crate::config::NavConfig;
use crate::error::{AccessFailure, CameraError, NavError, NavResult};
use crate::filters::{HeadingFilter, LinearAccelerationEstimator};
use crate::heading_source::{HeadingSource, OrientationReading};
use crate::platform::{CameraStream, MotionPermission, SensorStreams, StreamKind, Subscription};
use crate::sensor_health::SensorHealth;
use crate::status::{Diagnostics, NavStatus};
use crate::step_detector::{StepDetector, StepDetectorConfig};
use crate::types::{AccelerationSample, BeaconObservation, HeadingSample, StepEvent};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavState {
    /// Waiting for motion permission and camera access
    RequestingPermissions,
    /// User is turning the phone to calibrate the compass
    Calibrating,
    /// Counting steps toward the destination
    Navigating,
    /// Destination reached; waiting for finish
    Arrived,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    StateChanged { from: NavState, to: NavState },
    MotionGranted,
    CameraAcquired,
    AccessFailed(AccessFailure),
    CalibrationProgress(CalibrationProgress),
    CalibrationCompleted,
    CalibrationSkipped { coverage: f64 },
    StepConfirmed(StepEvent),
    StepCorrected { beacon: String, from: u32, to: u32, distance_m: f64 },
    Arrived { step_count: u32 },
    Closed,
}

/// Requests the runtime has to (re)issue
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingAccess {
    pub motion: bool,
    pub camera: bool,
}

#[derive(Default)]
struct Subscriptions {
    heading: Option<Subscription>,
    motion: Option<Subscription>,
    beacon: Option<Subscription>,
}

impl Subscriptions {
    fn slot(&mut self, kind: StreamKind) -> &mut Option<Subscription> {
        match kind {
            StreamKind::Heading => &mut self.heading,
            StreamKind::Motion => &mut self.motion,
            StreamKind::Beacon => &mut self.beacon,
        }
    }

    fn ensure(&mut self, streams: &mut dyn SensorStreams, kind: StreamKind) {
        let slot = self.slot(kind);
        if slot.is_none() {
            log::debug!("[session] subscribing {} stream", kind.label());
            *slot = Some(streams.subscribe(kind));
        }
    }

    fn release_all(&mut self) {
        for kind in StreamKind::ALL {
            if let Some(mut sub) = self.slot(kind).take() {
                sub.unsubscribe();
            }
        }
    }

    fn is_active(&self, kind: StreamKind) -> bool {
        let sub = match kind {
            StreamKind::Heading => &self.heading,
            StreamKind::Motion => &self.motion,
            StreamKind::Beacon => &self.beacon,
        };
        sub.as_ref().map(|s| s.is_active()).unwrap_or(false)
    }
}

pub struct NavigationSession {
    session_id: String,
    config: NavConfig,
    destination_bearing: f64,
    state: NavState,
    closed: bool,

    // Access
    motion_granted: bool,
    camera: Option<Box<dyn CameraStream>>,
    last_failure: Option<AccessFailure>,

    // Capabilities
    streams: Box<dyn SensorStreams>,
    subscriptions: Subscriptions,
    heading_source: Box<dyn HeadingSource>,

    // Signal processing
    heading_filter: HeadingFilter,
    accel_estimator: LinearAccelerationEstimator,
    step_detector: StepDetector,
    corrector: CheckpointCorrector,
    calibration: Option<CalibrationTracker>,
    health: SensorHealth,

    // Derived state
    step_count: u32,
    raw_heading: Option<f64>,
    smoothed_heading: Option<f64>,
    simulated_heading: Option<f64>,
    clock: f64,
}

impl NavigationSession {
    /// Create a session in `RequestingPermissions`. The destination bearing
    /// is taken from the config and fixed for the session's lifetime.
    pub fn new(
        config: NavConfig,
        heading_source: Box<dyn HeadingSource>,
        streams: Box<dyn SensorStreams>,
    ) -> NavResult<Self> {
        config.validate()?;

        let session = NavigationSession {
            session_id: format!("session_{}", Utc::now().timestamp_millis()),
            destination_bearing: normalize_heading(config.destination_bearing_deg),
            state: NavState::RequestingPermissions,
            closed: false,
            motion_granted: false,
            camera: None,
            last_failure: None,
            streams,
            subscriptions: Subscriptions::default(),
            heading_source,
            heading_filter: HeadingFilter::new(config.heading_window),
            accel_estimator: LinearAccelerationEstimator::new(config.gravity_alpha),
            step_detector: StepDetector::new(StepDetectorConfig::from(&config)),
            corrector: CheckpointCorrector::from_config(&config),
            calibration: None,
            health: SensorHealth::new(&config),
            step_count: 0,
            raw_heading: None,
            smoothed_heading: None,
            simulated_heading: None,
            clock: 0.0,
            config,
        };

        log::info!(
            "[session] {} created, destination {:.1}°, heading via {}",
            session.session_id,
            session.destination_bearing,
            session.heading_source.name()
        );
        Ok(session)
    }

    // ── Access ───────────────────────────────────────────────────────────

    pub fn on_motion_permission(&mut self, outcome: MotionPermission, now: f64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.closed || self.state != NavState::RequestingPermissions {
            log::debug!("[session] motion permission {:?} ignored in {:?}", outcome, self.state);
            return events;
        }
        self.advance_clock(now);

        match outcome {
            MotionPermission::Granted => {
                self.motion_granted = true;
                events.push(SessionEvent::MotionGranted);
                events.extend(self.try_start_calibration());
            }
            MotionPermission::Denied => {
                log::warn!("[session] motion permission denied");
                events.extend(self.record_failure(AccessFailure::MotionDenied));
            }
        }
        events
    }

    pub fn on_camera(
        &mut self,
        result: Result<Box<dyn CameraStream>, CameraError>,
        now: f64,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.closed || self.state != NavState::RequestingPermissions {
            if let Ok(mut stream) = result {
                log::debug!("[session] stopping camera stream delivered after acquisition");
                stream.stop();
            }
            return events;
        }
        self.advance_clock(now);

        match result {
            Ok(stream) => {
                if let Some(mut previous) = self.camera.replace(stream) {
                    previous.stop();
                }
                events.push(SessionEvent::CameraAcquired);
                events.extend(self.try_start_calibration());
            }
            Err(cause) => {
                log::warn!("[session] camera unavailable: {}", cause);
                events.extend(self.record_failure(AccessFailure::Camera(cause)));
            }
        }
        events
    }

    /// Clear the last failure and report which requests must be issued again
    pub fn retry_permissions(&mut self) -> NavResult<PendingAccess> {
        self.ensure_open()?;
        if self.state != NavState::RequestingPermissions {
            return Err(NavError::InvalidState(format!(
                "cannot retry permissions while {:?}",
                self.state
            )));
        }
        self.last_failure = None;
        Ok(self.pending_access())
    }

    pub fn pending_access(&self) -> PendingAccess {
        if self.closed || self.state != NavState::RequestingPermissions {
            return PendingAccess::default();
        }
        PendingAccess {
            motion: !self.motion_granted,
            camera: self.camera.is_none(),
        }
    }

    fn record_failure(&mut self, failure: AccessFailure) -> Vec<SessionEvent> {
        self.last_failure = Some(failure);
        vec![SessionEvent::AccessFailed(failure)]
    }

    fn try_start_calibration(&mut self) -> Vec<SessionEvent> {
        if !(self.motion_granted && self.camera.is_some()) {
            return Vec::new();
        }
        self.last_failure = None;
        self.calibration = Some(CalibrationTracker::new(
            self.config.calibration_segments,
            self.clock,
            self.config.skip_grace_secs,
        ));
        self.subscriptions.ensure(self.streams.as_mut(), StreamKind::Heading);
        vec![self.transition(NavState::Calibrating)]
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Feed a raw orientation reading through the session's heading source
    pub fn on_orientation(&mut self, reading: &OrientationReading) -> Vec<SessionEvent> {
        match self.heading_source.heading(reading) {
            Some(sample) => self.on_heading(&sample),
            None => Vec::new(),
        }
    }

    pub fn on_heading(&mut self, sample: &HeadingSample) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.accepts(StreamKind::Heading) {
            return events;
        }
        let smoothed = match self.heading_filter.apply(sample.heading_deg) {
            Some(smoothed) => smoothed,
            None => {
                log::debug!("[session] dropped non-finite heading at {:.2}s", sample.timestamp);
                return events;
            }
        };
        self.health.heading.update(self.clock);
        self.raw_heading = Some(sample.heading_deg);
        self.smoothed_heading = Some(smoothed);

        if self.state == NavState::Calibrating {
            if let Some(tracker) = self.calibration.as_mut() {
                let before = tracker.covered();
                let completed = tracker.record(smoothed);
                if tracker.covered() != before {
                    events.push(SessionEvent::CalibrationProgress(tracker.progress()));
                }
                if completed {
                    log::info!("[session] calibration complete");
                    events.push(SessionEvent::CalibrationCompleted);
                    events.extend(self.start_navigation());
                }
            }
        }
        events
    }

    pub fn on_motion(&mut self, sample: &AccelerationSample) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.accepts(StreamKind::Motion) || self.state != NavState::Navigating {
            return events;
        }
        let linear = match self.accel_estimator.update(sample) {
            Some(linear) => linear,
            None => {
                log::debug!("[session] dropped non-finite motion sample at {:.2}s", sample.timestamp);
                return events;
            }
        };
        self.health.motion.update(self.clock);

        if let Some(step) = self.step_detector.update(linear, sample.timestamp) {
            self.step_count += 1;
            log::debug!(
                "[session] step #{} at {:.2}s (count {})",
                step.sequence,
                step.timestamp,
                self.step_count
            );
            events.push(SessionEvent::StepConfirmed(step));
            events.extend(self.check_arrival());
        }
        events
    }

    pub fn on_beacon(&mut self, obs: &BeaconObservation) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if !self.accepts(StreamKind::Beacon) || self.state != NavState::Navigating {
            return events;
        }
        self.health.beacon.update(self.clock);

        if let Some(correction) = self.corrector.observe(obs, self.step_count) {
            log::info!(
                "[session] checkpoint {} at {:.2} m: steps {} -> {}",
                correction.beacon_name,
                correction.distance_m,
                correction.from,
                correction.to
            );
            self.step_count = correction.to;
            events.push(SessionEvent::StepCorrected {
                beacon: correction.beacon_name,
                from: correction.from,
                to: correction.to,
                distance_m: correction.distance_m,
            });
            events.extend(self.check_arrival());
        }
        events
    }

    // ── User actions ─────────────────────────────────────────────────────

    pub fn skip_calibration(&mut self, now: f64) -> NavResult<Vec<SessionEvent>> {
        self.ensure_open()?;
        if self.state != NavState::Calibrating {
            return Err(NavError::InvalidState(format!(
                "cannot skip calibration while {:?}",
                self.state
            )));
        }
        self.advance_clock(now);

        let (remaining, coverage) = match self.calibration.as_ref() {
            Some(tracker) => (tracker.skip_remaining(self.clock), tracker.progress().fraction),
            None => (0.0, 0.0),
        };
        if remaining > 0.0 {
            return Err(NavError::SkipUnavailable { remaining_secs: remaining });
        }

        log::info!("[session] calibration skipped at {:.0}% coverage", coverage * 100.0);
        let mut events = vec![SessionEvent::CalibrationSkipped { coverage }];
        events.extend(self.start_navigation());
        Ok(events)
    }

    /// Diagnostic mode: replace the live heading with a fixed value
    pub fn set_simulated_heading(&mut self, heading_deg: Option<f64>) {
        self.simulated_heading = heading_deg.filter(|h| h.is_finite()).map(normalize_heading);
    }

    /// End an arrived session and release everything it holds
    pub fn finish(&mut self) -> NavResult<Vec<SessionEvent>> {
        self.ensure_open()?;
        if self.state != NavState::Arrived {
            return Err(NavError::InvalidState(format!("cannot finish while {:?}", self.state)));
        }
        Ok(self.teardown())
    }

    /// Tear down from any state. Safe to call repeatedly.
    pub fn abort(&mut self) -> Vec<SessionEvent> {
        if self.closed {
            return Vec::new();
        }
        log::info!("[session] {} aborted in {:?}", self.session_id, self.state);
        self.teardown()
    }

    /// Advance the session clock. Only the driver moves it: permission
    /// results, skip requests and ticks. Sample timestamps never do, so a
    /// producer on another time base cannot open the skip grace early.
    pub fn tick(&mut self, now: f64) {
        self.advance_clock(now);
    }

    // ── Transitions ──────────────────────────────────────────────────────

    fn transition(&mut self, to: NavState) -> SessionEvent {
        let from = self.state;
        self.state = to;
        log::info!("[session] {:?} -> {:?}", from, to);
        SessionEvent::StateChanged { from, to }
    }

    fn start_navigation(&mut self) -> Vec<SessionEvent> {
        for kind in StreamKind::ALL {
            self.subscriptions.ensure(self.streams.as_mut(), kind);
        }
        let mut events = vec![self.transition(NavState::Navigating)];
        // Checkpoint corrections can only raise the count, so a count carried
        // in from elsewhere may already satisfy arrival
        events.extend(self.check_arrival());
        events
    }

    fn check_arrival(&mut self) -> Vec<SessionEvent> {
        if self.state != NavState::Navigating
            || (self.step_count as f64) < self.config.arrival_step_count()
        {
            return Vec::new();
        }
        self.release_resources();
        let changed = self.transition(NavState::Arrived);
        log::info!("[session] arrived after {} steps", self.step_count);
        vec![changed, SessionEvent::Arrived { step_count: self.step_count }]
    }

    fn release_resources(&mut self) {
        self.subscriptions.release_all();
        if let Some(mut camera) = self.camera.take() {
            camera.stop();
        }
    }

    fn teardown(&mut self) -> Vec<SessionEvent> {
        self.release_resources();
        self.closed = true;
        log::info!(
            "[session] {} closed. {}",
            self.session_id,
            self.health.format_status(self.clock)
        );
        vec![SessionEvent::Closed]
    }

    fn ensure_open(&self) -> NavResult<()> {
        if self.closed {
            Err(NavError::SessionClosed)
        } else {
            Ok(())
        }
    }

    fn accepts(&self, kind: StreamKind) -> bool {
        !self.closed && self.subscriptions.is_active(kind)
    }

    fn advance_clock(&mut self, now: f64) {
        if now.is_finite() && now > self.clock {
            self.clock = now;
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn destination_bearing(&self) -> f64 {
        self.destination_bearing
    }

    pub fn last_failure(&self) -> Option<AccessFailure> {
        self.last_failure
    }

    /// Heading used for guidance: simulated value if set, else smoothed
    pub fn device_heading(&self) -> Option<f64> {
        self.simulated_heading.or(self.smoothed_heading)
    }

    /// Straight ahead (0) until any heading has been seen
    pub fn relative_bearing(&self) -> f64 {
        self.device_heading()
            .map(|heading| relative_bearing(self.destination_bearing, heading))
            .unwrap_or(0.0)
    }

    pub fn steps_remaining(&self) -> u32 {
        self.config.total_steps.saturating_sub(self.step_count)
    }

    pub fn calibration_progress(&self) -> f64 {
        self.calibration
            .as_ref()
            .map(|t| t.progress().fraction)
            .unwrap_or(0.0)
    }

    pub fn status(&self) -> NavStatus {
        let skip_in = match (self.state, self.calibration.as_ref()) {
            (NavState::Calibrating, Some(tracker)) => Some(tracker.skip_remaining(self.clock)),
            _ => None,
        };
        let relative = self.relative_bearing();

        NavStatus {
            session_id: self.session_id.clone(),
            state: self.state,
            closed: self.closed,
            relative_bearing_deg: relative,
            steps_remaining: self.steps_remaining(),
            calibration_progress: self.calibration_progress(),
            can_skip_calibration: skip_in.map(|s| s <= 0.0).unwrap_or(false),
            skip_available_in_secs: skip_in,
            last_failure: self.last_failure,
            failure_message: self.last_failure.map(|f| f.message().to_string()),
            diagnostics: Diagnostics {
                clock_secs: self.clock,
                heading_source: self.heading_source.name().to_string(),
                raw_heading: self.raw_heading,
                smoothed_heading: self.smoothed_heading,
                simulated_heading: self.simulated_heading,
                destination_bearing: self.destination_bearing,
                relative_bearing: relative,
                step_count: self.step_count,
                gravity: {
                    let g = self.accel_estimator.gravity();
                    [g.x, g.y, g.z]
                },
                calibration_sectors: self
                    .calibration
                    .as_ref()
                    .map(|t| t.covered_sectors())
                    .unwrap_or_default(),
                beacons: self.corrector.sightings(),
                sensor_health: self.health.check(self.clock),
            },
        }
    }
}

impl Drop for NavigationSession {
    fn drop(&mut self) {
        self.release_resources();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heading_source::CompassHeadingSource;
    use crate::types::Checkpoint;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Streams that record which kinds are open
    #[derive(Clone, Default)]
    struct MockStreams {
        open: Arc<Mutex<HashMap<StreamKind, bool>>>,
    }

    impl MockStreams {
        fn is_open(&self, kind: StreamKind) -> bool {
            *self.open.lock().unwrap().get(&kind).unwrap_or(&false)
        }
    }

    impl SensorStreams for MockStreams {
        fn subscribe(&mut self, kind: StreamKind) -> Subscription {
            self.open.lock().unwrap().insert(kind, true);
            let open = self.open.clone();
            Subscription::new(kind, move || {
                open.lock().unwrap().insert(kind, false);
            })
        }
    }

    struct MockCamera {
        stops: Arc<AtomicUsize>,
    }

    impl CameraStream for MockCamera {
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn camera(stops: &Arc<AtomicUsize>) -> Result<Box<dyn CameraStream>, CameraError> {
        Ok(Box::new(MockCamera { stops: stops.clone() }))
    }

    fn session_with(config: NavConfig) -> (NavigationSession, MockStreams) {
        let streams = MockStreams::default();
        let session =
            NavigationSession::new(config, Box::new(CompassHeadingSource), Box::new(streams.clone()))
                .unwrap();
        (session, streams)
    }

    fn granted_session(config: NavConfig) -> (NavigationSession, MockStreams, Arc<AtomicUsize>) {
        let (mut session, streams) = session_with(config);
        let stops = Arc::new(AtomicUsize::new(0));
        session.on_motion_permission(MotionPermission::Granted, 0.0);
        session.on_camera(camera(&stops), 0.0);
        (session, streams, stops)
    }

    /// One clean step whose peak starts at `t0`
    fn walk_step(session: &mut NavigationSession, t0: f64) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        for (dt, mag) in [(0.0, 0.1), (0.02, 2.6), (0.04, 0.4)] {
            events.extend(session.on_motion(&AccelerationSample::linear(0.0, 0.0, mag, t0 + dt)));
        }
        events
    }

    #[test]
    fn test_permissions_gate_calibration() {
        let (mut session, streams) = session_with(NavConfig::default());
        assert_eq!(session.state(), NavState::RequestingPermissions);

        let events = session.on_motion_permission(MotionPermission::Granted, 0.1);
        assert_eq!(events, vec![SessionEvent::MotionGranted]);
        assert_eq!(session.state(), NavState::RequestingPermissions);

        let stops = Arc::new(AtomicUsize::new(0));
        let events = session.on_camera(camera(&stops), 0.2);
        assert!(events.contains(&SessionEvent::StateChanged {
            from: NavState::RequestingPermissions,
            to: NavState::Calibrating,
        }));
        assert!(streams.is_open(StreamKind::Heading));
        assert!(!streams.is_open(StreamKind::Motion));
    }

    #[test]
    fn test_camera_failure_keeps_requesting() {
        let (mut session, _streams) = session_with(NavConfig::default());
        session.on_motion_permission(MotionPermission::Granted, 0.0);

        let events = session.on_camera(Err(CameraError::Busy), 0.5);
        assert_eq!(events, vec![SessionEvent::AccessFailed(AccessFailure::Camera(CameraError::Busy))]);
        assert_eq!(session.state(), NavState::RequestingPermissions);
        assert_eq!(session.status().last_failure, Some(AccessFailure::Camera(CameraError::Busy)));

        let pending = session.retry_permissions().unwrap();
        assert_eq!(pending, PendingAccess { motion: false, camera: true });
        assert!(session.last_failure().is_none());

        let stops = Arc::new(AtomicUsize::new(0));
        session.on_camera(camera(&stops), 1.0);
        assert_eq!(session.state(), NavState::Calibrating);
    }

    #[test]
    fn test_motion_denied() {
        let (mut session, _streams) = session_with(NavConfig::default());
        let events = session.on_motion_permission(MotionPermission::Denied, 0.0);
        assert_eq!(events, vec![SessionEvent::AccessFailed(AccessFailure::MotionDenied)]);
        assert_eq!(session.pending_access(), PendingAccess { motion: true, camera: true });
    }

    #[test]
    fn test_calibration_completes_once() {
        let (mut session, streams, _stops) = granted_session(NavConfig::default());
        let mut completions = 0;
        let mut t = 1.0;
        // Slow full turn; the smoothing window trails the raw heading
        for round in 0..2 {
            for i in 0..72 {
                let heading = (i * 5) as f64 + round as f64;
                t += 0.05;
                let events = session.on_heading(&HeadingSample::new(heading, t));
                completions += events.iter().filter(|e| **e == SessionEvent::CalibrationCompleted).count();
            }
        }
        assert_eq!(completions, 1);
        assert_eq!(session.state(), NavState::Navigating);
        assert_eq!(session.calibration_progress(), 1.0);
        for kind in StreamKind::ALL {
            assert!(streams.is_open(kind));
        }
    }

    #[test]
    fn test_skip_respects_grace() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        let err = session.skip_calibration(3.0).unwrap_err();
        assert!(matches!(err, NavError::SkipUnavailable { remaining_secs } if (remaining_secs - 4.0).abs() < 1e-9));
        assert!(!session.status().can_skip_calibration);

        session.tick(7.0);
        assert!(session.status().can_skip_calibration);
        let events = session.skip_calibration(7.0).unwrap();
        assert!(matches!(events[0], SessionEvent::CalibrationSkipped { .. }));
        assert_eq!(session.state(), NavState::Navigating);
        assert!(session.skip_calibration(8.0).is_err());
    }

    #[test]
    fn test_end_to_end_arrival() {
        let (mut session, streams, stops) = granted_session(NavConfig::default());
        session.skip_calibration(7.0).unwrap();

        let mut arrivals = 0;
        let mut steps = 0;
        for i in 0..12 {
            let events = walk_step(&mut session, 8.0 + i as f64 * 0.6);
            steps += events.iter().filter(|e| matches!(e, SessionEvent::StepConfirmed(_))).count();
            arrivals += events.iter().filter(|e| matches!(e, SessionEvent::Arrived { .. })).count();
        }

        assert_eq!(steps, 10);
        assert_eq!(arrivals, 1);
        assert_eq!(session.state(), NavState::Arrived);
        assert_eq!(session.steps_remaining(), 0);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        for kind in StreamKind::ALL {
            assert!(!streams.is_open(kind));
        }

        let events = session.finish().unwrap();
        assert_eq!(events, vec![SessionEvent::Closed]);
        assert!(session.is_closed());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(matches!(session.finish(), Err(NavError::SessionClosed)));
    }

    #[test]
    fn test_steps_ignored_before_navigating() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        assert!(walk_step(&mut session, 1.0).is_empty());
        assert_eq!(session.step_count(), 0);
    }

    #[test]
    fn test_checkpoint_snaps_and_never_regresses() {
        let config = NavConfig {
            checkpoints: vec![Checkpoint::new("stairwell", 5, 1.5)],
            ..NavConfig::default()
        };
        let (mut session, _streams, _stops) = granted_session(config);
        session.skip_calibration(7.0).unwrap();

        walk_step(&mut session, 8.0);
        walk_step(&mut session, 8.6);
        assert_eq!(session.step_count(), 2);

        let obs = BeaconObservation::new("b1", Some("stairwell"), -59, 9.0);
        let events = session.on_beacon(&obs);
        assert!(matches!(events[0], SessionEvent::StepCorrected { from: 2, to: 5, .. }));
        assert_eq!(session.step_count(), 5);

        walk_step(&mut session, 9.5);
        walk_step(&mut session, 10.1);
        assert_eq!(session.step_count(), 7);
        assert!(session.on_beacon(&BeaconObservation::new("b1", Some("stairwell"), -59, 10.5)).is_empty());
        assert_eq!(session.step_count(), 7);
        assert_eq!(session.status().diagnostics.beacons.len(), 1);
    }

    #[test]
    fn test_checkpoint_can_trigger_arrival() {
        let config = NavConfig {
            checkpoints: vec![Checkpoint::new("door", 10, 2.0)],
            ..NavConfig::default()
        };
        let (mut session, _streams, _stops) = granted_session(config);
        session.skip_calibration(7.0).unwrap();
        let events = session.on_beacon(&BeaconObservation::new("d", Some("door"), -59, 8.0));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::Arrived { step_count: 10 })));
        assert_eq!(session.state(), NavState::Arrived);
    }

    #[test]
    fn test_simulated_heading_296_case() {
        let (mut session, _streams) = session_with(NavConfig::default());
        assert_eq!(session.destination_bearing(), 296.0);
        assert_eq!(session.relative_bearing(), 0.0);

        session.set_simulated_heading(Some(296.0));
        assert_eq!(session.relative_bearing(), 0.0);

        session.set_simulated_heading(Some(206.0));
        assert!((session.relative_bearing() - 90.0).abs() < 1e-9);
        assert!((session.status().relative_bearing_deg - 90.0).abs() < 1e-9);

        session.set_simulated_heading(None);
        assert_eq!(session.relative_bearing(), 0.0);
    }

    #[test]
    fn test_live_heading_drives_relative_bearing() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        session.on_orientation(&OrientationReading {
            timestamp: 1.0,
            compass_heading: Some(206.0),
            alpha: None,
            absolute: true,
        });
        assert!((session.relative_bearing() - 90.0).abs() < 1e-9);
        assert_eq!(session.status().diagnostics.raw_heading, Some(206.0));
    }

    #[test]
    fn test_abort_before_access_and_late_camera() {
        let (mut session, streams) = session_with(NavConfig::default());
        let events = session.abort();
        assert_eq!(events, vec![SessionEvent::Closed]);
        assert!(session.abort().is_empty());

        // Resolutions arriving after teardown are discarded
        assert!(session.on_motion_permission(MotionPermission::Granted, 1.0).is_empty());
        let stops = Arc::new(AtomicUsize::new(0));
        assert!(session.on_camera(camera(&stops), 1.0).is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.state(), NavState::RequestingPermissions);
        assert!(!streams.is_open(StreamKind::Heading));
        assert!(session.retry_permissions().is_err());
    }

    #[test]
    fn test_abort_while_navigating_releases_everything() {
        let (mut session, streams, stops) = granted_session(NavConfig::default());
        session.skip_calibration(7.0).unwrap();
        assert!(streams.is_open(StreamKind::Beacon));

        session.abort();
        for kind in StreamKind::ALL {
            assert!(!streams.is_open(kind));
        }
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(walk_step(&mut session, 9.0).is_empty());
    }

    #[test]
    fn test_non_finite_heading_ignored() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        session.tick(1.0);
        session.on_heading(&HeadingSample::new(100.0, 1.0));
        assert!(session.on_heading(&HeadingSample::new(f64::NAN, 1.05)).is_empty());
        for i in 0..5 {
            session.on_heading(&HeadingSample::new(100.0, 1.1 + i as f64 * 0.05));
        }

        let status = session.status();
        assert!(status.relative_bearing_deg.is_finite());
        assert!((status.relative_bearing_deg + 164.0).abs() < 1e-9);
        assert_eq!(status.diagnostics.raw_heading, Some(100.0));
        assert_eq!(status.diagnostics.calibration_sectors, vec![3]);
        assert_eq!(status.diagnostics.sensor_health[0].samples, 6);
    }

    #[test]
    fn test_corrupt_motion_sample_does_not_stall_steps() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        session.skip_calibration(7.0).unwrap();
        let bad = AccelerationSample::with_gravity(0.0, 0.0, f64::NAN, 7.5);
        assert!(session.on_motion(&bad).is_empty());

        walk_step(&mut session, 8.0);
        walk_step(&mut session, 8.6);
        assert_eq!(session.step_count(), 2);
        assert!(session.status().diagnostics.gravity.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_sample_timestamps_do_not_open_skip() {
        let (mut session, _streams, _stops) = granted_session(NavConfig::default());
        // Epoch-based producer clock
        session.on_heading(&HeadingSample::new(10.0, 1_700_000_000.0));
        assert!(!session.status().can_skip_calibration);
        assert!(matches!(
            session.skip_calibration(1.0),
            Err(NavError::SkipUnavailable { .. })
        ));
        assert_eq!(session.status().diagnostics.clock_secs, 1.0);
    }

    #[test]
    fn test_sessions_do_not_share_buffers() {
        let (mut first, _s1, _c1) = granted_session(NavConfig::default());
        for i in 0..10 {
            first.on_heading(&HeadingSample::new(90.0, 1.0 + i as f64 * 0.1));
        }
        first.abort();

        let (mut second, _s2, _c2) = granted_session(NavConfig::default());
        assert!(second.device_heading().is_none());
        second.on_heading(&HeadingSample::new(270.0, 1.0));
        assert_eq!(second.device_heading(), Some(270.0));
    }
}
