//! Async driver for a navigation session.
//!
//! Every input (sensor readings, permission results, user actions) is a
//! `SessionCommand` on one bounded queue, and a single task owns the
//! `NavigationSession` and applies them in order. Sensor producers hold a
//! `SessionHandle`; they can only enqueue readings for streams the session
//! currently has open.
//!
//! The session clock is the driver's own: seconds since spawn, applied
//! before every command and on each tick. Sample timestamps only order
//! readings within their stream (step lockout), so producers may use any
//! time base; `SessionHandle::elapsed` is the convenient one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};

use crate::config::NavConfig;
use crate::error::{CameraError, NavError, NavResult};
use crate::heading_source::{HeadingSource, OrientationReading};
use crate::platform::{
    CameraStream, MotionPermission, PermissionApi, SensorStreams, StreamKind, Subscription,
};
use crate::session::{NavigationSession, PendingAccess, SessionEvent};
use crate::status::NavStatus;
use crate::types::{AccelerationSample, BeaconObservation};

const QUEUE_CAPACITY: usize = 500;
const TICK_INTERVAL: Duration = Duration::from_millis(250);

type Reply = oneshot::Sender<NavResult<()>>;

pub enum SessionCommand {
    MotionPermission(MotionPermission),
    Camera(Result<Box<dyn CameraStream>, CameraError>),
    Orientation(OrientationReading),
    Motion(AccelerationSample),
    Beacon(BeaconObservation),
    SimulatedHeading(Option<f64>),
    SkipCalibration(Reply),
    RetryPermissions(Reply),
    Finish(Reply),
    Abort,
}

/// Open/closed flag per sensor stream, shared by the session's
/// subscriptions and the producers' handles
#[derive(Debug, Default)]
pub struct StreamGates {
    heading: AtomicBool,
    motion: AtomicBool,
    beacon: AtomicBool,
}

impl StreamGates {
    fn gate(&self, kind: StreamKind) -> &AtomicBool {
        match kind {
            StreamKind::Heading => &self.heading,
            StreamKind::Motion => &self.motion,
            StreamKind::Beacon => &self.beacon,
        }
    }

    pub fn is_open(&self, kind: StreamKind) -> bool {
        self.gate(kind).load(Ordering::Acquire)
    }
}

struct GatedStreams {
    gates: Arc<StreamGates>,
}

impl SensorStreams for GatedStreams {
    fn subscribe(&mut self, kind: StreamKind) -> Subscription {
        self.gates.gate(kind).store(true, Ordering::Release);
        let gates = self.gates.clone();
        Subscription::new(kind, move || gates.gate(kind).store(false, Ordering::Release))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// Stream not subscribed; reading discarded
    Gated,
    /// Queue full; reading discarded
    Dropped,
    /// Session is gone
    Closed,
}

/// Producer-side handle. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    gates: Arc<StreamGates>,
    started: Instant,
}

impl SessionHandle {
    /// Seconds since the session started
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn is_open(&self, kind: StreamKind) -> bool {
        self.gates.is_open(kind)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn push_orientation(&self, reading: OrientationReading) -> PushOutcome {
        self.push(StreamKind::Heading, SessionCommand::Orientation(reading))
    }

    pub fn push_motion(&self, sample: AccelerationSample) -> PushOutcome {
        self.push(StreamKind::Motion, SessionCommand::Motion(sample))
    }

    pub fn push_beacon(&self, obs: BeaconObservation) -> PushOutcome {
        self.push(StreamKind::Beacon, SessionCommand::Beacon(obs))
    }

    fn push(&self, kind: StreamKind, command: SessionCommand) -> PushOutcome {
        if self.tx.is_closed() {
            return PushOutcome::Closed;
        }
        if !self.gates.is_open(kind) {
            return PushOutcome::Gated;
        }
        match self.tx.try_send(command) {
            Ok(()) => PushOutcome::Delivered,
            Err(TrySendError::Full(_)) => PushOutcome::Dropped,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    pub async fn set_simulated_heading(&self, heading_deg: Option<f64>) -> NavResult<()> {
        self.tx
            .send(SessionCommand::SimulatedHeading(heading_deg))
            .await
            .map_err(|_| NavError::SessionClosed)
    }

    pub async fn skip_calibration(&self) -> NavResult<()> {
        self.request(SessionCommand::SkipCalibration).await
    }

    pub async fn retry_permissions(&self) -> NavResult<()> {
        self.request(SessionCommand::RetryPermissions).await
    }

    pub async fn finish(&self) -> NavResult<()> {
        self.request(SessionCommand::Finish).await
    }

    /// Tear the session down. A no-op if it is already gone.
    pub async fn abort(&self) {
        let _ = self.tx.send(SessionCommand::Abort).await;
    }

    async fn request(&self, command: impl FnOnce(Reply) -> SessionCommand) -> NavResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(command(reply_tx))
            .await
            .map_err(|_| NavError::SessionClosed)?;
        reply_rx.await.map_err(|_| NavError::SessionClosed)?
    }
}

/// Everything the caller gets back from `spawn_session`
pub struct SessionRuntime {
    pub handle: SessionHandle,
    pub status: watch::Receiver<NavStatus>,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
    /// Resolves to the final status once the session is closed
    pub task: JoinHandle<NavStatus>,
}

/// Create a session and start its driver task. Motion permission and
/// camera access are requested immediately. Must be called from within a
/// tokio runtime.
pub fn spawn_session(
    config: NavConfig,
    heading_source: Box<dyn HeadingSource>,
    permissions: Arc<dyn PermissionApi>,
) -> NavResult<SessionRuntime> {
    let gates = Arc::new(StreamGates::default());
    let streams = GatedStreams { gates: gates.clone() };
    let session = NavigationSession::new(config, heading_source, Box::new(streams))?;

    let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
    let (status_tx, status_rx) = watch::channel(session.status());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let started = Instant::now();

    let driver = Driver {
        session,
        queue: tx.downgrade(),
        permissions,
        started,
        status_tx,
        event_tx,
    };
    let task = tokio::spawn(driver.run(rx));

    Ok(SessionRuntime {
        handle: SessionHandle { tx, gates, started },
        status: status_rx,
        events: event_rx,
        task,
    })
}

struct Driver {
    session: NavigationSession,
    // Weak so that dropping every handle ends the session
    queue: mpsc::WeakSender<SessionCommand>,
    permissions: Arc<dyn PermissionApi>,
    started: Instant,
    status_tx: watch::Sender<NavStatus>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl Driver {
    async fn run(mut self, mut rx: mpsc::Receiver<SessionCommand>) -> NavStatus {
        log::info!("[runtime] driving {}", self.session.session_id());
        self.request_access(self.session.pending_access());

        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        log::info!("[runtime] all handles dropped");
                        break;
                    }
                },
                _ = ticker.tick() => self.session.tick(self.now()),
            }
            self.status_tx.send_replace(self.session.status());
            if self.session.is_closed() {
                break;
            }
        }

        // Nothing queued after teardown may leak a live resource
        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let SessionCommand::Camera(Ok(mut stream)) = command {
                stream.stop();
            }
        }

        let events = self.session.abort();
        self.publish(events);
        let final_status = self.session.status();
        self.status_tx.send_replace(final_status.clone());
        final_status
    }

    fn now(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn apply(&mut self, command: SessionCommand) {
        let now = self.now();
        self.session.tick(now);

        let events = match command {
            SessionCommand::MotionPermission(outcome) => self.session.on_motion_permission(outcome, now),
            SessionCommand::Camera(result) => self.session.on_camera(result, now),
            SessionCommand::Orientation(reading) => self.session.on_orientation(&reading),
            SessionCommand::Motion(sample) => self.session.on_motion(&sample),
            SessionCommand::Beacon(obs) => self.session.on_beacon(&obs),
            SessionCommand::SimulatedHeading(heading) => {
                self.session.set_simulated_heading(heading);
                Vec::new()
            }
            SessionCommand::SkipCalibration(reply) => {
                answer(reply, self.session.skip_calibration(now))
            }
            SessionCommand::RetryPermissions(reply) => {
                let pending = self.session.retry_permissions();
                if let Ok(access) = &pending {
                    self.request_access(*access);
                }
                answer(reply, pending.map(|_| Vec::new()))
            }
            SessionCommand::Finish(reply) => answer(reply, self.session.finish()),
            SessionCommand::Abort => self.session.abort(),
        };
        self.publish(events);
    }

    fn publish(&self, events: Vec<SessionEvent>) {
        for event in events {
            // Nobody listening is fine
            let _ = self.event_tx.send(event);
        }
    }

    fn request_access(&self, pending: PendingAccess) {
        if pending.motion {
            let request = self.permissions.request_motion_permission();
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let outcome = request.await;
                deliver(&queue, SessionCommand::MotionPermission(outcome)).await;
            });
        }
        if pending.camera {
            let request = self.permissions.request_camera_access();
            let queue = self.queue.clone();
            tokio::spawn(async move {
                let result = request.await;
                deliver(&queue, SessionCommand::Camera(result)).await;
            });
        }
    }
}

fn answer(reply: Reply, result: NavResult<Vec<SessionEvent>>) -> Vec<SessionEvent> {
    match result {
        Ok(events) => {
            let _ = reply.send(Ok(()));
            events
        }
        Err(e) => {
            log::debug!("[runtime] request rejected: {}", e);
            let _ = reply.send(Err(e));
            Vec::new()
        }
    }
}

/// Post a late result back to the driver. If the session is gone a camera
/// stream is stopped here instead.
async fn deliver(queue: &mpsc::WeakSender<SessionCommand>, command: SessionCommand) {
    let undelivered = match queue.upgrade() {
        Some(tx) => tx.send(command).await.err().map(|e| e.0),
        None => Some(command),
    };
    if let Some(SessionCommand::Camera(Ok(mut stream))) = undelivered {
        log::debug!("[runtime] session gone, stopping late camera stream");
        stream.stop();
    }
}
