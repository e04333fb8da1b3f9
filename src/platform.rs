//! Capabilities the host platform hands to a session.
//!
//! Every live resource is held through a handle: sensor streams through a
//! [`Subscription`], the camera through a [`CameraStream`]. Dropping the
//! session drops the handles, which releases the resources.

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::CameraError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Heading,
    Motion,
    Beacon,
}

impl StreamKind {
    pub const ALL: [StreamKind; 3] = [StreamKind::Heading, StreamKind::Motion, StreamKind::Beacon];

    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Heading => "Heading",
            StreamKind::Motion => "Motion",
            StreamKind::Beacon => "Beacon",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionPermission {
    Granted,
    Denied,
}

/// Cancellable handle to one sensor stream.
///
/// `unsubscribe` runs the release hook at most once; later calls and the
/// drop are no-ops.
pub struct Subscription {
    kind: StreamKind,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(kind: StreamKind, release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            kind,
            release: Some(Box::new(release)),
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn is_active(&self) -> bool {
        self.release.is_some()
    }

    pub fn unsubscribe(&mut self) {
        if let Some(release) = self.release.take() {
            log::debug!("[platform] {} stream released", self.kind.label());
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Opens sensor streams for the session. Readings delivered on an open
/// stream are expected to reach the session's event queue.
pub trait SensorStreams: Send {
    fn subscribe(&mut self, kind: StreamKind) -> Subscription;
}

/// Streams with no live source behind them, for replayed traces and
/// diagnostic runs where the caller feeds the session directly
#[derive(Clone, Copy, Debug, Default)]
pub struct DetachedStreams;

impl SensorStreams for DetachedStreams {
    fn subscribe(&mut self, kind: StreamKind) -> Subscription {
        Subscription::new(kind, || {})
    }
}

/// Live camera capture owned by the session
pub trait CameraStream: Send {
    fn stop(&mut self);
}

/// The two one-shot asynchronous requests made at session start
pub trait PermissionApi: Send + Sync {
    fn request_motion_permission(&self) -> BoxFuture<'static, MotionPermission>;

    fn request_camera_access(&self) -> BoxFuture<'static, Result<Box<dyn CameraStream>, CameraError>>;
}
