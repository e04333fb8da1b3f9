//! Indoor pedestrian navigation engine.
//!
//! Smooths compass headings into an arrow toward a fixed destination
//! bearing, counts steps from the accelerometer, snaps the count forward at
//! beacon checkpoints, and drives the whole flow through a per-session state
//! machine (permissions, compass calibration, navigation, arrival).

pub mod bearing;
pub mod calibration;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod filters;
pub mod heading_source;
pub mod platform;
pub mod runtime;
pub mod sensor_health;
pub mod sensors;
pub mod session;
pub mod status;
pub mod step_detector;
pub mod types;

pub use config::NavConfig;
pub use error::{AccessFailure, CameraError, NavError, NavResult};
pub use heading_source::{HeadingSource, HeadingSourceKind, OrientationReading};
pub use runtime::{spawn_session, PushOutcome, SessionHandle, SessionRuntime};
pub use session::{NavState, NavigationSession, SessionEvent};
pub use status::NavStatus;
