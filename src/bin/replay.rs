use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use clap::Parser;
use flate2::read::GzDecoder;
use serde::Deserialize;
use serde_json::json;
use wayfind_rs::error::CameraError;
use wayfind_rs::heading_source::{HeadingSourceKind, OrientationReading};
use wayfind_rs::platform::{CameraStream, DetachedStreams, MotionPermission};
use wayfind_rs::session::{NavState, NavigationSession, SessionEvent};
use wayfind_rs::types::{AccelerationSample, BeaconObservation};
use wayfind_rs::NavConfig;

#[derive(Parser, Debug)]
#[command(name = "replay")]
#[command(about = "Replay a recorded sensor trace through a navigation session", long_about = None)]
struct Args {
    /// Path to trace_*.json[.gz]
    #[arg(long, conflicts_with = "trace_dir")]
    log: Option<PathBuf>,

    /// Directory of traces to batch replay (processes trace_*.json[.gz])
    #[arg(long)]
    trace_dir: Option<PathBuf>,

    /// Session config (JSON); a config embedded in the trace wins
    #[arg(long)]
    config: Option<PathBuf>,

    /// Heading adapter; detected from the first orientation reading if omitted
    #[arg(long, value_enum)]
    heading_source: Option<HeadingSourceKind>,

    /// Skip calibration as soon as the grace period allows
    #[arg(long, default_value_t = false)]
    auto_skip: bool,
}

#[derive(Deserialize)]
struct Reading {
    timestamp: f64,
    #[serde(default)]
    orientation: Option<OrientationReading>,
    #[serde(default)]
    accel: Option<AccelerationSample>,
    #[serde(default)]
    beacon: Option<BeaconObservation>,
}

fn default_motion() -> MotionPermission {
    MotionPermission::Granted
}

#[derive(Deserialize)]
struct Trace {
    #[serde(default)]
    config: Option<NavConfig>,
    #[serde(default = "default_motion")]
    motion_permission: MotionPermission,
    #[serde(default)]
    camera_failure: Option<CameraError>,
    readings: Vec<Reading>,
}

struct ReplayCamera;

impl CameraStream for ReplayCamera {
    fn stop(&mut self) {}
}

fn load_trace(path: &Path) -> anyhow::Result<Trace> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Default)]
struct Tally {
    steps_confirmed: u64,
    corrections: Vec<serde_json::Value>,
    calibrated_at: Option<f64>,
    skipped_at: Option<f64>,
    arrived_at: Option<f64>,
    failures: Vec<String>,
}

impl Tally {
    fn record(&mut self, events: Vec<SessionEvent>, timestamp: f64) {
        for event in events {
            match event {
                SessionEvent::StepConfirmed(_) => self.steps_confirmed += 1,
                SessionEvent::StepCorrected { beacon, from, to, distance_m } => {
                    println!("[CHECKPOINT] t={:.2} {} at {:.2} m: {} -> {}", timestamp, beacon, distance_m, from, to);
                    self.corrections.push(json!({
                        "timestamp": timestamp,
                        "beacon": beacon,
                        "from": from,
                        "to": to,
                        "distance_m": distance_m,
                    }));
                }
                SessionEvent::CalibrationCompleted => self.calibrated_at = Some(timestamp),
                SessionEvent::CalibrationSkipped { .. } => self.skipped_at = Some(timestamp),
                SessionEvent::Arrived { step_count } => {
                    println!("[ARRIVED] t={:.2} after {} steps", timestamp, step_count);
                    self.arrived_at = Some(timestamp);
                }
                SessionEvent::AccessFailed(failure) => self.failures.push(failure.message().to_string()),
                _ => {}
            }
        }
    }
}

fn run_once(path: &Path, args: &Args, base_config: &NavConfig) -> anyhow::Result<serde_json::Value> {
    let trace = load_trace(path)?;
    let config = trace.config.clone().unwrap_or_else(|| base_config.clone());

    let kind = args
        .heading_source
        .or_else(|| {
            trace
                .readings
                .iter()
                .find_map(|r| r.orientation.as_ref())
                .map(HeadingSourceKind::detect)
        })
        .unwrap_or(HeadingSourceKind::CompassHeading);

    // Recorded traces carry every stream; the session filters by subscription
    let mut session = NavigationSession::new(config, kind.build(), Box::new(DetachedStreams))?;
    let mut tally = Tally::default();

    // Both requests resolve at the first reading
    let t0 = trace.readings.first().map(|r| r.timestamp).unwrap_or(0.0);
    tally.record(session.on_motion_permission(trace.motion_permission, t0), t0);
    let camera: Result<Box<dyn CameraStream>, CameraError> = match trace.camera_failure {
        Some(cause) => Err(cause),
        None => Ok(Box::new(ReplayCamera)),
    };
    tally.record(session.on_camera(camera, t0), t0);

    for r in &trace.readings {
        session.tick(r.timestamp);
        if args.auto_skip && session.state() == NavState::Calibrating {
            if let Ok(events) = session.skip_calibration(r.timestamp) {
                tally.record(events, r.timestamp);
            }
        }
        if let Some(orientation) = r.orientation.as_ref() {
            let events = session.on_orientation(orientation);
            tally.record(events, r.timestamp);
        }
        if let Some(accel) = r.accel.as_ref() {
            let events = session.on_motion(accel);
            tally.record(events, r.timestamp);
        }
        if let Some(beacon) = r.beacon.as_ref() {
            let events = session.on_beacon(beacon);
            tally.record(events, r.timestamp);
        }
    }

    let status = session.status();
    if session.state() == NavState::Arrived {
        session.finish()?;
    } else {
        session.abort();
    }

    Ok(json!({
        "log": path.display().to_string(),
        "heading_source": kind,
        "readings": trace.readings.len(),
        "final_state": status.state,
        "step_count": status.diagnostics.step_count,
        "steps_confirmed": tally.steps_confirmed,
        "steps_remaining": status.steps_remaining,
        "corrections": tally.corrections,
        "calibration_progress": status.calibration_progress,
        "calibrated_at": tally.calibrated_at,
        "skipped_at": tally.skipped_at,
        "arrived_at": tally.arrived_at,
        "access_failures": tally.failures,
        "final_heading": status.diagnostics.smoothed_heading,
        "relative_bearing": status.relative_bearing_deg,
        "sensor_health": status.diagnostics.sensor_health,
    }))
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let base_config = match args.config.as_ref() {
        Some(path) => NavConfig::load(path)?,
        None => NavConfig::default(),
    };
    let mut results = Vec::new();

    if let Some(dir) = args.trace_dir.as_ref() {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if !(name.starts_with("trace_") && (name.ends_with(".json") || name.ends_with(".json.gz"))) {
                continue;
            }
            match run_once(&path, &args, &base_config) {
                Ok(res) => results.push(res),
                Err(e) => eprintln!("Failed {}: {}", path.display(), e),
            }
        }
    } else if let Some(log) = args.log.as_ref() {
        results.push(run_once(log, &args, &base_config)?);
    } else {
        anyhow::bail!("Provide --log or --trace-dir");
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
