use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::time::{sleep, Duration};

use wayfind_rs::platform::{DetachedStreams, MotionPermission};
use wayfind_rs::sensors::{self, BeaconPlan, HeadingPlan, SimulatedPermissions, WalkPlan};
use wayfind_rs::{
    spawn_session, HeadingSourceKind, NavConfig, NavError, NavState, NavigationSession,
    SessionEvent, SessionRuntime,
};

#[derive(Parser, Debug)]
#[command(name = "wayfind")]
#[command(about = "Indoor step-counting navigation on simulated sensors", long_about = None)]
struct Args {
    /// Give up after this many seconds (0 = run until the session closes)
    #[arg(value_name = "SECONDS", default_value = "60")]
    duration: u64,

    /// Session config (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Destination bearing in degrees, overrides the config
    #[arg(long)]
    destination: Option<f64>,

    /// Route length in steps, overrides the config
    #[arg(long)]
    steps: Option<u32>,

    /// Which heading field the simulated platform delivers
    #[arg(long, value_enum, default_value = "compass-heading")]
    heading_source: HeadingSourceKind,

    /// Skip calibration once the grace period has passed
    #[arg(long)]
    auto_skip: bool,

    /// Simulate a user refusing motion access
    #[arg(long)]
    deny_motion: bool,

    /// Print the arrow for simulated headings around the compass and exit
    #[arg(long)]
    sweep: bool,

    /// Output directory
    #[arg(long, default_value = "wayfind_sessions")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = match args.config.as_ref() {
        Some(path) => NavConfig::load(path)?,
        None => NavConfig::default(),
    };
    if let Some(destination) = args.destination {
        config.destination_bearing_deg = destination;
    }
    if let Some(steps) = args.steps {
        config.total_steps = steps;
    }
    config.validate()?;

    if args.sweep {
        return run_sweep(config, args.heading_source);
    }

    println!("[{}] Wayfind starting", ts_now());
    println!("  Destination: {:.1}°", config.destination_bearing_deg);
    println!("  Route: {} steps, {} checkpoints", config.total_steps, config.checkpoints.len());
    println!("  Heading source: {:?}", args.heading_source);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let permissions = Arc::new(SimulatedPermissions {
        motion: if args.deny_motion {
            MotionPermission::Denied
        } else {
            MotionPermission::Granted
        },
        ..SimulatedPermissions::default()
    });

    let walk = WalkPlan::default();
    let beacons: Vec<BeaconPlan> = config
        .checkpoints
        .iter()
        .enumerate()
        .map(|(i, cp)| {
            BeaconPlan::new(
                &format!("beacon-{}", i),
                &cp.beacon_name,
                cp.step_value as f64 * walk.step_period_secs,
            )
        })
        .collect();
    let heading_plan = HeadingPlan {
        settle_deg: config.destination_bearing_deg,
        ..HeadingPlan::default()
    };

    let SessionRuntime {
        handle,
        mut status,
        mut events,
        task,
    } = spawn_session(config, args.heading_source.build(), permissions)?;

    // Producers stop on their own once the session closes
    let _compass = tokio::spawn(sensors::compass_loop(handle.clone(), heading_plan, args.heading_source));
    let _walker = tokio::spawn(sensors::walk_loop(handle.clone(), walk));
    let _beacons = tokio::spawn(sensors::beacon_loop(handle.clone(), beacons));

    let start = Utc::now();
    let mut last_status_update = Utc::now();
    let mut finish_requested = false;

    loop {
        tokio::select! {
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            Some(event) = events.recv() => report_event(&event),
            _ = sleep(Duration::from_millis(500)) => {}
        }

        let snapshot = status.borrow().clone();
        if snapshot.closed {
            break;
        }

        let now = Utc::now();
        if now.signed_duration_since(last_status_update).num_seconds() >= 2 {
            println!("[{}] {}", ts_now(), snapshot.summary_line());
            last_status_update = now;
        }

        if let Some(message) = snapshot.failure_message.as_ref() {
            println!("[{}] {}", ts_now(), message);
            handle.abort().await;
            continue;
        }

        match snapshot.state {
            NavState::Calibrating if args.auto_skip && snapshot.can_skip_calibration => {
                if let Err(e) = handle.skip_calibration().await {
                    log::warn!("skip rejected: {}", e);
                }
            }
            NavState::Arrived if !finish_requested => {
                finish_requested = true;
                if let Err(e) = handle.finish().await {
                    log::warn!("finish rejected: {}", e);
                }
            }
            _ => {}
        }

        if args.duration > 0 && now.signed_duration_since(start).num_seconds() as u64 >= args.duration {
            println!("[{}] Duration reached, stopping...", ts_now());
            handle.abort().await;
        }
    }

    let final_status = task.await?;
    let filename = format!("{}/status_{}_final.json", args.output_dir, ts_now_clean());
    final_status.save(&filename)?;
    println!("[{}] Final status saved to {}", ts_now(), filename);

    println!("\n=== Final Stats ===");
    println!("State: {:?}", final_status.state);
    println!("Steps: {} (remaining {})", final_status.diagnostics.step_count, final_status.steps_remaining);
    println!("Calibration coverage: {:.0}%", final_status.calibration_progress * 100.0);
    for report in &final_status.diagnostics.sensor_health {
        println!("  {:?}: {} samples", report.stream, report.samples);
    }

    // A refused permission or an unusable camera ends the run as an error
    if let Some(failure) = final_status.last_failure {
        return Err(NavError::from(failure).into());
    }
    Ok(())
}

fn report_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged { from, to } => {
            println!("[{}] {:?} -> {:?}", ts_now(), from, to)
        }
        SessionEvent::CalibrationCompleted => println!("[{}] Calibration complete", ts_now()),
        SessionEvent::CalibrationSkipped { coverage } => {
            println!("[{}] Calibration skipped at {:.0}%", ts_now(), coverage * 100.0)
        }
        SessionEvent::StepCorrected { beacon, from, to, .. } => {
            println!("[{}] Checkpoint {}: {} -> {} steps", ts_now(), beacon, from, to)
        }
        SessionEvent::Arrived { step_count } => {
            println!("[{}] Arrived after {} steps", ts_now(), step_count)
        }
        _ => log::debug!("{:?}", event),
    }
}

/// Diagnostic mode: fixed headings through the arrow math, no sensors
fn run_sweep(config: NavConfig, kind: HeadingSourceKind) -> Result<()> {
    let destination = config.destination_bearing_deg;
    let mut session = NavigationSession::new(config, kind.build(), Box::new(DetachedStreams))?;

    println!("Destination {:.1}°", session.destination_bearing());
    println!("{:>10} {:>10}", "heading", "arrow");
    let mut headings: Vec<f64> = (0..12).map(|i| i as f64 * 30.0).collect();
    headings.extend([destination, destination - 90.0]);
    for heading in headings {
        session.set_simulated_heading(Some(heading));
        let device = session.device_heading().unwrap_or(heading);
        println!("{:>9.1}° {:>+9.1}°", device, session.relative_bearing());
    }
    session.abort();
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
