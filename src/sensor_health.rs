use serde::{Deserialize, Serialize};

use crate::config::NavConfig;
use crate::platform::StreamKind;

/// Tracks liveness of a single input stream
#[derive(Clone, Debug)]
pub struct StreamHealth {
    pub kind: StreamKind,
    pub silence_threshold_secs: f64,
    last_update: Option<f64>,
    samples: u64,
}

impl StreamHealth {
    pub fn new(kind: StreamKind, silence_threshold_secs: f64) -> Self {
        StreamHealth {
            kind,
            silence_threshold_secs,
            last_update: None,
            samples: 0,
        }
    }

    pub fn update(&mut self, timestamp: f64) {
        self.last_update = Some(self.last_update.map_or(timestamp, |t| t.max(timestamp)));
        self.samples += 1;
    }

    pub fn time_since_last_update(&self, now: f64) -> Option<f64> {
        self.last_update.map(|t| (now - t).max(0.0))
    }

    /// Never reported, or quiet for longer than the threshold
    pub fn is_silent(&self, now: f64) -> bool {
        self.time_since_last_update(now)
            .map(|d| d > self.silence_threshold_secs)
            .unwrap_or(true)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn report(&self, now: f64) -> StreamReport {
        StreamReport {
            stream: self.kind,
            samples: self.samples,
            healthy: !self.is_silent(now),
            silence_secs: self.time_since_last_update(now),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamReport {
    pub stream: StreamKind,
    pub samples: u64,
    pub healthy: bool,
    /// None if the stream never delivered anything
    pub silence_secs: Option<f64>,
}

/// Liveness of heading, motion and beacon streams for one session
#[derive(Clone, Debug)]
pub struct SensorHealth {
    pub heading: StreamHealth,
    pub motion: StreamHealth,
    pub beacon: StreamHealth,
}

impl SensorHealth {
    pub fn new(config: &NavConfig) -> Self {
        SensorHealth {
            heading: StreamHealth::new(StreamKind::Heading, config.heading_silence_secs),
            motion: StreamHealth::new(StreamKind::Motion, config.motion_silence_secs),
            beacon: StreamHealth::new(StreamKind::Beacon, config.beacon_silence_secs),
        }
    }

    pub fn check(&self, now: f64) -> Vec<StreamReport> {
        vec![
            self.heading.report(now),
            self.motion.report(now),
            self.beacon.report(now),
        ]
    }

    /// Format health status for logging
    pub fn format_status(&self, now: f64) -> String {
        let parts: Vec<String> = self
            .check(now)
            .iter()
            .map(|r| {
                let status = match (r.healthy, r.silence_secs) {
                    (true, _) => "ok".to_string(),
                    (false, Some(secs)) => format!("silent {:.1}s", secs),
                    (false, None) => "no data".to_string(),
                };
                format!("{} {}", r.stream.label(), status)
            })
            .collect();
        format!("Health: {}", parts.join(" | "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_silence_detection() {
        let mut health = StreamHealth::new(StreamKind::Heading, 1.0);

        // Never reported counts as silent
        assert!(health.is_silent(0.0));
        assert!(health.time_since_last_update(0.0).is_none());

        health.update(10.0);
        assert!(!health.is_silent(10.5));
        assert!(health.is_silent(11.2));

        health.update(11.5);
        assert!(!health.is_silent(12.0));
        assert_eq!(health.samples(), 2);
    }

    #[test]
    fn test_out_of_order_timestamps_keep_latest() {
        let mut health = StreamHealth::new(StreamKind::Beacon, 1.0);
        health.update(5.0);
        health.update(3.0);
        assert_eq!(health.time_since_last_update(5.5), Some(0.5));
    }

    #[test]
    fn test_format_status() {
        let mut health = SensorHealth::new(&NavConfig::default());
        health.heading.update(1.0);
        let status = health.format_status(1.5);
        assert_eq!(status, "Health: Heading ok | Motion no data | Beacon no data");
        assert!(!health.check(1.5)[1].healthy);
    }
}
