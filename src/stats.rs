//! Statistics collection and export for simulation runs.
//!
//! The driver counts every event it processes by kind and measures the
//! wall-clock time spent inside node handlers. The result can be exported as
//! JSON or CSV, or printed as a short summary.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use crate::context::EventPhase;

/// Everything recorded about one run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub metadata: SimulationMetadata,

    pub events: EventStats,

    pub timing: TimingStats,
}

/// What was run, and when.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimulationMetadata {
    /// Name given in the run configuration
    pub name: String,

    /// Seed of the random generator
    pub seed: u64,

    /// Start time (wall clock)
    pub start_time: Option<String>,

    /// End time (wall clock)
    pub end_time: Option<String>,

    /// Crate version
    pub version: String,

    /// Number of nodes in the model, the root included
    pub node_count: usize,
}

/// Number of processed events by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    pub initialization: u64,
    pub unplanned: u64,
    pub planned: u64,
    pub finalization: u64,
    pub flow: u64,

    /// Messages delivered to destination ports
    pub messages_delivered: u64,

    /// Index of the last distinct simulated time
    pub final_t_index: i64,

    /// Last simulated time, as printed in traces
    pub final_time: String,
}

impl EventStats {
    /// Counts one event of the given kind.
    pub fn record(&mut self, phase: EventPhase) {
        match phase {
            EventPhase::Initialization => self.initialization += 1,
            EventPhase::Unplanned => self.unplanned += 1,
            EventPhase::Planned => self.planned += 1,
            EventPhase::Finalization => self.finalization += 1,
            EventPhase::Flow => self.flow += 1,
        }
    }

    /// Events of every kind.
    pub fn total(&self) -> u64 {
        self.initialization + self.unplanned + self.planned + self.finalization + self.flow
    }
}

/// Wall-clock measurements.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// From initialization to the end of finalization
    pub total_wall_time_ms: f64,

    /// Wall-clock time spent inside node handlers
    pub event_wall_time_ms: f64,

    pub events_per_second: f64,
}

impl SimulationStats {
    /// Empty statistics stamped with the crate version.
    pub fn new() -> Self {
        Self {
            metadata: SimulationMetadata {
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..SimulationMetadata::default()
            },
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Stamps the wall-clock start.
    pub fn record_start(&mut self) {
        self.metadata.start_time = Some(unix_now());
    }

    /// Stamps the wall-clock end.
    pub fn record_end(&mut self) {
        self.metadata.end_time = Some(unix_now());
    }

    /// Fills in wall-clock totals and the event rate.
    pub fn compute_timing(&mut self, wall_time_ms: f64, event_wall_time_ms: f64) {
        self.timing.total_wall_time_ms = wall_time_ms;
        self.timing.event_wall_time_ms = event_wall_time_ms;
        if wall_time_ms > 0.0 {
            let seconds = wall_time_ms / 1000.0;
            self.timing.events_per_second = self.events.total() as f64 / seconds;
        }
    }

    /// Pretty-printed JSON of all statistics.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// One `metric,value` row per event count and timing figure.
    pub fn to_csv(&self) -> String {
        let rows: [(&str, String); 10] = [
            ("initialization_events", self.events.initialization.to_string()),
            ("unplanned_events", self.events.unplanned.to_string()),
            ("planned_events", self.events.planned.to_string()),
            ("finalization_events", self.events.finalization.to_string()),
            ("flow_events", self.events.flow.to_string()),
            ("messages_delivered", self.events.messages_delivered.to_string()),
            ("final_t_index", self.events.final_t_index.to_string()),
            ("wall_time_ms", format!("{:.2}", self.timing.total_wall_time_ms)),
            ("event_wall_time_ms", format!("{:.2}", self.timing.event_wall_time_ms)),
            ("events_per_second", format!("{:.2}", self.timing.events_per_second)),
        ];
        let mut csv = String::from("metric,value\n");
        for (metric, value) in rows {
            csv.push_str(metric);
            csv.push(',');
            csv.push_str(&value);
            csv.push('\n');
        }
        csv
    }

    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Writes a short plain-text report.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Simulation Statistics ===")?;
        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        writeln!(w, "Seed: {}", self.metadata.seed)?;
        writeln!(w, "Nodes: {}", self.metadata.node_count)?;
        writeln!(w)?;

        writeln!(w, "--- Events ---")?;
        writeln!(w, "Initialization: {}", self.events.initialization)?;
        writeln!(w, "Unplanned: {}", self.events.unplanned)?;
        writeln!(w, "Planned: {}", self.events.planned)?;
        writeln!(w, "Finalization: {}", self.events.finalization)?;
        writeln!(w, "Flow: {}", self.events.flow)?;
        writeln!(w, "Messages delivered: {}", self.events.messages_delivered)?;
        writeln!(w, "Final time: {}", self.events.final_time)?;
        writeln!(w)?;

        writeln!(w, "--- Timing ---")?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;
        writeln!(w, "Event time: {:.2} ms", self.timing.event_wall_time_ms)?;
        writeln!(w, "Events/sec: {:.2}", self.timing.events_per_second)?;
        Ok(())
    }

    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        if self.write_summary(&mut buf).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Wall-clock time since a run started.
#[derive(Debug)]
pub struct Timer {
    started: std::time::Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            started: std::time::Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

/// Stopwatch accumulating wall-clock time over many start/stop intervals.
#[derive(Debug, Default)]
pub struct EventTimer {
    total: std::time::Duration,
    running: Option<std::time::Instant>,
}

impl EventTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self) {
        self.running = Some(std::time::Instant::now());
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.running.take() {
            self.total += started.elapsed();
        }
    }

    /// Accumulated time in milliseconds.
    pub fn total_ms(&self) -> f64 {
        self.total.as_secs_f64() * 1000.0
    }
}

fn unix_now() -> String {
    let now = std::time::SystemTime::now();
    let duration = now.duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    format!("{}s", duration.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_counts() {
        let mut events = EventStats::default();
        events.record(EventPhase::Initialization);
        events.record(EventPhase::Planned);
        events.record(EventPhase::Planned);
        events.record(EventPhase::Flow);
        assert_eq!(events.planned, 2);
        assert_eq!(events.total(), 4);
    }

    #[test]
    fn test_json_export() {
        let mut stats = SimulationStats::new().with_name("queue");
        stats.events.record(EventPhase::Unplanned);
        stats.events.messages_delivered = 1;
        stats.compute_timing(10.0, 2.0);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json().unwrap()).unwrap();
        assert_eq!(json["metadata"]["name"], "queue");
        assert_eq!(json["events"]["unplanned"], 1);
        assert_eq!(json["events"]["messages_delivered"], 1);
        assert_eq!(json["timing"]["events_per_second"], 100.0);
    }

    #[test]
    fn test_csv_and_summary() {
        let stats = SimulationStats::new();
        assert!(stats.to_csv().starts_with("metric,value\n"));
        assert!(stats.summary().contains("=== Simulation Statistics ==="));
    }

    #[test]
    fn test_event_timer_accumulates() {
        let mut timer = EventTimer::new();
        timer.start();
        timer.stop();
        timer.stop();
        assert!(timer.total_ms() >= 0.0);
    }
}
