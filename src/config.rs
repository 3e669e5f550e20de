//! Configuration of simulation runs.
//!
//! Run parameters can be written as YAML or JSON and loaded into a
//! [`SimConfig`], which then produces the driver's [`SimulationConfig`].
//! Durations use the same literal syntax they print with.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   name: queueing
//!   start_time: 0_s
//!   total_duration: 10_min    # or end_time: 600_s
//!   seed: 42
//!   can_end_early: false
//!   log_level: info
//!
//! trace:
//!   on_event: true
//!   on_elapsed_duration: false
//!   on_planned_duration: true
//!   on_port_use: true
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub use crate::simulation::SEED_LIMIT;
use crate::simulation::SimulationConfig;
use crate::time::{Duration, TimePoint};
use crate::trace::TraceFlags;

/// Failures while reading, writing or checking a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Unknown configuration file extension: {0}")]
    UnknownFormat(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Run parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Name recorded in the statistics
    #[serde(default)]
    pub name: String,

    /// Offset of the first event from time zero
    #[serde(default = "default_start_time")]
    pub start_time: Duration,

    /// Offset of the end time from time zero (exclusive with `total_duration`)
    #[serde(default)]
    pub end_time: Option<Duration>,

    /// Length of the run; infinite runs until nothing is scheduled
    #[serde(default)]
    pub total_duration: Option<Duration>,

    /// Seed of the random generator
    #[serde(default)]
    pub seed: u64,

    /// Finish as soon as nothing is scheduled
    #[serde(default)]
    pub can_end_early: bool,

    /// `tracing` filter level: trace, debug, info, warn, error or off
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_start_time() -> Duration {
    Duration::ZERO
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            name: String::new(),
            start_time: default_start_time(),
            end_time: None,
            total_duration: None,
            seed: 0,
            can_end_early: false,
            log_level: default_log_level(),
        }
    }
}

impl SimulationParams {
    /// Checks durations, the seed range and the log level.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.start_time.valid() || !self.start_time.finite() {
            return Err(ConfigError::Validation(
                "Start time must be a valid, finite duration".to_string(),
            ));
        }
        match (self.end_time, self.total_duration) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Validation(
                    "Only one of end_time and total_duration may be set".to_string(),
                ));
            }
            (Some(end_time), None) => {
                if !end_time.valid() || !end_time.finite() {
                    return Err(ConfigError::Validation(
                        "End time must be a valid, finite duration".to_string(),
                    ));
                }
                if end_time < self.start_time {
                    return Err(ConfigError::Validation(format!(
                        "End time ({}) precedes start time ({})",
                        end_time, self.start_time
                    )));
                }
                if end_time == self.start_time {
                    tracing::warn!("Simulation end time equals its start time");
                }
            }
            (None, Some(total)) => {
                if !total.valid() || total < Duration::ZERO {
                    return Err(ConfigError::Validation(
                        "Total duration must be valid and non-negative".to_string(),
                    ));
                }
                if total == Duration::ZERO {
                    tracing::warn!("Simulation total duration is zero");
                }
            }
            (None, None) => {}
        }
        if self.seed >= SEED_LIMIT {
            return Err(ConfigError::Validation(format!(
                "Seed ({}) must be less than 2^32",
                self.seed
            )));
        }
        if !matches!(
            self.log_level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        ) {
            return Err(ConfigError::Validation(format!(
                "Unknown log level: {}",
                self.log_level
            )));
        }
        Ok(())
    }
}

/// Complete run configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Run parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Trace flags applied to the whole model
    #[serde(default)]
    pub trace: TraceFlags,
}

/// Text formats a [`SimConfig`] can be read from and written to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// Picks the format from a `.yaml`, `.yml` or `.json` extension.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }
}

impl SimConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses and validates `text`.
    pub fn parse(text: &str, format: ConfigFormat) -> ConfigResult<Self> {
        let config: SimConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(text)?,
            ConfigFormat::Json => serde_json::from_str(text)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn render(&self, format: ConfigFormat) -> ConfigResult<String> {
        Ok(match format {
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Reads `path` in the given format.
    pub fn read<P: AsRef<Path>>(path: P, format: ConfigFormat) -> ConfigResult<Self> {
        Self::parse(&std::fs::read_to_string(path)?, format)
    }

    /// Reads `path`, choosing the format from its extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let format = ConfigFormat::from_path(path.as_ref())?;
        Self::read(path, format)
    }

    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        Self::parse(yaml, ConfigFormat::Yaml)
    }

    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Self::parse(json, ConfigFormat::Json)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::read(path, ConfigFormat::Yaml)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        Self::read(path, ConfigFormat::Json)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.simulation.validate()
    }

    /// Writes to `path`, choosing the format from its extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let format = ConfigFormat::from_path(path.as_ref())?;
        std::fs::write(path, self.render(format)?)?;
        Ok(())
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        self.render(ConfigFormat::Yaml)
    }

    pub fn to_json(&self) -> ConfigResult<String> {
        self.render(ConfigFormat::Json)
    }

    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Builds the driver configuration.
    ///
    /// Without an end time or total duration, or with an infinite total
    /// duration, the run ends once nothing is scheduled.
    pub fn simulation_config(&self) -> ConfigResult<SimulationConfig> {
        self.validate()?;
        let params = &self.simulation;
        let point = |dt: Duration| {
            TimePoint::from_duration(dt).map_err(|e| ConfigError::Validation(e.to_string()))
        };
        let start_time = point(params.start_time)?;
        let config = match (params.end_time, params.total_duration) {
            (Some(end_time), _) => SimulationConfig::between(start_time, point(end_time)?)
                .with_can_end_early(params.can_end_early),
            (None, Some(total)) if total.finite() => {
                let end_time = start_time
                    .offset(total)
                    .map_err(|e| ConfigError::Validation(e.to_string()))?;
                SimulationConfig::between(start_time, end_time)
                    .with_can_end_early(params.can_end_early)
            }
            _ => {
                let unbounded = SimulationConfig::with_duration(Duration::inf())
                    .map_err(|e| ConfigError::Validation(e.to_string()))?;
                SimulationConfig::between(start_time, unbounded.end_time).with_can_end_early(true)
            }
        };
        Ok(config.with_seed(params.seed).with_name(params.name.clone()))
    }
}

/// Assembles a [`SimConfig`] in code.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.simulation.name = name.into();
        self
    }

    pub fn start_time(mut self, start_time: Duration) -> Self {
        self.config.simulation.start_time = start_time;
        self
    }

    /// Sets the end time, clearing any total duration.
    pub fn end_time(mut self, end_time: Duration) -> Self {
        self.config.simulation.end_time = Some(end_time);
        self.config.simulation.total_duration = None;
        self
    }

    /// Sets the total duration, clearing any end time.
    pub fn total_duration(mut self, total: Duration) -> Self {
        self.config.simulation.total_duration = Some(total);
        self.config.simulation.end_time = None;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.simulation.seed = seed;
        self
    }

    pub fn can_end_early(mut self, can_end_early: bool) -> Self {
        self.config.simulation.can_end_early = can_end_early;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    pub fn trace(mut self, flags: TraceFlags) -> Self {
        self.config.trace = flags;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SimConfig::new();
        assert_eq!(config.simulation.start_time, Duration::ZERO);
        assert_eq!(config.simulation.log_level, "info");
        assert_eq!(config.trace, TraceFlags::none());
        let sim_config = config.simulation_config().unwrap();
        assert!(sim_config.can_end_early);
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r#"
simulation:
  name: queueing
  total_duration: 10_min
  seed: 42
  log_level: debug

trace:
  on_event: true
  on_port_use: true
"#;

        let config = SimConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.simulation.total_duration, Some(Duration::minutes(10)));
        assert_eq!(config.simulation.seed, 42);
        assert!(config.trace.on_event);
        assert!(!config.trace.on_planned_duration);

        let sim_config = config.simulation_config().unwrap();
        assert_eq!(
            sim_config.end_time,
            TimePoint::from_duration(Duration::seconds(600)).unwrap()
        );
        assert_eq!(sim_config.seed, 42);
        assert_eq!(sim_config.name, "queueing");
        assert!(!sim_config.can_end_early);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "simulation": {
                "start_time": "100_s",
                "end_time": "400_s",
                "can_end_early": true
            }
        }"#;

        let config = SimConfig::from_json(json).unwrap();
        let sim_config = config.simulation_config().unwrap();
        assert_eq!(
            sim_config.start_time,
            TimePoint::from_duration(Duration::seconds(100)).unwrap()
        );
        assert!(sim_config.can_end_early);
    }

    #[test]
    fn test_builder() {
        let config = SimConfigBuilder::new()
            .total_duration(Duration::seconds(30))
            .end_time(Duration::seconds(20))
            .seed(7)
            .trace(TraceFlags::all())
            .build()
            .unwrap();

        assert_eq!(config.simulation.total_duration, None);
        assert_eq!(config.simulation.end_time, Some(Duration::seconds(20)));
        assert_eq!(config.trace, TraceFlags::all());
    }

    #[test]
    fn test_validation_both_end_and_total() {
        let yaml = r#"
simulation:
  end_time: 5_s
  total_duration: 5_s
"#;
        assert!(SimConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validation_seed_range() {
        let result = SimConfigBuilder::new().seed(SEED_LIMIT).build();
        assert!(matches!(result, Err(ConfigError::Validation(_))));
        assert!(SimConfigBuilder::new().seed(SEED_LIMIT - 1).build().is_ok());
    }

    #[test]
    fn test_validation_end_before_start() {
        let yaml = r#"
simulation:
  start_time: 10_s
  end_time: 5_s
"#;
        assert!(SimConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_duration_literal() {
        let yaml = r#"
simulation:
  total_duration: five seconds
"#;
        assert!(matches!(SimConfig::from_yaml(yaml), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_serialization_roundtrip() {
        let config = SimConfigBuilder::new()
            .total_duration(Duration::millis(250))
            .log_level("warn")
            .build()
            .unwrap();

        let yaml = config.to_yaml().unwrap();
        let restored = SimConfig::from_yaml(&yaml).unwrap();

        assert_eq!(restored.simulation.total_duration, Some(Duration::millis(250)));
        assert_eq!(restored.simulation.log_level, "warn");
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("run.YML")).unwrap(), ConfigFormat::Yaml);
        assert_eq!(ConfigFormat::from_path(Path::new("run.json")).unwrap(), ConfigFormat::Json);
        assert!(matches!(
            SimConfig::from_file("run.toml"),
            Err(ConfigError::UnknownFormat(_))
        ));
        assert!(matches!(
            SimConfig::new().save("run"),
            Err(ConfigError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_json_render_uses_duration_literals() {
        let config = SimConfigBuilder::new()
            .end_time(Duration::millis(1500))
            .build()
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&config.render(ConfigFormat::Json).unwrap()).unwrap();
        assert_eq!(json["simulation"]["end_time"], "1500_ms");
        assert_eq!(json["simulation"]["start_time"], "0_s");
    }
}
