//! Integration tests for configuration files driving simulation runs.

use std::path::PathBuf;

use jikoku::config::{ConfigError, SimConfig, SimConfigBuilder};
use jikoku::nodes::{CounterNode, PeriodicNode};
use jikoku::time::{Duration, TimePoint};
use jikoku::{Model, NodeId, SharedTrace, Simulation, TraceFlags, ROOT};

fn temp_path(file_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("jikoku-{}-{}", std::process::id(), file_name))
}

fn clock_model() -> (Model, NodeId) {
    let mut model = Model::new();
    let clock = model
        .add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(1)))
        .unwrap();
    let counter = model.add_atomic(ROOT, "counter", CounterNode::new()).unwrap();
    model.link_inner(ROOT, clock, "tick", counter, "in").unwrap();
    (model, counter)
}

#[test]
fn test_yaml_file_drives_a_run() {
    let path = temp_path("run.yaml");
    std::fs::write(
        &path,
        r#"
simulation:
  name: clocked
  start_time: 10_s
  total_duration: 3_s
  seed: 7
trace:
  on_event: true
"#,
    )
    .unwrap();

    let config = SimConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    let (mut model, counter) = clock_model();
    model.set_trace_flags(ROOT, config.trace).unwrap();
    let trace = SharedTrace::new();
    let mut sim = Simulation::new(model, config.simulation_config().unwrap()).unwrap();
    sim.set_trace_sink(trace.clone());

    assert_eq!(
        *sim.start_time(),
        TimePoint::from_duration(Duration::seconds(10)).unwrap()
    );
    sim.process_remaining_events().unwrap();

    // Ticks at 11, 12 and 13 s; the end time itself is included.
    let counter = sim.model().node::<CounterNode>(counter).unwrap();
    assert_eq!(counter.count, 3);
    assert_eq!(sim.stats().metadata.name, "clocked");
    assert_eq!(sim.stats().metadata.seed, 7);

    let text = trace.to_text();
    assert!(text.contains("top.clock$planned"));
    assert!(text.contains("top.counter$unplanned"));
    assert!(!text.contains("$planned_dt"));
    assert!(!text.contains("#tick"));
}

#[test]
fn test_json_file_with_end_time() {
    let path = temp_path("run.json");
    std::fs::write(
        &path,
        r#"{"simulation": {"end_time": "2500_ms", "seed": 3}}"#,
    )
    .unwrap();

    let config = SimConfig::from_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(config.trace, TraceFlags::none());

    let (model, counter) = clock_model();
    let mut sim = Simulation::new(model, config.simulation_config().unwrap()).unwrap();
    sim.process_remaining_events().unwrap();

    let counter = sim.model().node::<CounterNode>(counter).unwrap();
    assert_eq!(counter.count, 2);
    assert_eq!(
        *sim.time(),
        TimePoint::from_duration(Duration::millis(2500)).unwrap()
    );
}

#[test]
fn test_saved_config_loads_back() {
    let path = temp_path("saved.yaml");
    let config = SimConfigBuilder::new()
        .name("saved")
        .total_duration(Duration::minutes(10))
        .seed(99)
        .trace(TraceFlags::all())
        .build()
        .unwrap();
    config.to_yaml_file(&path).unwrap();

    let loaded = SimConfig::from_yaml_file(&path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(loaded.simulation.name, "saved");
    assert_eq!(loaded.simulation.total_duration, Some(Duration::seconds(600)));
    assert_eq!(loaded.simulation.seed, 99);
    assert_eq!(loaded.trace, TraceFlags::all());
}

#[test]
fn test_unbounded_config_ends_when_idle() {
    let config = SimConfig::from_yaml("simulation:\n  total_duration: \"inf\"\n").unwrap();
    let sim_config = config.simulation_config().unwrap();
    assert!(sim_config.can_end_early);

    let mut model = Model::new();
    model
        .add_atomic(ROOT, "counter", CounterNode::new())
        .unwrap();
    let mut sim = Simulation::new(model, sim_config).unwrap();
    sim.process_remaining_events().unwrap();
    assert!(sim.finished());
    assert!(sim.time().is_zero());
}

#[test]
fn test_bad_files_are_rejected() {
    assert!(matches!(
        SimConfig::from_file("missing.toml"),
        Err(ConfigError::UnknownFormat(_))
    ));
    assert!(matches!(
        SimConfig::from_file(temp_path("does-not-exist.yaml")),
        Err(ConfigError::Io(_))
    ));
    assert!(matches!(
        SimConfig::from_yaml("simulation:\n  end_time: 5_parsecs\n"),
        Err(ConfigError::Yaml(_))
    ));
    assert!(matches!(
        SimConfig::from_yaml("simulation:\n  log_level: chatty\n"),
        Err(ConfigError::Validation(_))
    ));
}
