//! # Jikoku Simulation Framework
//!
//! A hierarchical discrete-event simulation engine in the DEVS tradition,
//! built on exact multi-scale time.
//!
//! ## Design Principles
//!
//! - **Exact Time**: Durations are integer multipliers at power-of-1000
//!   scales, from yoctoseconds to yottaseconds. Time points keep one base-1000
//!   digit per scale, so events microseconds apart stay distinct even years
//!   into a run, and scheduling never touches floating point.
//! - **Hierarchical Models**: A [`Model`] is a tree of composite nodes whose
//!   leaves are atomic (timed state machines), function (one-shot flow
//!   computations) or collection (keyed sets of agents) nodes. Composites only
//!   name and wire their children.
//! - **Two Kinds of Data**: Flow ports carry values fixed before a node's
//!   first event or produced at its last; message ports carry values
//!   exchanged while the simulation runs.
//! - **Deterministic Runs**: One seeded generator is shared by all nodes, and
//!   simultaneous events are processed in a fixed order, so the same model and
//!   seed always produce the same trace.
//!
//! ## Features
//!
//! - `parallel` - Run experiment seeds in parallel using rayon
//!
//! ## Quick Start
//!
//! ```rust
//! use jikoku::{Duration, Model, Simulation, SimulationConfig, ROOT};
//! use jikoku::nodes::{CounterNode, PeriodicNode};
//!
//! let mut model = Model::new();
//! let clock = model.add_atomic(ROOT, "clock", PeriodicNode::new(Duration::millis(250)))?;
//! let counter = model.add_atomic(ROOT, "counter", CounterNode::new())?;
//! model.link_inner(ROOT, clock, "tick", counter, "in")?;
//!
//! let config = SimulationConfig::with_duration(Duration::seconds(1))?;
//! let mut sim = Simulation::new(model, config)?;
//! sim.process_remaining_events()?;
//!
//! let counter = sim.model().node::<CounterNode>(counter).unwrap();
//! assert_eq!(counter.count, 4);
//! println!("{}", sim.stats().summary());
//! # Ok::<(), jikoku::SimError>(())
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! use jikoku::config::SimConfig;
//!
//! let config = SimConfig::from_yaml_file("simulation.yaml")?;
//! model.set_trace_flags(ROOT, config.trace)?;
//! let sim = Simulation::new(model, config.simulation_config()?)?;
//! ```

pub mod time;
pub mod event_time;
pub mod error;
pub mod types;
pub mod port;
pub mod trace;
pub mod context;
pub mod node;
pub mod collection;
pub mod structure;
pub mod simulation;
pub mod config;
pub mod stats;
pub mod experiment;
pub mod nodes;

// Re-export commonly used types
pub use time::{Duration, Scale, TimeCache, TimeError, TimePoint, TimeQueue, TimeSequence, NO_SCALE};
pub use event_time::DiscreteEventTime;
pub use error::{SimError, SimResult};
pub use types::{EventId, NodeId, PortName, PortValue};
pub use port::{DataGoal, DataMode, NodeInterface};
pub use trace::{SharedTrace, TraceFlags, TraceSink, WriterSink};
pub use context::{EventContext, EventPhase, SimRng};
pub use node::{AtomicNode, FunctionNode, NodeKind};
pub use collection::{AgentFactory, Collection, CollectionContext, CollectionNode};
pub use structure::{Model, ROOT};
pub use simulation::{Simulation, SimulationConfig};
pub use config::{ConfigError, ConfigFormat, SimConfig, SimConfigBuilder};
pub use stats::{SimulationStats, Timer};
pub use experiment::{Experiment, RunOutcome};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// overrides `level` when set.
///
/// # Example
///
/// ```rust,ignore
/// jikoku::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
