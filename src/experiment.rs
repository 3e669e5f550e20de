//! Batch runs of one model over many seeds.
//!
//! An [`Experiment`] builds a fresh [`Model`] for every seed, runs it to
//! completion and collects one [`RunOutcome`] per seed. A run that fails is
//! reported in its outcome and does not affect the others.
//!
//! With the `parallel` feature the runs execute on a rayon thread pool;
//! outcomes are always returned in seed order.
//!
//! # Example
//!
//! ```rust
//! use jikoku::experiment::Experiment;
//! use jikoku::nodes::PeriodicNode;
//! use jikoku::simulation::SimulationConfig;
//! use jikoku::structure::{Model, ROOT};
//! use jikoku::time::Duration;
//!
//! let config = SimulationConfig::with_duration(Duration::seconds(10)).unwrap();
//! let experiment = Experiment::new(config, |_seed| {
//!     let mut model = Model::new();
//!     model.add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(1)))?;
//!     Ok(model)
//! })
//! .with_seed_range(0, 4);
//!
//! let outcomes = experiment.run();
//! assert_eq!(outcomes.len(), 4);
//! assert!(outcomes.iter().all(|outcome| outcome.result.is_ok()));
//! ```

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::SimResult;
use crate::simulation::{Simulation, SimulationConfig};
use crate::stats::SimulationStats;
use crate::structure::Model;

/// Result of the run for one seed.
#[derive(Debug)]
pub struct RunOutcome<T> {
    pub seed: u64,
    pub result: SimResult<T>,
}

/// Totals over the outcomes of an experiment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExperimentSummary {
    pub runs: usize,
    pub failed: usize,
    /// Events processed by the successful runs
    pub events: u64,
}

impl ExperimentSummary {
    pub fn from_outcomes(outcomes: &[RunOutcome<SimulationStats>]) -> Self {
        let mut summary = Self {
            runs: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match &outcome.result {
                Ok(stats) => summary.events += stats.events.total(),
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }
}

/// Runs a model builder for many seeds.
pub struct Experiment<F> {
    config: SimulationConfig,
    build: F,
    seeds: Vec<u64>,
    num_threads: usize,
}

impl<F> Experiment<F>
where
    F: Fn(u64) -> SimResult<Model> + Sync,
{
    /// An experiment with the single seed of `config`.
    pub fn new(config: SimulationConfig, build: F) -> Self {
        let seeds = vec![config.seed];
        Self {
            config,
            build,
            seeds,
            num_threads: 0,
        }
    }

    pub fn with_seeds(mut self, seeds: impl IntoIterator<Item = u64>) -> Self {
        self.seeds = seeds.into_iter().collect();
        self
    }

    /// Seeds `first`, `first + 1`, ... `count` of them, stopping short of
    /// `u64::MAX`. Seeds at or above
    /// [`SEED_LIMIT`](crate::simulation::SEED_LIMIT) are kept and reported as
    /// failed runs.
    pub fn with_seed_range(self, first: u64, count: u64) -> Self {
        self.with_seeds(first..first.saturating_add(count))
    }

    /// Number of worker threads; zero uses rayon's global pool. Ignored
    /// without the `parallel` feature.
    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    /// Runs every seed and returns the statistics of each run.
    pub fn run(&self) -> Vec<RunOutcome<SimulationStats>> {
        self.run_with(|sim| Ok(sim.stats().clone()))
    }

    /// Runs every seed and extracts a result from each finished simulation.
    pub fn run_with<T, G>(&self, observe: G) -> Vec<RunOutcome<T>>
    where
        T: Send,
        G: Fn(&Simulation) -> SimResult<T> + Sync,
    {
        let run_one = |seed: u64| RunOutcome {
            seed,
            result: self.run_seed(seed, &observe),
        };

        #[cfg(feature = "parallel")]
        {
            if self.num_threads > 0 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.num_threads)
                    .build()
                {
                    Ok(pool) => {
                        return pool.install(|| self.seeds.par_iter().map(|&seed| run_one(seed)).collect())
                    }
                    Err(e) => tracing::warn!("Falling back to the global thread pool: {}", e),
                }
            }
            self.seeds.par_iter().map(|&seed| run_one(seed)).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            self.seeds.iter().map(|&seed| run_one(seed)).collect()
        }
    }

    fn run_seed<T, G>(&self, seed: u64, observe: &G) -> SimResult<T>
    where
        G: Fn(&Simulation) -> SimResult<T>,
    {
        let model = (self.build)(seed)?;
        let config = self.config.clone().with_seed(seed);
        let mut sim = Simulation::new(model, config)?;
        sim.process_remaining_events()?;
        tracing::debug!(seed, "Experiment run finished");
        observe(&sim)
    }
}
