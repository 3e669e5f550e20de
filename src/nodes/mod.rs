//! Built-in node implementations.
//!
//! # Available Nodes
//!
//! ## Flow nodes
//! - [`ParameterNode`] - Supplies a preset value on its `parameter` output
//! - [`StatisticNode`] - Keeps the value arriving on its `statistic` input
//!
//! ## Message nodes
//! - [`PeriodicNode`] - Ticks at a fixed period
//! - [`RelayNode`] - Forwards messages within the same instant
//! - [`CounterNode`] - Counts arriving messages

pub mod parameter;
pub mod statistic;
pub mod periodic;
pub mod relay;
pub mod counter;

pub use counter::CounterNode;
pub use parameter::{ParameterNode, PARAMETER_PORT};
pub use periodic::PeriodicNode;
pub use relay::RelayNode;
pub use statistic::{StatisticNode, STATISTIC_PORT};
