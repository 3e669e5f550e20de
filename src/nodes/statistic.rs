//! Statistic nodes: sinks for flow values produced during a run.

use serde::de::DeserializeOwned;

use crate::context::EventContext;
use crate::error::{SimError, SimResult};
use crate::node::FunctionNode;
use crate::port::NodeInterface;
use crate::types::PortValue;

/// Name of the single flow input of a [`StatisticNode`].
pub const STATISTIC_PORT: &str = "statistic";

/// A function node that keeps whatever arrives on its `statistic` input.
///
/// Flow outputs of message nodes are produced at finalization, so a
/// statistic linked to one is filled once the run has finished. Read it
/// back with [`Simulation::model`](crate::simulation::Simulation::model).
#[derive(Clone, Debug, Default)]
pub struct StatisticNode {
    value: Option<PortValue>,
}

impl StatisticNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> Option<&PortValue> {
        self.value.as_ref()
    }

    /// The captured value deserialized into `T`.
    pub fn value_as<T: DeserializeOwned>(&self) -> SimResult<T> {
        let value = self
            .value
            .as_ref()
            .ok_or_else(|| SimError::logic("Statistic node has not received a value"))?;
        T::deserialize(value)
            .map_err(|e| SimError::logic(format!("Statistic value has an unexpected type: {}", e)))
    }
}

impl FunctionNode for StatisticNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface::new().with_flow_input(STATISTIC_PORT)
    }

    fn flow_event(&mut self, ctx: &mut EventContext<'_>) -> SimResult<()> {
        self.value = Some(ctx.flow_input(STATISTIC_PORT)?.clone());
        Ok(())
    }
}
