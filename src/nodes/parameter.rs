//! Parameter nodes: externally supplied flow values.

use serde::Serialize;

use crate::context::EventContext;
use crate::error::{SimError, SimResult};
use crate::node::FunctionNode;
use crate::port::NodeInterface;
use crate::types::PortValue;

/// Name of the single flow output of a [`ParameterNode`].
pub const PARAMETER_PORT: &str = "parameter";

/// A function node that assigns a preset value to its `parameter` output.
///
/// Usually created through
/// [`Model::add_parameter`](crate::structure::Model::add_parameter) and
/// linked to the flow inputs that need the value.
#[derive(Clone, Debug, Default)]
pub struct ParameterNode {
    value: Option<PortValue>,
}

impl ParameterNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value<T: Serialize>(value: T) -> SimResult<Self> {
        let mut node = Self::new();
        node.set_value(value)?;
        Ok(node)
    }

    pub fn set_value<T: Serialize>(&mut self, value: T) -> SimResult<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| SimError::logic(format!("Parameter value cannot be encoded: {}", e)))?;
        self.value = Some(value);
        Ok(())
    }

    pub fn value(&self) -> Option<&PortValue> {
        self.value.as_ref()
    }
}

impl FunctionNode for ParameterNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface::new().with_flow_output(PARAMETER_PORT)
    }

    fn flow_event(&mut self, ctx: &mut EventContext<'_>) -> SimResult<()> {
        let Some(value) = self.value.clone() else {
            return Err(SimError::logic(format!(
                "No value provided for parameter node ({})",
                ctx.node_name()
            )));
        };
        ctx.assign(PARAMETER_PORT, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_value() {
        let node = ParameterNode::with_value(2.5).unwrap();
        assert_eq!(node.value(), Some(&json!(2.5)));
        assert!(ParameterNode::new().value().is_none());
        assert_eq!(node.interface().len(), 1);
    }
}
