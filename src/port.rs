//! Ports and pending port values.
//!
//! A node declares its ports once through a [`NodeInterface`]. During a run
//! the driver keeps the values travelling through those ports in the node's
//! [`PortBuffers`]:
//!
//! - flow inputs are set once, before the node's first event, and stay set;
//! - a message input holds the single message being delivered;
//! - message outputs accumulate whatever the node sends during one event;
//! - flow outputs are assigned during flow or finalization events.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::{SimError, SimResult};
use crate::types::{PortName, PortValue};

/// Whether a port carries flow data or messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    Flow,
    Message,
}

/// Direction of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataGoal {
    Input,
    Output,
}

impl fmt::Display for DataMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataMode::Flow => write!(f, "flow"),
            DataMode::Message => write!(f, "message"),
        }
    }
}

impl fmt::Display for DataGoal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataGoal::Input => write!(f, "input"),
            DataGoal::Output => write!(f, "output"),
        }
    }
}

/// Describes a single port.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: PortName,
    pub mode: DataMode,
    pub goal: DataGoal,
}

impl PortSpec {
    pub fn new(name: impl Into<PortName>, mode: DataMode, goal: DataGoal) -> Self {
        Self {
            name: name.into(),
            mode,
            goal,
        }
    }
}

/// The set of ports a node declares, in declaration order.
///
/// # Example
///
/// ```rust
/// use jikoku::port::{DataGoal, DataMode, NodeInterface};
///
/// let interface = NodeInterface::new()
///     .with_flow_input("rate")
///     .with_message_input("job")
///     .with_message_output("done");
/// assert_eq!(interface.len(), 3);
/// assert_eq!(interface.port("job").unwrap().mode, DataMode::Message);
/// assert_eq!(interface.names(DataMode::Flow, DataGoal::Input).count(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInterface {
    ports: Vec<PortSpec>,
}

impl NodeInterface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a port.
    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_flow_input(self, name: impl Into<PortName>) -> Self {
        self.with_port(PortSpec::new(name, DataMode::Flow, DataGoal::Input))
    }

    pub fn with_flow_output(self, name: impl Into<PortName>) -> Self {
        self.with_port(PortSpec::new(name, DataMode::Flow, DataGoal::Output))
    }

    pub fn with_message_input(self, name: impl Into<PortName>) -> Self {
        self.with_port(PortSpec::new(name, DataMode::Message, DataGoal::Input))
    }

    pub fn with_message_output(self, name: impl Into<PortName>) -> Self {
        self.with_port(PortSpec::new(name, DataMode::Message, DataGoal::Output))
    }

    pub fn ports(&self) -> &[PortSpec] {
        &self.ports
    }

    pub fn port(&self, name: &str) -> Option<&PortSpec> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Declaration index of the port `name`.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    /// Names of the ports with the given mode and goal, in declaration order.
    pub fn names(&self, mode: DataMode, goal: DataGoal) -> impl Iterator<Item = &str> + '_ {
        self.ports
            .iter()
            .filter(move |p| p.mode == mode && p.goal == goal)
            .map(|p| p.name.as_str())
    }

    /// Returns `true` if the node has any message port.
    pub fn has_message_ports(&self) -> bool {
        self.ports.iter().any(|p| p.mode == DataMode::Message)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Checks that port names are unique.
    pub fn validate(&self) -> SimResult<()> {
        let mut seen = HashSet::new();
        for port in &self.ports {
            if port.name.is_empty() {
                return Err(SimError::logic("Port names must not be empty"));
            }
            if !seen.insert(port.name.as_str()) {
                return Err(SimError::logic(format!(
                    "Port name ({}) declared more than once",
                    port.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the port `name` if it has the requested mode and goal.
    pub(crate) fn expect(
        &self,
        name: &str,
        mode: DataMode,
        goal: DataGoal,
        full_name: &str,
    ) -> SimResult<&PortSpec> {
        match self.port(name) {
            Some(port) if port.mode == mode && port.goal == goal => Ok(port),
            _ => Err(SimError::logic(format!(
                "Attempt to access {} {} port ({}), which is not a port of node ({})",
                mode, goal, name, full_name
            ))),
        }
    }
}

/// Values pending on a node's ports.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PortBuffers {
    flow_inputs: BTreeMap<PortName, PortValue>,
    flow_outputs: BTreeMap<PortName, PortValue>,
    message_input: Option<(PortName, PortValue)>,
    message_outputs: Vec<(PortName, PortValue)>,
}

impl PortBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a flow input. Returns `false`, leaving the old value, if the
    /// input was already set.
    pub fn set_flow_input(&mut self, port: &str, value: PortValue) -> bool {
        if self.flow_inputs.contains_key(port) {
            return false;
        }
        self.flow_inputs.insert(port.to_string(), value);
        true
    }

    /// Sets a flow input, replacing any previous value.
    pub fn replace_flow_input(&mut self, port: &str, value: PortValue) {
        self.flow_inputs.insert(port.to_string(), value);
    }

    pub fn flow_input(&self, port: &str) -> Option<&PortValue> {
        self.flow_inputs.get(port)
    }

    pub fn clear_flow_inputs(&mut self) {
        self.flow_inputs.clear();
    }

    /// First declared flow input of `interface` that has no value.
    pub fn missing_flow_input<'a>(&self, interface: &'a NodeInterface) -> Option<&'a str> {
        interface
            .names(DataMode::Flow, DataGoal::Input)
            .find(|name| !self.flow_inputs.contains_key(*name))
    }

    pub fn assign_flow_output(&mut self, port: &str, value: PortValue) {
        self.flow_outputs.insert(port.to_string(), value);
    }

    pub fn flow_output(&self, port: &str) -> Option<&PortValue> {
        self.flow_outputs.get(port)
    }

    pub fn clear_flow_outputs(&mut self) {
        self.flow_outputs.clear();
    }

    /// First declared flow output of `interface` that was not assigned.
    pub fn missing_flow_output<'a>(&self, interface: &'a NodeInterface) -> Option<&'a str> {
        interface
            .names(DataMode::Flow, DataGoal::Output)
            .find(|name| !self.flow_outputs.contains_key(*name))
    }

    pub fn set_message_input(&mut self, port: &str, value: PortValue) {
        self.message_input = Some((port.to_string(), value));
    }

    pub fn message_input(&self) -> Option<(&str, &PortValue)> {
        self.message_input
            .as_ref()
            .map(|(port, value)| (port.as_str(), value))
    }

    pub fn clear_message_input(&mut self) {
        self.message_input = None;
    }

    pub fn push_message_output(&mut self, port: &str, value: PortValue) {
        self.message_outputs.push((port.to_string(), value));
    }

    pub fn message_outputs(&self) -> &[(PortName, PortValue)] {
        &self.message_outputs
    }

    /// Removes and returns the messages sent so far, in sending order.
    pub fn take_message_outputs(&mut self) -> Vec<(PortName, PortValue)> {
        std::mem::take(&mut self.message_outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn interface() -> NodeInterface {
        NodeInterface::new()
            .with_flow_input("a")
            .with_flow_input("b")
            .with_message_input("in")
            .with_message_output("out")
            .with_flow_output("total")
    }

    #[test]
    fn test_interface_queries() {
        let iface = interface();
        assert_eq!(iface.index_of("in"), Some(2));
        assert_eq!(iface.index_of("nope"), None);
        let flow_inputs: Vec<_> = iface.names(DataMode::Flow, DataGoal::Input).collect();
        assert_eq!(flow_inputs, vec!["a", "b"]);
        assert!(iface.has_message_ports());
        assert!(iface.validate().is_ok());
    }

    #[test]
    fn test_duplicate_port_names_rejected() {
        let iface = NodeInterface::new()
            .with_flow_input("x")
            .with_message_output("x");
        assert!(iface.validate().is_err());
    }

    #[test]
    fn test_expect_checks_mode_and_goal() {
        let iface = interface();
        assert!(iface
            .expect("in", DataMode::Message, DataGoal::Input, "top.n")
            .is_ok());
        let err = iface
            .expect("in", DataMode::Flow, DataGoal::Input, "top.n")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to access flow input port (in), which is not a port of node (top.n)"
        );
    }

    #[test]
    fn test_flow_inputs_are_set_once() {
        let iface = interface();
        let mut buffers = PortBuffers::new();
        assert_eq!(buffers.missing_flow_input(&iface), Some("a"));
        assert!(buffers.set_flow_input("a", json!(1)));
        assert!(!buffers.set_flow_input("a", json!(2)));
        assert_eq!(buffers.flow_input("a"), Some(&json!(1)));
        assert_eq!(buffers.missing_flow_input(&iface), Some("b"));
        buffers.set_flow_input("b", json!(3));
        assert_eq!(buffers.missing_flow_input(&iface), None);
    }

    #[test]
    fn test_message_outputs_keep_order() {
        let mut buffers = PortBuffers::new();
        buffers.push_message_output("out", json!("first"));
        buffers.push_message_output("out", json!("second"));
        let sent = buffers.take_message_outputs();
        assert_eq!(sent[0].1, json!("first"));
        assert_eq!(sent[1].1, json!("second"));
        assert!(buffers.message_outputs().is_empty());
    }
}
