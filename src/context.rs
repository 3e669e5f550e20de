//! Run-wide and per-event context handed to nodes.
//!
//! [`SimulationContext`] owns everything shared by all nodes of one run: the
//! seeded random generator, the [`DiscreteEventTime`] and the trace output.
//! Nodes never reach it directly. Each handler call receives an
//! [`EventContext`] that lends out the generator and gives access to the
//! node's own ports, with access rules that depend on the [`EventPhase`].

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use crate::error::{SimError, SimResult};
use crate::event_time::DiscreteEventTime;
use crate::port::{DataGoal, DataMode, NodeInterface, PortBuffers};
use crate::time::{Duration, TimePoint};
use crate::trace::{TraceFlags, Tracer};
use crate::types::PortValue;

/// Random generator shared by every node of a run.
pub type SimRng = ChaCha8Rng;

/// The kind of event a handler is processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventPhase {
    Initialization,
    Unplanned,
    Planned,
    Finalization,
    Flow,
}

impl fmt::Display for EventPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventPhase::Initialization => "initialization",
            EventPhase::Unplanned => "unplanned",
            EventPhase::Planned => "planned",
            EventPhase::Finalization => "finalization",
            EventPhase::Flow => "flow",
        };
        write!(f, "{}", name)
    }
}

/// State shared by all nodes of one simulation run.
#[derive(Debug)]
pub struct SimulationContext {
    seed: u64,
    rng: SimRng,
    event_time: DiscreteEventTime,
    tracer: Tracer,
}

impl SimulationContext {
    /// A context starting at `start_t` whose generator is seeded with `seed`.
    pub fn new(seed: u64, start_t: TimePoint) -> Self {
        Self {
            seed,
            rng: SimRng::seed_from_u64(seed),
            event_time: DiscreteEventTime::with_time(start_t),
            tracer: Tracer::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn rng(&mut self) -> &mut SimRng {
        &mut self.rng
    }

    pub fn event_time(&self) -> &DiscreteEventTime {
        &self.event_time
    }

    pub(crate) fn event_time_mut(&mut self) -> &mut DiscreteEventTime {
        &mut self.event_time
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub(crate) fn tracer_mut(&mut self) -> &mut Tracer {
        &mut self.tracer
    }

    /// Counts one more event at the current instant.
    pub(crate) fn next_event(&mut self) {
        self.event_time.advance();
    }

    pub(crate) fn trace_event(&mut self, full_name: &str, flags: TraceFlags, kind: &str) -> SimResult<()> {
        self.tracer.event(&self.event_time, full_name, flags, kind)
    }

    pub(crate) fn trace_elapsed(
        &mut self,
        full_name: &str,
        flags: TraceFlags,
        elapsed: Duration,
    ) -> SimResult<()> {
        self.tracer.elapsed(&self.event_time, full_name, flags, elapsed)
    }

    pub(crate) fn trace_planned(
        &mut self,
        full_name: &str,
        flags: TraceFlags,
        planned: Duration,
    ) -> SimResult<()> {
        self.tracer.planned(&self.event_time, full_name, flags, planned)
    }

    pub(crate) fn trace_port(
        &mut self,
        full_name: &str,
        flags: TraceFlags,
        port: &str,
        value: &PortValue,
    ) -> SimResult<()> {
        self.tracer.port(&self.event_time, full_name, flags, port, value)
    }

    /// Attributes `err` to the node `full_name`, printing it to the trace the
    /// first time it is attributed.
    pub(crate) fn abort(&mut self, full_name: &str, err: SimError) -> SimError {
        if err.is_system_error() {
            return err;
        }
        if let Err(trace_err) = self.tracer.error(&self.event_time, full_name, &err.to_string()) {
            warn!("Failed to trace error of node {}: {}", full_name, trace_err);
        }
        err.in_node(full_name)
    }
}

/// Access to the running simulation from inside one node event.
///
/// # Port access rules
///
/// | Operation | Allowed in |
/// |---|---|
/// | [`flow_input`](Self::flow_input) | every phase, once the input is set |
/// | [`received`](Self::received), [`message`](Self::message) | unplanned events |
/// | [`send`](Self::send) | planned and unplanned events |
/// | [`assign`](Self::assign) | flow and finalization events |
pub struct EventContext<'a> {
    phase: EventPhase,
    full_name: &'a str,
    interface: &'a NodeInterface,
    buffers: &'a mut PortBuffers,
    flags: TraceFlags,
    sim: &'a mut SimulationContext,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        phase: EventPhase,
        full_name: &'a str,
        interface: &'a NodeInterface,
        buffers: &'a mut PortBuffers,
        flags: TraceFlags,
        sim: &'a mut SimulationContext,
    ) -> Self {
        Self {
            phase,
            full_name,
            interface,
            buffers,
            flags,
            sim,
        }
    }

    pub fn phase(&self) -> EventPhase {
        self.phase
    }

    /// Full hierarchical name of the node, e.g. `top.queue.server`.
    pub fn node_name(&self) -> &str {
        self.full_name
    }

    pub fn interface(&self) -> &NodeInterface {
        self.interface
    }

    /// Current simulated time.
    pub fn time(&self) -> &TimePoint {
        self.sim.event_time().t()
    }

    pub fn event_time(&self) -> &DiscreteEventTime {
        self.sim.event_time()
    }

    /// The run's random generator.
    pub fn rng(&mut self) -> &mut SimRng {
        self.sim.rng()
    }

    pub(crate) fn flags(&self) -> TraceFlags {
        self.flags
    }

    pub(crate) fn sim_mut(&mut self) -> &mut SimulationContext {
        &mut *self.sim
    }

    /// Value on the flow input `port`.
    pub fn flow_input(&self, port: &str) -> SimResult<&PortValue> {
        self.interface
            .expect(port, DataMode::Flow, DataGoal::Input, self.full_name)?;
        self.buffers.flow_input(port).ok_or_else(|| {
            SimError::logic(format!(
                "Flow input port ({}) of node ({}) has no value",
                port, self.full_name
            ))
        })
    }

    /// Value on the flow input `port`, deserialized into `T`.
    pub fn flow_input_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.flow_input(port)?;
        self.decode(port, value)
    }

    /// Returns `true` if the message being handled arrived on `port`.
    pub fn received(&self, port: &str) -> bool {
        self.phase == EventPhase::Unplanned
            && matches!(self.buffers.message_input(), Some((name, _)) if name == port)
    }

    /// The message received on `port`.
    pub fn message(&self, port: &str) -> SimResult<&PortValue> {
        self.interface
            .expect(port, DataMode::Message, DataGoal::Input, self.full_name)?;
        if self.phase != EventPhase::Unplanned {
            return Err(SimError::logic(format!(
                "Attempt to read message input port ({}) of node ({}) outside an unplanned event",
                port, self.full_name
            )));
        }
        match self.buffers.message_input() {
            Some((name, value)) if name == port => Ok(value),
            _ => Err(SimError::logic(format!(
                "Message input port ({}) of node ({}) has received no value",
                port, self.full_name
            ))),
        }
    }

    /// The message received on `port`, deserialized into `T`.
    pub fn message_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.message(port)?;
        self.decode(port, value)
    }

    /// Sends `value` on the message output `port`.
    pub fn send<T: Serialize>(&mut self, port: &str, value: T) -> SimResult<()> {
        self.interface
            .expect(port, DataMode::Message, DataGoal::Output, self.full_name)?;
        if !matches!(self.phase, EventPhase::Planned | EventPhase::Unplanned) {
            return Err(SimError::logic(format!(
                "Attempt to send on message output port ({}) of node ({}) during {} event",
                port, self.full_name, self.phase
            )));
        }
        let value = self.encode(port, value)?;
        self.buffers.push_message_output(port, value);
        Ok(())
    }

    /// Assigns `value` to the flow output `port`.
    pub fn assign<T: Serialize>(&mut self, port: &str, value: T) -> SimResult<()> {
        self.interface
            .expect(port, DataMode::Flow, DataGoal::Output, self.full_name)?;
        if !matches!(self.phase, EventPhase::Flow | EventPhase::Finalization) {
            return Err(SimError::logic(format!(
                "Attempt to assign flow output port ({}) of node ({}) during {} event",
                port, self.full_name, self.phase
            )));
        }
        let value = self.encode(port, value)?;
        self.buffers.assign_flow_output(port, value);
        Ok(())
    }

    /// Writes `text` to the model trace.
    pub fn print(&mut self, text: impl AsRef<str>) -> SimResult<()> {
        let SimulationContext {
            event_time, tracer, ..
        } = &mut *self.sim;
        tracer.print(event_time, self.full_name, text.as_ref())
    }

    pub(crate) fn encode<T: Serialize>(&self, port: &str, value: T) -> SimResult<PortValue> {
        serde_json::to_value(value).map_err(|e| {
            SimError::logic(format!(
                "Value for port ({}) of node ({}) cannot be encoded: {}",
                port, self.full_name, e
            ))
        })
    }

    pub(crate) fn decode<T: DeserializeOwned>(&self, port: &str, value: &PortValue) -> SimResult<T> {
        T::deserialize(value).map_err(|e| {
            SimError::logic(format!(
                "Value on port ({}) of node ({}) has an unexpected type: {}",
                port, self.full_name, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use serde_json::json;

    fn interface() -> NodeInterface {
        NodeInterface::new()
            .with_flow_input("rate")
            .with_message_input("job")
            .with_message_output("done")
            .with_flow_output("count")
    }

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SimulationContext::new(7, TimePoint::new());
        let mut b = SimulationContext::new(7, TimePoint::new());
        let xs: Vec<u32> = (0..4).map(|_| a.rng().gen()).collect();
        let ys: Vec<u32> = (0..4).map(|_| b.rng().gen()).collect();
        assert_eq!(xs, ys);
        assert_eq!(a.seed(), 7);
    }

    #[test]
    fn test_unplanned_access() {
        let iface = interface();
        let mut buffers = PortBuffers::new();
        buffers.set_flow_input("rate", json!(0.5));
        buffers.set_message_input("job", json!({"id": 3}));
        let mut sim = SimulationContext::new(1, TimePoint::new());
        let mut ctx = EventContext::new(
            EventPhase::Unplanned,
            "top.server",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );

        assert_eq!(ctx.flow_input_as::<f64>("rate").unwrap(), 0.5);
        assert!(ctx.received("job"));
        assert_eq!(ctx.message("job").unwrap()["id"], 3);
        ctx.send("done", 3).unwrap();
        assert!(ctx.assign("count", 1).is_err());
        assert!(ctx.message("rate").is_err());
        assert_eq!(buffers.message_outputs().len(), 1);
    }

    #[test]
    fn test_phase_rules() {
        let iface = interface();
        let mut buffers = PortBuffers::new();
        let mut sim = SimulationContext::new(1, TimePoint::new());
        let mut ctx = EventContext::new(
            EventPhase::Finalization,
            "top.server",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );

        assert!(!ctx.received("job"));
        assert!(ctx.message("job").is_err());
        let err = ctx.send("done", 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to send on message output port (done) of node (top.server) during finalization event"
        );
        ctx.assign("count", 12).unwrap();
        let err = ctx.flow_input("rate").unwrap_err();
        assert_eq!(err.to_string(), "Flow input port (rate) of node (top.server) has no value");
        assert_eq!(buffers.flow_output("count"), Some(&json!(12)));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let iface = interface();
        let mut buffers = PortBuffers::new();
        buffers.set_flow_input("rate", json!("fast"));
        let mut sim = SimulationContext::new(1, TimePoint::new());
        let ctx = EventContext::new(
            EventPhase::Initialization,
            "top.server",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        assert!(ctx.flow_input_as::<f64>("rate").is_err());
    }
}
