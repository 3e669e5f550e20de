//! The simulation driver.
//!
//! A [`Simulation`] takes ownership of a [`Model`] and runs it. All leaf nodes
//! of the hierarchy share one [`TimeQueue`] of planned events and one
//! [`TimeCache`] of past events, both keyed by [`NodeId`]; composite nodes are
//! only naming and linking scopes.
//!
//! A run proceeds in top-level events, each advanced by
//! [`process_next_event`](Simulation::process_next_event):
//!
//! 1. **Initialization**: function nodes whose flow inputs are all known run,
//!    then every message node is initialized in id order.
//! 2. **Planned events**, one per call: the imminent node with the lowest id
//!    handles its planned event. The messages it sends are delivered, each
//!    delivery being one unplanned event; messages sent while handling a
//!    delivery are queued behind the pending ones, until nothing is left to
//!    deliver. Time then advances to the next imminent event.
//! 3. **Finalization**: once the next event lies beyond the end time (or
//!    nothing is scheduled and the run may end early), every message node is
//!    finalized in id order, and the remaining function nodes run on the flow
//!    outputs produced.
//!
//! # Example
//!
//! ```rust
//! use jikoku::nodes::{PeriodicNode, StatisticNode};
//! use jikoku::simulation::{Simulation, SimulationConfig};
//! use jikoku::structure::{Model, ROOT};
//! use jikoku::time::Duration;
//!
//! let mut model = Model::new();
//! let clock = model.add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(5))).unwrap();
//! let total = model.add_statistic(ROOT, "total").unwrap();
//! model.link_inner(ROOT, clock, "count", total, "statistic").unwrap();
//!
//! let config = SimulationConfig::with_duration(Duration::seconds(12)).unwrap();
//! let mut sim = Simulation::new(model, config).unwrap();
//! sim.process_remaining_events().unwrap();
//!
//! let total = sim.model().node::<StatisticNode>(total).unwrap();
//! assert_eq!(total.value_as::<u64>().unwrap(), 2);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};

use crate::context::{EventContext, EventPhase, SimulationContext};
use crate::error::{SimError, SimResult};
use crate::event_time::DiscreteEventTime;
use crate::node::{scale_planned_duration, NodeKind};
use crate::port::{DataGoal, DataMode, PortBuffers};
use crate::stats::{EventTimer, SimulationStats, Timer};
use crate::structure::{Model, NodeBody, NodeEntry, ROOT, ROOT_NAME};
use crate::time::{Duration, Scale, TimeCache, TimePoint, TimeQueue, NO_SCALE};
use crate::trace::TraceSink;
use crate::types::{Endpoint, EventId, NodeId, PortName, PortValue};

/// Seeds must fit in 32 bits.
pub const SEED_LIMIT: u64 = 1 << 32;

/// Run parameters of a [`Simulation`].
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Simulated time of the first event
    pub start_time: TimePoint,
    /// Latest simulated time at which events are processed
    pub end_time: TimePoint,
    /// Finish as soon as nothing is scheduled, instead of at the end time
    pub can_end_early: bool,
    /// Seed of the shared random generator
    pub seed: u64,
    /// Name recorded in the statistics
    pub name: String,
}

impl SimulationConfig {
    /// Runs from time zero for `total`.
    ///
    /// An infinite `total` runs until nothing is scheduled, with an end time
    /// far beyond any representable event.
    pub fn with_duration(total: Duration) -> SimResult<Self> {
        if !total.valid() || total < Duration::ZERO {
            return Err(SimError::logic(
                "Total duration of simulation must be valid and non-negative",
            ));
        }
        let (end_time, can_end_early) = if total.finite() {
            (TimePoint::from_duration(total)?, false)
        } else {
            let far = Duration::new(1, Scale::new(i8::MAX - 6));
            (TimePoint::from_duration(far)?, true)
        };
        Ok(Self {
            start_time: TimePoint::new(),
            end_time,
            can_end_early,
            seed: 0,
            name: String::new(),
        })
    }

    /// Runs from `start_time` to `end_time`.
    pub fn between(start_time: TimePoint, end_time: TimePoint) -> Self {
        Self {
            start_time,
            end_time,
            can_end_early: false,
            seed: 0,
            name: String::new(),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_can_end_early(mut self, can_end_early: bool) -> Self {
        self.can_end_early = can_end_early;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn validate(&self) -> SimResult<()> {
        if self.end_time < self.start_time {
            return Err(SimError::logic(
                "End time of simulation must not precede its start time",
            ));
        }
        if self.seed >= SEED_LIMIT {
            return Err(SimError::logic(format!(
                "Seed ({}) must be less than 2^32",
                self.seed
            )));
        }
        Ok(())
    }
}

/// Runs a [`Model`].
pub struct Simulation {
    model: Model,
    sim: SimulationContext,
    buffers: Vec<PortBuffers>,
    precisions: Vec<Scale>,
    routes: HashMap<Endpoint, Vec<Endpoint>>,
    queue: TimeQueue,
    cache: TimeCache,
    start_t: TimePoint,
    end_t: TimePoint,
    can_end_early: bool,
    started: bool,
    finishing: bool,
    finished: bool,
    initialized: Vec<bool>,
    unprocessed_flow: Vec<NodeId>,
    relayed: HashSet<Endpoint>,
    stats: SimulationStats,
    event_timer: EventTimer,
    wall: Option<Timer>,
}

impl Simulation {
    pub fn new(model: Model, config: SimulationConfig) -> SimResult<Self> {
        config.validate()?;
        if model.interface(ROOT).map_or(false, |interface| !interface.is_empty()) {
            return Err(SimError::logic("Node to be simulated must have no ports"));
        }
        if config.end_time == config.start_time {
            tracing::warn!("Simulation ends at its start time ({})", config.start_time);
        }

        let mut precisions = vec![NO_SCALE; model.len()];
        let mut unprocessed_flow = Vec::new();
        let mut routes = HashMap::new();
        for id in model.leaf_ids() {
            let entry = model.entry(id)?;
            match &entry.body {
                NodeBody::Atomic(node) => precisions[id] = node.time_precision(),
                NodeBody::Function(_) => unprocessed_flow.push(id),
                NodeBody::Composite => {}
            }
            for port in entry.interface.names(DataMode::Message, DataGoal::Output) {
                let route = model.resolve(id, port);
                routes.insert((id, port.to_string()), route.leaves);
            }
        }

        let mut stats = SimulationStats::new().with_name(config.name.clone());
        stats.metadata.seed = config.seed;
        stats.metadata.node_count = model.len();

        let node_count = model.len();
        Ok(Self {
            sim: SimulationContext::new(config.seed, config.start_time.clone()),
            buffers: vec![PortBuffers::new(); node_count],
            precisions,
            routes,
            queue: TimeQueue::with_time(config.start_time.clone()),
            cache: TimeCache::with_time(config.start_time.clone()),
            start_t: config.start_time,
            end_t: config.end_time,
            can_end_early: config.can_end_early,
            started: false,
            finishing: false,
            finished: false,
            initialized: vec![false; node_count],
            unprocessed_flow,
            relayed: HashSet::new(),
            stats,
            event_timer: EventTimer::new(),
            wall: None,
            model,
        })
    }

    /// Sends the model trace to `sink`.
    pub fn set_trace_sink(&mut self, sink: impl TraceSink + 'static) {
        self.sim.tracer_mut().set_sink(Some(Box::new(sink)));
    }

    pub fn clear_trace_sink(&mut self) {
        self.sim.tracer_mut().set_sink(None);
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Consumes the simulation and returns the model with its final node
    /// states.
    pub fn into_model(self) -> Model {
        self.model
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn context(&self) -> &SimulationContext {
        &self.sim
    }

    pub fn started(&self) -> bool {
        self.started
    }

    /// Returns `true` once only finalization is left.
    pub fn finishing(&self) -> bool {
        self.finishing
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Duration until the next planned event.
    pub fn imminent_duration(&self) -> Duration {
        self.queue.imminent_duration()
    }

    /// Current simulated time.
    pub fn time(&self) -> &TimePoint {
        self.sim.event_time().t()
    }

    pub fn event_time(&self) -> &DiscreteEventTime {
        self.sim.event_time()
    }

    pub fn start_time(&self) -> &TimePoint {
        &self.start_t
    }

    pub fn end_time(&self) -> &TimePoint {
        &self.end_t
    }

    pub fn can_end_early(&self) -> bool {
        self.can_end_early
    }

    /// Runs the next top-level event: initialization, one planned event with
    /// its message deliveries, or finalization. Does nothing once finished.
    ///
    /// An error finishes the simulation.
    pub fn process_next_event(&mut self) -> SimResult<()> {
        if self.finished {
            return Ok(());
        }
        let result = if self.finishing {
            self.process_finalization()
        } else {
            let result = if self.started {
                self.process_planned()
            } else {
                self.process_initialization()
            };
            result.and_then(|()| self.advance_time())
        };
        self.stats.events.final_t_index = self.sim.event_time().t_index();
        if let Err(err) = result {
            tracing::warn!("Simulation aborted: {}", err);
            self.finishing = true;
            self.finished = true;
            self.finish_stats();
            return Err(err);
        }
        Ok(())
    }

    /// Runs top-level events until simulated time advances. Returns the
    /// number of events processed.
    pub fn process_next_events(&mut self) -> SimResult<u64> {
        let t = self.time().clone();
        let mut count = 0;
        while !self.finished && *self.time() == t {
            self.process_next_event()?;
            count += 1;
        }
        Ok(count)
    }

    /// Runs top-level events until simulated time reaches at least `t`.
    pub fn process_events_until(&mut self, t: &TimePoint) -> SimResult<u64> {
        let mut count = 0;
        while !self.finished && self.time() < t {
            self.process_next_event()?;
            count += 1;
        }
        Ok(count)
    }

    /// Runs the simulation to completion.
    pub fn process_remaining_events(&mut self) -> SimResult<u64> {
        let mut count = 0;
        while !self.finished {
            self.process_next_event()?;
            count += 1;
        }
        Ok(count)
    }

    fn process_initialization(&mut self) -> SimResult<()> {
        self.started = true;
        self.wall = Some(Timer::start());
        self.stats.record_start();
        tracing::debug!(
            nodes = self.model.len(),
            seed = self.sim.seed(),
            "Simulation starting at {}",
            self.start_t
        );
        self.trace_event(ROOT, "initialization")?;
        self.process_flow_nodes(false)?;

        let message_nodes: Vec<NodeId> = self
            .model
            .leaf_ids()
            .filter(|&id| self.model.kind(id).map_or(false, NodeKind::is_message_node))
            .collect();
        for id in message_nodes {
            self.sim.next_event();
            self.trace_event(id, "initialization")?;
            if let Some(port) = self.missing_flow_port(id, DataGoal::Input)? {
                let message = format!(
                    "Flow input port ({}) of message node ({}) has no value",
                    port,
                    self.node_name(id)
                );
                return Err(self.abort_in_parent(id, SimError::logic(message)));
            }
            self.trace_flow_ports(id, DataGoal::Input)?;
            let planned = self.call_message_node(id, EventPhase::Initialization, Duration::invalid())?;
            self.trace_planned(id, planned)?;
            self.stats.events.record(EventPhase::Initialization);
            self.reschedule(id, planned, false)?;
            self.initialized[id] = true;
            tracing::trace!(node = self.node_name(id), "initialized, planned {}", planned);
        }
        Ok(())
    }

    fn process_planned(&mut self) -> SimResult<()> {
        self.trace_event(ROOT, "planned")?;
        if self.queue.imminent_duration() != Duration::ZERO {
            return Err(SimError::logic(
                "Unexpected error while advancing time to that of next planned event",
            ));
        }
        let event_id = self
            .queue
            .imminent_event_ids()?
            .iter()
            .next()
            .copied()
            .ok_or_else(|| SimError::logic("No imminent events exist"))?;
        let id = NodeId::try_from(event_id)
            .map_err(|_| SimError::logic(format!("Event id ({}) is not a node id", event_id)))?;

        self.sim.next_event();
        self.trace_event(id, "planned")?;
        let elapsed = self.elapsed(id);
        self.trace_elapsed(id, elapsed)?;
        let planned = self.call_message_node(id, EventPhase::Planned, elapsed)?;
        self.trace_planned(id, planned)?;
        self.stats.events.record(EventPhase::Planned);
        self.reschedule(id, planned, true)?;
        tracing::trace!(node = self.node_name(id), "planned event, next in {}", planned);
        let outputs = self.take_message_outputs(id)?;
        self.deliver(id, outputs)
    }

    /// Delivers messages, and the messages sent while handling them, until
    /// none are left.
    fn deliver(&mut self, src: NodeId, outputs: Vec<(PortName, PortValue)>) -> SimResult<()> {
        let mut pending: VecDeque<(NodeId, PortName, PortValue)> = outputs
            .into_iter()
            .map(|(port, value)| (src, port, value))
            .collect();
        while let Some((src, port, value)) = pending.pop_front() {
            let dsts = self.routes.get(&(src, port)).cloned().unwrap_or_default();
            for (dst, dst_port) in dsts {
                self.stats.events.messages_delivered += 1;
                let outputs = self.process_unplanned(dst, &dst_port, value.clone())?;
                pending.extend(outputs.into_iter().map(|(port, value)| (dst, port, value)));
            }
        }
        Ok(())
    }

    fn process_unplanned(
        &mut self,
        id: NodeId,
        port: &str,
        value: PortValue,
    ) -> SimResult<Vec<(PortName, PortValue)>> {
        self.sim.next_event();
        self.trace_event(id, "unplanned")?;
        self.trace_port(id, port, &value)?;
        self.buffers[id].set_message_input(port, value);
        let elapsed = self.elapsed(id);
        self.trace_elapsed(id, elapsed)?;
        let planned = self.call_message_node(id, EventPhase::Unplanned, elapsed)?;
        self.trace_planned(id, planned)?;
        self.stats.events.record(EventPhase::Unplanned);
        self.reschedule(id, planned, false)?;
        self.buffers[id].clear_message_input();
        tracing::trace!(node = self.node_name(id), port, "unplanned event, next in {}", planned);
        self.take_message_outputs(id)
    }

    fn process_finalization(&mut self) -> SimResult<()> {
        self.trace_event(ROOT, "finalization")?;
        for id in 0..self.model.len() {
            if !self.initialized[id] {
                continue;
            }
            self.sim.next_event();
            self.trace_event(id, "finalization")?;
            let elapsed = self.elapsed(id);
            self.trace_elapsed(id, elapsed)?;
            self.call_message_node(id, EventPhase::Finalization, elapsed)?;
            self.initialized[id] = false;
            self.stats.events.record(EventPhase::Finalization);
            if let Some(port) = self.missing_flow_port(id, DataGoal::Output)? {
                let message = format!(
                    "Flow output port ({}) of message node ({}) not assigned",
                    port,
                    self.node_name(id)
                );
                return Err(self.abort_in_parent(id, SimError::logic(message)));
            }
            self.trace_flow_ports(id, DataGoal::Output)?;
            self.propagate_flow_outputs(id)?;
        }
        self.process_flow_nodes(true)?;
        self.finished = true;
        self.finish_stats();
        tracing::debug!(
            events = self.stats.events.total(),
            "Simulation finished at {}",
            self.time()
        );
        Ok(())
    }

    /// Runs every function node whose flow inputs are all set, until none
    /// is left that can run. With `finalize`, a node still missing an input
    /// is an error.
    fn process_flow_nodes(&mut self, finalize: bool) -> SimResult<()> {
        let mut index = 0;
        while index < self.unprocessed_flow.len() {
            let id = self.unprocessed_flow[index];
            if let Some(port) = self.missing_flow_port(id, DataGoal::Input)? {
                if finalize {
                    let message = format!(
                        "Flow input port ({}) of node ({}) has no value",
                        port,
                        self.node_name(id)
                    );
                    return Err(self.abort_in_parent(id, SimError::logic(message)));
                }
                index += 1;
                continue;
            }
            self.sim.next_event();
            self.trace_event(id, "flow")?;
            self.trace_flow_ports(id, DataGoal::Input)?;
            self.call_function_node(id)?;
            self.stats.events.record(EventPhase::Flow);
            if let Some(port) = self.missing_flow_port(id, DataGoal::Output)? {
                let message = format!(
                    "Flow output port ({}) of flow node ({}) not assigned",
                    port,
                    self.node_name(id)
                );
                return Err(self.abort_in_parent(id, SimError::logic(message)));
            }
            self.trace_flow_ports(id, DataGoal::Output)?;
            self.propagate_flow_outputs(id)?;
            self.unprocessed_flow.remove(index);
            index = 0;
        }
        Ok(())
    }

    fn propagate_flow_outputs(&mut self, id: NodeId) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        let outputs: Vec<(PortName, PortValue)> = entry
            .interface
            .names(DataMode::Flow, DataGoal::Output)
            .filter_map(|port| {
                self.buffers[id]
                    .flow_output(port)
                    .map(|value| (port.to_string(), value.clone()))
            })
            .collect();
        for (port, value) in outputs {
            let route = self.model.resolve(id, &port);
            for relay in route.relays {
                if self.relayed.contains(&relay) {
                    let composite = self.node_name(relay.0).to_string();
                    let is_output = self
                        .model
                        .interface(relay.0)
                        .and_then(|interface| interface.port(&relay.1))
                        .map_or(false, |spec| spec.goal == DataGoal::Output);
                    let message = if is_output {
                        format!(
                            "Flow output port ({}) of composite node ({}) receiving multiple values",
                            relay.1, composite
                        )
                    } else {
                        format!(
                            "Flow input port ({}) of node ({}) receiving multiple values",
                            relay.1, composite
                        )
                    };
                    return Err(self.abort_in_parent(id, SimError::logic(message)));
                }
                self.relayed.insert(relay);
            }
            for (dst, dst_port) in route.leaves {
                if !self.buffers[dst].set_flow_input(&dst_port, value.clone()) {
                    let message = format!(
                        "Flow input port ({}) of node ({}) receiving multiple values",
                        dst_port,
                        self.node_name(dst)
                    );
                    return Err(self.abort_in_parent(id, SimError::logic(message)));
                }
            }
        }
        Ok(())
    }

    /// Advances to the next imminent event, or marks the run as finishing
    /// when that event lies beyond the end time.
    fn advance_time(&mut self) -> SimResult<()> {
        if self.finishing {
            return Ok(());
        }
        let planned = self.queue.imminent_duration();
        if !planned.finite() && self.can_end_early {
            self.finishing = true;
            return Ok(());
        }
        let beyond_end = if planned.finite() {
            let mut next_t = self.time().clone();
            next_t.advance_on_grid(planned)?;
            next_t > self.end_t
        } else {
            true
        };
        let end_t = self.end_t.clone();
        let t = self.sim.event_time_mut().advance_by(planned, &end_t)?.clone();
        if planned > Duration::ZERO {
            self.queue.advance_time_to(&t)?;
            self.cache.advance_time_to(&t)?;
            tracing::trace!("Time advanced to {}", t);
        }
        if beyond_end {
            self.finishing = true;
        }
        Ok(())
    }

    /// Runs one handler of the message node `id` and returns the planned
    /// duration, validated for atomic nodes.
    fn call_message_node(&mut self, id: NodeId, phase: EventPhase, elapsed: Duration) -> SimResult<Duration> {
        let Self {
            model,
            sim,
            buffers,
            event_timer,
            ..
        } = self;
        let NodeEntry {
            full_name,
            kind,
            interface,
            flags,
            body,
            ..
        } = model.entry_mut(id)?;
        let NodeBody::Atomic(node) = body else {
            return Err(SimError::logic(format!(
                "Node ({}) is not a message node",
                full_name
            )));
        };
        let precision = node.time_precision();
        let mut ctx = EventContext::new(phase, full_name, interface, &mut buffers[id], *flags, sim);
        event_timer.start();
        let result = match phase {
            EventPhase::Initialization => node.init(&mut ctx),
            EventPhase::Unplanned => node.on_message(&mut ctx, elapsed),
            EventPhase::Planned => node.on_timer(&mut ctx, elapsed),
            EventPhase::Finalization => node.finalize(&mut ctx, elapsed).map(|()| Duration::inf()),
            EventPhase::Flow => Err(SimError::logic(
                "Unexpected flow event invoked for message node",
            )),
        };
        event_timer.stop();
        let result = if phase == EventPhase::Finalization || *kind == NodeKind::Collection {
            result
        } else {
            result.and_then(|planned| scale_planned_duration(planned, precision))
        };
        result.map_err(|err| sim.abort(full_name, err))
    }

    fn call_function_node(&mut self, id: NodeId) -> SimResult<()> {
        let Self {
            model,
            sim,
            buffers,
            event_timer,
            ..
        } = self;
        let NodeEntry {
            full_name,
            interface,
            flags,
            body,
            ..
        } = model.entry_mut(id)?;
        let NodeBody::Function(node) = body else {
            return Err(SimError::logic(format!(
                "Node ({}) is not a function node",
                full_name
            )));
        };
        let mut ctx = EventContext::new(EventPhase::Flow, full_name, interface, &mut buffers[id], *flags, sim);
        event_timer.start();
        let result = node.flow_event(&mut ctx);
        event_timer.stop();
        result.map_err(|err| sim.abort(full_name, err))
    }

    fn reschedule(&mut self, id: NodeId, planned: Duration, pop: bool) -> SimResult<()> {
        let event_id = id as EventId;
        if planned.finite() {
            self.queue.plan_event(event_id, planned)?;
        } else if pop {
            self.queue.pop_imminent_event(event_id)?;
        } else {
            self.queue.cancel_event(event_id);
        }
        let precision = self.precisions[id];
        if precision != NO_SCALE {
            self.cache.retain_event(event_id, precision)?;
        }
        Ok(())
    }

    fn elapsed(&self, id: NodeId) -> Duration {
        let precision = self.precisions[id];
        if precision == NO_SCALE {
            Duration::invalid()
        } else {
            self.cache.duration_since(id as EventId).fixed_at(precision)
        }
    }

    fn take_message_outputs(&mut self, id: NodeId) -> SimResult<Vec<(PortName, PortValue)>> {
        let outputs = self.buffers[id].take_message_outputs();
        for (port, value) in &outputs {
            self.trace_port(id, port, value)?;
        }
        Ok(outputs)
    }

    fn missing_flow_port(&self, id: NodeId, goal: DataGoal) -> SimResult<Option<String>> {
        let interface = &self.model.entry(id)?.interface;
        let buffers = &self.buffers[id];
        let missing = match goal {
            DataGoal::Input => buffers.missing_flow_input(interface),
            DataGoal::Output => buffers.missing_flow_output(interface),
        };
        Ok(missing.map(str::to_string))
    }

    fn node_name(&self, id: NodeId) -> &str {
        self.model.full_name(id).unwrap_or(ROOT_NAME)
    }

    /// Attributes a driver-detected error to the composite node containing
    /// `id`.
    fn abort_in_parent(&mut self, id: NodeId, err: SimError) -> SimError {
        let parent = self.model.parent(id).unwrap_or(ROOT);
        let name = self.model.full_name(parent).unwrap_or(ROOT_NAME);
        self.sim.abort(name, err)
    }

    fn trace_event(&mut self, id: NodeId, kind: &str) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        self.sim.trace_event(&entry.full_name, entry.flags, kind)
    }

    fn trace_port(&mut self, id: NodeId, port: &str, value: &PortValue) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        self.sim.trace_port(&entry.full_name, entry.flags, port, value)
    }

    /// Elapsed durations are traced by the driver for atomic nodes only;
    /// collections trace their own.
    fn trace_elapsed(&mut self, id: NodeId, elapsed: Duration) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        if entry.kind != NodeKind::Atomic {
            return Ok(());
        }
        self.sim.trace_elapsed(&entry.full_name, entry.flags, elapsed)
    }

    fn trace_planned(&mut self, id: NodeId, planned: Duration) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        if entry.kind != NodeKind::Atomic {
            return Ok(());
        }
        self.sim.trace_planned(&entry.full_name, entry.flags, planned)
    }

    fn trace_flow_ports(&mut self, id: NodeId, goal: DataGoal) -> SimResult<()> {
        let entry = self.model.entry(id)?;
        let buffers = &self.buffers[id];
        for port in entry.interface.names(DataMode::Flow, goal) {
            let value = match goal {
                DataGoal::Input => buffers.flow_input(port),
                DataGoal::Output => buffers.flow_output(port),
            };
            if let Some(value) = value {
                self.sim.trace_port(&entry.full_name, entry.flags, port, value)?;
            }
        }
        Ok(())
    }

    fn finish_stats(&mut self) {
        self.stats.record_end();
        self.stats.events.final_t_index = self.sim.event_time().t_index();
        self.stats.events.final_time = self.sim.event_time().t().to_string();
        let wall_ms = self.wall.as_ref().map_or(0.0, Timer::elapsed_ms);
        self.stats.compute_timing(wall_ms, self.event_timer.total_ms());
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("model", &self.model)
            .field("time", self.time())
            .field("started", &self.started)
            .field("finishing", &self.finishing)
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::{CounterNode, PeriodicNode};
    use crate::node::AtomicNode;
    use crate::port::NodeInterface;
    use crate::time::UNIT;
    use crate::trace::{SharedTrace, TraceFlags};

    struct NeedsRate;

    impl AtomicNode for NeedsRate {
        fn interface(&self) -> NodeInterface {
            NodeInterface::new().with_flow_input("rate")
        }

        fn time_precision(&self) -> Scale {
            UNIT
        }

        fn init(&mut self, _ctx: &mut EventContext<'_>) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn on_message(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn on_timer(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn finalize(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_with_duration() {
        let config = SimulationConfig::with_duration(Duration::seconds(12)).unwrap();
        assert!(!config.can_end_early);
        assert_eq!(config.end_time, TimePoint::from_duration(Duration::seconds(12)).unwrap());

        let config = SimulationConfig::with_duration(Duration::inf()).unwrap();
        assert!(config.can_end_early);
        assert!(config.end_time > TimePoint::from_duration(Duration::years(1000)).unwrap());

        assert!(SimulationConfig::with_duration(Duration::seconds(-1)).is_err());
        assert!(SimulationConfig::with_duration(Duration::invalid()).is_err());
    }

    #[test]
    fn test_end_before_start_rejected() {
        let model = Model::new();
        let config = SimulationConfig::between(
            TimePoint::from_duration(Duration::seconds(5)).unwrap(),
            TimePoint::new(),
        );
        assert!(Simulation::new(model, config).is_err());
    }

    #[test]
    fn test_seed_must_fit_in_32_bits() {
        let config = SimulationConfig::with_duration(Duration::seconds(1)).unwrap();
        assert!(config.clone().with_seed(SEED_LIMIT - 1).validate().is_ok());

        let result = Simulation::new(Model::new(), config.with_seed(SEED_LIMIT));
        assert!(matches!(result, Err(SimError::Logic(_))));
    }

    #[test]
    fn test_lifecycle_flags() {
        let mut model = Model::new();
        model
            .add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(5)))
            .unwrap();
        let config = SimulationConfig::with_duration(Duration::seconds(12)).unwrap();
        let mut sim = Simulation::new(model, config).unwrap();
        assert!(!sim.started());
        assert_eq!(sim.imminent_duration(), Duration::inf());

        sim.process_next_event().unwrap();
        assert!(sim.started());
        assert_eq!(sim.time(), &TimePoint::from_duration(Duration::seconds(5)).unwrap());

        sim.process_next_event().unwrap();
        sim.process_next_event().unwrap();
        assert!(sim.finishing());
        assert!(!sim.finished());
        assert_eq!(sim.time(), sim.end_time());

        sim.process_next_event().unwrap();
        assert!(sim.finished());
        assert_eq!(sim.process_remaining_events().unwrap(), 0);
        assert_eq!(sim.stats().events.planned, 2);
    }

    #[test]
    fn test_trace_lines() {
        let mut model = Model::new();
        let clock = model
            .add_atomic(ROOT, "clock", PeriodicNode::new(Duration::seconds(5)))
            .unwrap();
        let counter = model.add_atomic(ROOT, "counter", CounterNode::new()).unwrap();
        model.link_inner(ROOT, clock, "tick", counter, "in").unwrap();
        model.set_trace_flags(ROOT, TraceFlags::all()).unwrap();

        let trace = SharedTrace::new();
        let config = SimulationConfig::with_duration(Duration::seconds(7)).unwrap();
        let mut sim = Simulation::new(model, config).unwrap();
        sim.set_trace_sink(trace.clone());
        sim.process_next_event().unwrap();
        sim.process_next_event().unwrap();

        let lines = trace.lines();
        assert_eq!(
            lines,
            vec![
                "0|0|$time:time_point()",
                "0|0|top$initialization",
                "0|1|top.clock$initialization",
                "0|1|top.clock$planned_dt:5_s",
                "0|2|top.counter$initialization",
                "0|2|top.counter$planned_dt:duration::inf()",
                "1|0|$time:time_point() + 5_s",
                "1|0|top$planned",
                "1|1|top.clock$planned",
                "1|1|top.clock$elapsed_dt:5_s",
                "1|1|top.clock$planned_dt:5_s",
                "1|1|top.clock#tick:1",
                "1|2|top.counter$unplanned",
                "1|2|top.counter#in:1",
                "1|2|top.counter$elapsed_dt:5_s",
                "1|2|top.counter$planned_dt:duration::inf()",
            ]
        );
    }

    #[test]
    fn test_error_wrapped_with_node_name() {
        let mut model = Model::new();
        let clock = model
            .add_atomic(ROOT, "clock", PeriodicNode::new(Duration::millis(1500)).with_precision(UNIT))
            .unwrap();
        let config = SimulationConfig::with_duration(Duration::seconds(10)).unwrap();
        let mut sim = Simulation::new(model, config).unwrap();
        let err = sim.process_next_event().unwrap_err();
        assert!(err.is_system_error());
        assert_eq!(err.node(), sim.model().full_name(clock));
        assert!(sim.finished());
    }

    #[test]
    fn test_missing_flow_input_reported_by_parent() {
        let mut model = Model::new();
        let stage = model
            .add_composite(ROOT, "stage", NodeInterface::new())
            .unwrap();
        model.add_atomic(stage, "needy", NeedsRate).unwrap();
        let config = SimulationConfig::with_duration(Duration::seconds(1)).unwrap();
        let mut sim = Simulation::new(model, config).unwrap();
        let err = sim.process_next_event().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Aborting event in node (top.stage) due to error (\"Flow input port (rate) of message node (top.stage.needy) has no value\")"
        );
    }
}
