//! Collection nodes: a dynamic, keyed set of agents.
//!
//! A [`Collection`] wraps user logic implementing [`CollectionNode`] and acts
//! as a single leaf in the model. Its agents are fresh instances produced by
//! an [`AgentFactory`], keyed by an application-defined id, each with its own
//! state and port buffers. Agents are scheduled on the collection's private
//! [`TimeQueue`] and [`TimeCache`]; the collection reports the earliest of
//! their planned events (and its own) to the driver.
//!
//! The collection talks to its agents through a *prototype*: the agents'
//! shared [`NodeInterface`]. Before creating or affecting an agent the
//! collection sets prototype inputs; after removing or invoking one it reads
//! prototype outputs. When an agent sends a message from a planned event, the
//! collection receives one micro-planned event per message.
//!
//! Message agents ([`AgentFactory::message`]) live from
//! [`create_agent`](CollectionContext::create_agent) to
//! [`remove_agent`](CollectionContext::remove_agent). Flow agents
//! ([`AgentFactory::flow`]) are created, run and dropped by a single
//! [`invoke_agent`](CollectionContext::invoke_agent).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};

use crate::context::{EventContext, EventPhase, SimulationContext};
use crate::error::{SimError, SimResult};
use crate::node::{scale_planned_duration, AsAny, AtomicNode, FunctionNode};
use crate::port::{DataGoal, DataMode, NodeInterface, PortBuffers};
use crate::time::{Duration, Scale, TimeCache, TimeQueue, NO_SCALE};
use crate::trace::TraceFlags;
use crate::types::{EventId, PortName, PortValue};

/// Queue id of the collection's own planned event. Agents use smaller ids,
/// so the collection's event comes after agents' simultaneous events.
pub const MACRO_EVENT_ID: EventId = EventId::MAX;

/// Procedural logic of a collection node.
///
/// Each hook that returns a duration plans the collection's own next
/// *macro* event, which is independent of the agents' events.
pub trait CollectionNode: AsAny + Send {
    /// Key identifying agents; its `Display` form names them.
    type AgentId: Ord + Clone + fmt::Display + Send + 'static;

    fn interface(&self) -> NodeInterface;

    fn time_precision(&self) -> Scale;

    fn macro_init(&mut self, ctx: &mut CollectionContext<'_, '_, Self::AgentId>) -> SimResult<Duration>;

    /// A message arrived on one of the collection's own ports.
    fn macro_unplanned(
        &mut self,
        ctx: &mut CollectionContext<'_, '_, Self::AgentId>,
        elapsed: Duration,
    ) -> SimResult<Duration>;

    /// Agent `agent_id` transmitted a message, readable with
    /// [`CollectionContext::agent_message`].
    fn micro_planned(
        &mut self,
        ctx: &mut CollectionContext<'_, '_, Self::AgentId>,
        agent_id: &Self::AgentId,
        elapsed: Duration,
    ) -> SimResult<Duration>;

    /// The collection's own planned duration has elapsed.
    fn macro_planned(
        &mut self,
        ctx: &mut CollectionContext<'_, '_, Self::AgentId>,
        elapsed: Duration,
    ) -> SimResult<Duration>;

    /// Last event. Agents still alive are removed right after it.
    fn macro_finalize(
        &mut self,
        ctx: &mut CollectionContext<'_, '_, Self::AgentId>,
        elapsed: Duration,
    ) -> SimResult<()>;
}

/// Produces agent instances.
pub enum AgentFactory {
    Message(Box<dyn Fn() -> Box<dyn AtomicNode> + Send>),
    Flow(Box<dyn Fn() -> Box<dyn FunctionNode> + Send>),
}

impl AgentFactory {
    /// Agents that are atomic nodes.
    pub fn message<N, F>(make: F) -> Self
    where
        N: AtomicNode + 'static,
        F: Fn() -> N + Send + 'static,
    {
        AgentFactory::Message(Box::new(move || -> Box<dyn AtomicNode> { Box::new(make()) }))
    }

    /// Agents that are function nodes.
    pub fn flow<N, F>(make: F) -> Self
    where
        N: FunctionNode + 'static,
        F: Fn() -> N + Send + 'static,
    {
        AgentFactory::Flow(Box::new(move || -> Box<dyn FunctionNode> { Box::new(make()) }))
    }

    pub fn data_mode(&self) -> DataMode {
        match self {
            AgentFactory::Message(_) => DataMode::Message,
            AgentFactory::Flow(_) => DataMode::Flow,
        }
    }

    fn prototype_interface(&self) -> NodeInterface {
        match self {
            AgentFactory::Message(make) => make().interface(),
            AgentFactory::Flow(make) => make().interface(),
        }
    }
}

struct Agent<K> {
    id: K,
    full_name: String,
    node: Box<dyn AtomicNode>,
    buffers: PortBuffers,
    precision: Scale,
}

/// Agents plus the scheduling state of a collection.
struct AgentPool<K> {
    factory: AgentFactory,
    prototype: NodeInterface,
    proto: PortBuffers,
    transmitting: Option<(PortName, PortValue)>,
    indices: BTreeMap<K, EventId>,
    agents: BTreeMap<EventId, Agent<K>>,
    next_index: EventId,
    queue: TimeQueue,
    cache: TimeCache,
}

impl<K: Ord + Clone + fmt::Display> AgentPool<K> {
    fn new(factory: AgentFactory) -> Self {
        let prototype = factory.prototype_interface();
        Self {
            factory,
            prototype,
            proto: PortBuffers::new(),
            transmitting: None,
            indices: BTreeMap::new(),
            agents: BTreeMap::new(),
            next_index: 0,
            queue: TimeQueue::new(),
            cache: TimeCache::new(),
        }
    }

    fn clear_prototype(&mut self) {
        self.proto.clear_flow_inputs();
        self.proto.clear_message_input();
        self.proto.clear_flow_outputs();
    }

    fn elapsed(&self, index: EventId, precision: Scale) -> Duration {
        if precision == NO_SCALE {
            Duration::invalid()
        } else {
            self.cache.duration_since(index).fixed_at(precision)
        }
    }

    fn reschedule(&mut self, index: EventId, planned: Duration, precision: Scale) -> SimResult<()> {
        if planned.finite() {
            self.queue.plan_event(index, planned)?;
        } else {
            self.queue.cancel_event(index);
        }
        if precision != NO_SCALE {
            self.cache.retain_event(index, precision)?;
        }
        Ok(())
    }

    /// Runs the planned event of agent `index` and returns the agent's id
    /// together with the messages it sent.
    fn agent_planned(
        &mut self,
        sim: &mut SimulationContext,
        flags: TraceFlags,
        index: EventId,
    ) -> SimResult<(K, Vec<(PortName, PortValue)>)> {
        sim.next_event();
        let elapsed = match self.agents.get(&index) {
            Some(agent) => self.elapsed(index, agent.precision),
            None => {
                return Err(SimError::logic(format!(
                    "Planned event refers to agent index ({}) that does not exist",
                    index
                )))
            }
        };
        let prototype = &self.prototype;
        let Some(agent) = self.agents.get_mut(&index) else {
            return Err(SimError::logic("Agent disappeared during its planned event"));
        };
        sim.trace_event(&agent.full_name, flags, "planned")?;
        sim.trace_elapsed(&agent.full_name, flags, elapsed)?;
        let precision = agent.precision;
        let result = {
            let Agent {
                full_name,
                node,
                buffers,
                ..
            } = &mut *agent;
            let mut ctx = EventContext::new(EventPhase::Planned, full_name, prototype, buffers, flags, sim);
            node.on_timer(&mut ctx, elapsed)
                .and_then(|dt| scale_planned_duration(dt, precision))
        };
        let planned = result.map_err(|e| sim.abort(&agent.full_name, e))?;
        sim.trace_planned(&agent.full_name, flags, planned)?;
        let outputs = agent.buffers.take_message_outputs();
        for (port, value) in &outputs {
            sim.trace_port(&agent.full_name, flags, port, value)?;
        }
        let id = agent.id.clone();
        if planned.finite() {
            self.queue.plan_event(index, planned)?;
        } else {
            self.queue.pop_imminent_event(index)?;
        }
        if precision != NO_SCALE {
            self.cache.retain_event(index, precision)?;
        }
        Ok((id, outputs))
    }
}

/// What a collection's hooks can do: everything an [`EventContext`] offers
/// (through `Deref`) plus agent management.
pub struct CollectionContext<'a, 'b, K> {
    event: &'a mut EventContext<'b>,
    pool: &'a mut AgentPool<K>,
}

impl<'a, 'b, K> Deref for CollectionContext<'a, 'b, K> {
    type Target = EventContext<'b>;

    fn deref(&self) -> &Self::Target {
        self.event
    }
}

impl<'a, 'b, K> DerefMut for CollectionContext<'a, 'b, K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.event
    }
}

impl<'a, 'b, K: Ord + Clone + fmt::Display> CollectionContext<'a, 'b, K> {
    fn agent_name(&self, agent_id: &K) -> String {
        format!("{}#{}", self.event.node_name(), agent_id)
    }

    fn prototype_name(&self) -> String {
        format!("{}#prototype", self.event.node_name())
    }

    fn expect_prototype_port(&self, port: &str, mode: DataMode, goal: DataGoal) -> SimResult<()> {
        self.pool
            .prototype
            .expect(port, mode, goal, &self.prototype_name())
            .map(|_| ())
    }

    fn expect_agent_mode(&self, mode: DataMode, operation: &str, verb: &str, hint: &str) -> SimResult<()> {
        let actual = self.pool.factory.data_mode();
        if actual != mode {
            return Err(SimError::logic(format!(
                "Attempt to use \"{}\" to {} a {} node agent of a collection node ({}); use {} instead",
                operation,
                verb,
                actual,
                self.event.node_name(),
                hint
            )));
        }
        Ok(())
    }

    /// Sets the prototype flow input `port`, copied into agents on creation.
    pub fn set_agent_input<T: Serialize>(&mut self, port: &str, value: T) -> SimResult<()> {
        self.expect_prototype_port(port, DataMode::Flow, DataGoal::Input)?;
        let value = self.event.encode(port, value)?;
        self.pool.proto.replace_flow_input(port, value);
        Ok(())
    }

    /// Sets the prototype message input `port`, delivered by
    /// [`affect_agent`](Self::affect_agent).
    pub fn set_agent_message<T: Serialize>(&mut self, port: &str, value: T) -> SimResult<()> {
        self.expect_prototype_port(port, DataMode::Message, DataGoal::Input)?;
        if let Some((current, _)) = self.pool.proto.message_input() {
            if current != port {
                return Err(SimError::logic(format!(
                    "Attempt to access message input port ({}), but another message input port of prototype agent ({}) has already been accessed",
                    port,
                    self.prototype_name()
                )));
            }
        }
        let value = self.event.encode(port, value)?;
        self.pool.proto.set_message_input(port, value);
        Ok(())
    }

    /// Creates and initializes agent `agent_id` with the prototype's flow
    /// inputs.
    pub fn create_agent(&mut self, agent_id: K) -> SimResult<()> {
        self.expect_agent_mode(
            DataMode::Message,
            "create_agent",
            "create",
            "\"invoke_agent\"",
        )?;
        let full_name = self.agent_name(&agent_id);
        let flags = self.event.flags();
        let sim = self.event.sim_mut();
        sim.next_event();
        if self.pool.indices.contains_key(&agent_id) {
            return Err(SimError::logic(format!(
                "Created agent ({}) already exists.",
                full_name
            )));
        }
        let AgentFactory::Message(make) = &self.pool.factory else {
            return Err(SimError::logic("Message agents require a message agent factory"));
        };
        let node = make();
        let precision = node.time_precision();
        let mut agent = Agent {
            id: agent_id.clone(),
            full_name,
            node,
            buffers: PortBuffers::new(),
            precision,
        };
        sim.trace_event(&agent.full_name, flags, "initialization")?;
        if let Some(port) = self.pool.proto.missing_flow_input(&self.pool.prototype) {
            return Err(SimError::logic(format!(
                "Flow input port ({}) of created agent ({}) has no value",
                port, agent.full_name
            )));
        }
        for port in self.pool.prototype.names(DataMode::Flow, DataGoal::Input) {
            if let Some(value) = self.pool.proto.flow_input(port) {
                agent.buffers.set_flow_input(port, value.clone());
                sim.trace_port(&agent.full_name, flags, port, value)?;
            }
        }
        let result = {
            let Agent {
                full_name,
                node,
                buffers,
                ..
            } = &mut agent;
            let mut ctx = EventContext::new(
                EventPhase::Initialization,
                full_name,
                &self.pool.prototype,
                buffers,
                flags,
                sim,
            );
            node.init(&mut ctx)
                .and_then(|dt| scale_planned_duration(dt, precision))
        };
        let planned = result.map_err(|e| sim.abort(&agent.full_name, e))?;
        sim.trace_planned(&agent.full_name, flags, planned)?;

        let index = self.pool.next_index;
        self.pool.next_index += 1;
        if planned.finite() {
            self.pool.queue.plan_event(index, planned)?;
        }
        if precision != NO_SCALE {
            self.pool.cache.retain_event(index, precision)?;
        }
        self.pool.indices.insert(agent_id, index);
        self.pool.agents.insert(index, agent);
        Ok(())
    }

    /// Delivers the prototype's message input to agent `agent_id`.
    pub fn affect_agent(&mut self, agent_id: &K) -> SimResult<()> {
        self.expect_agent_mode(
            DataMode::Message,
            "affect_agent",
            "affect",
            "\"invoke_agent\"",
        )?;
        let coll_name = self.event.node_name().to_string();
        let flags = self.event.flags();
        let sim = self.event.sim_mut();
        sim.next_event();
        let pool = &mut *self.pool;
        let Some(&index) = pool.indices.get(agent_id) else {
            return Err(SimError::logic(format!(
                "Attempt to affect agent ({}#{}) that does not exist",
                coll_name, agent_id
            )));
        };
        let Some((port, value)) = pool
            .proto
            .message_input()
            .map(|(port, value)| (port.to_string(), value.clone()))
        else {
            return Err(SimError::logic(format!(
                "Attempt to affect agent ({}#{}), but none of the prototype's message input ports have been accessed",
                coll_name, agent_id
            )));
        };
        let elapsed = match pool.agents.get(&index) {
            Some(agent) => pool.elapsed(index, agent.precision),
            None => Duration::invalid(),
        };
        let AgentPool {
            agents, prototype, ..
        } = &mut *pool;
        let Some(agent) = agents.get_mut(&index) else {
            return Err(SimError::logic(format!(
                "Agent index ({}) of agent ({}#{}) is not allocated",
                index, coll_name, agent_id
            )));
        };
        sim.trace_event(&agent.full_name, flags, "unplanned")?;
        agent.buffers.set_message_input(&port, value.clone());
        sim.trace_port(&agent.full_name, flags, &port, &value)?;
        sim.trace_elapsed(&agent.full_name, flags, elapsed)?;
        let precision = agent.precision;
        let result = {
            let Agent {
                full_name,
                node,
                buffers,
                ..
            } = &mut *agent;
            let mut ctx = EventContext::new(EventPhase::Unplanned, full_name, prototype, buffers, flags, sim);
            node.on_message(&mut ctx, elapsed)
                .and_then(|dt| scale_planned_duration(dt, precision))
        };
        let planned = result.map_err(|e| sim.abort(&agent.full_name, e))?;
        if !agent.buffers.message_outputs().is_empty() {
            return Err(SimError::logic(format!(
                "Agent ({}) sent a message outside a planned event",
                agent.full_name
            )));
        }
        sim.trace_planned(&agent.full_name, flags, planned)?;
        agent.buffers.clear_message_input();
        pool.reschedule(index, planned, precision)?;
        pool.proto.clear_message_input();
        Ok(())
    }

    /// Finalizes and removes agent `agent_id`. Its flow outputs become the
    /// prototype's flow outputs.
    pub fn remove_agent(&mut self, agent_id: &K) -> SimResult<()> {
        self.expect_agent_mode(
            DataMode::Message,
            "remove_agent",
            "remove",
            "\"invoke_agent\"",
        )?;
        let coll_name = self.event.node_name().to_string();
        let flags = self.event.flags();
        let sim = self.event.sim_mut();
        sim.next_event();
        let pool = &mut *self.pool;
        let Some(index) = pool.indices.remove(agent_id) else {
            return Err(SimError::logic(format!(
                "Attempt to remove agent ({}#{}) that does not exist",
                coll_name, agent_id
            )));
        };
        let Some(mut agent) = pool.agents.remove(&index) else {
            return Err(SimError::logic(format!(
                "Agent index ({}) of agent ({}#{}) is not allocated",
                index, coll_name, agent_id
            )));
        };
        let elapsed = pool.elapsed(index, agent.precision);
        pool.queue.cancel_event(index);
        pool.cache.release_event(index);

        sim.trace_event(&agent.full_name, flags, "finalization")?;
        sim.trace_elapsed(&agent.full_name, flags, elapsed)?;
        let result = {
            let Agent {
                full_name,
                node,
                buffers,
                ..
            } = &mut agent;
            let mut ctx = EventContext::new(
                EventPhase::Finalization,
                full_name,
                &pool.prototype,
                buffers,
                flags,
                sim,
            );
            node.finalize(&mut ctx, elapsed)
        };
        result.map_err(|e| sim.abort(&agent.full_name, e))?;
        if let Some(port) = agent.buffers.missing_flow_output(&pool.prototype) {
            return Err(SimError::logic(format!(
                "Flow output port ({}) of removed agent ({}) not assigned",
                port, agent.full_name
            )));
        }
        for port in pool.prototype.names(DataMode::Flow, DataGoal::Output) {
            if let Some(value) = agent.buffers.flow_output(port) {
                sim.trace_port(&agent.full_name, flags, port, value)?;
                pool.proto.assign_flow_output(port, value.clone());
            }
        }
        Ok(())
    }

    /// Creates a flow agent from the prototype's flow inputs, runs it and
    /// drops it. Its flow outputs become the prototype's flow outputs.
    pub fn invoke_agent(&mut self, agent_id: K) -> SimResult<()> {
        self.expect_agent_mode(
            DataMode::Flow,
            "invoke_agent",
            "invoke",
            "\"create_agent\", \"affect_agent\", and \"remove_agent\"",
        )?;
        let full_name = self.agent_name(&agent_id);
        let flags = self.event.flags();
        let sim = self.event.sim_mut();
        sim.next_event();
        let pool = &mut *self.pool;
        let AgentFactory::Flow(make) = &pool.factory else {
            return Err(SimError::logic("Flow agents require a flow agent factory"));
        };
        let mut node = make();
        let mut buffers = PortBuffers::new();
        sim.trace_event(&full_name, flags, "flow")?;
        if let Some(port) = pool.proto.missing_flow_input(&pool.prototype) {
            return Err(SimError::logic(format!(
                "Flow input port ({}) of invoked agent ({}) has no value",
                port, full_name
            )));
        }
        for port in pool.prototype.names(DataMode::Flow, DataGoal::Input) {
            if let Some(value) = pool.proto.flow_input(port) {
                buffers.set_flow_input(port, value.clone());
                sim.trace_port(&full_name, flags, port, value)?;
            }
        }
        let result = {
            let mut ctx = EventContext::new(
                EventPhase::Flow,
                &full_name,
                &pool.prototype,
                &mut buffers,
                flags,
                sim,
            );
            node.flow_event(&mut ctx)
        };
        result.map_err(|e| sim.abort(&full_name, e))?;
        if let Some(port) = buffers.missing_flow_output(&pool.prototype) {
            return Err(SimError::logic(format!(
                "Flow output port ({}) of invoked agent ({}) not assigned",
                port, full_name
            )));
        }
        for port in pool.prototype.names(DataMode::Flow, DataGoal::Output) {
            if let Some(value) = buffers.flow_output(port) {
                sim.trace_port(&full_name, flags, port, value)?;
                pool.proto.assign_flow_output(port, value.clone());
            }
        }
        Ok(())
    }

    pub fn agent_exists(&self, agent_id: &K) -> bool {
        self.pool.indices.contains_key(agent_id)
    }

    pub fn agent_count(&self) -> usize {
        self.pool.indices.len()
    }

    /// Ids of the live agents, in ascending order.
    pub fn agent_ids(&self) -> Vec<K> {
        self.pool.indices.keys().cloned().collect()
    }

    /// Returns `true` if the message being handled in a micro-planned event
    /// was sent on the prototype message output `port`.
    pub fn transmitted(&self, port: &str) -> bool {
        matches!(&self.pool.transmitting, Some((name, _)) if name == port)
    }

    /// The message being handled in a micro-planned event.
    pub fn agent_message(&self, port: &str) -> SimResult<&PortValue> {
        self.expect_prototype_port(port, DataMode::Message, DataGoal::Output)?;
        match &self.pool.transmitting {
            Some((name, value)) if name == port => Ok(value),
            _ => Err(SimError::logic(format!(
                "Attempt to access message output port ({}), which is not the port of prototype agent ({}) on which the current message is being transmitted",
                port,
                self.prototype_name()
            ))),
        }
    }

    pub fn agent_message_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.agent_message(port)?;
        self.event.decode(port, value)
    }

    /// Flow output left by the last removed or invoked agent.
    pub fn agent_output(&self, port: &str) -> SimResult<&PortValue> {
        self.expect_prototype_port(port, DataMode::Flow, DataGoal::Output)?;
        self.pool.proto.flow_output(port).ok_or_else(|| {
            SimError::logic(format!(
                "Flow output port ({}) of prototype agent ({}) has no value",
                port,
                self.prototype_name()
            ))
        })
    }

    pub fn agent_output_as<T: DeserializeOwned>(&self, port: &str) -> SimResult<T> {
        let value = self.agent_output(port)?;
        self.event.decode(port, value)
    }
}

/// Runtime of a collection node; add it to a model with
/// [`Model::add_collection`](crate::structure::Model::add_collection).
pub struct Collection<C: CollectionNode> {
    node: C,
    pool: AgentPool<C::AgentId>,
    initialized: bool,
    finalized: bool,
}

impl<C: CollectionNode + 'static> Collection<C> {
    pub fn new(node: C, factory: AgentFactory) -> Self {
        Self {
            node,
            pool: AgentPool::new(factory),
            initialized: false,
            finalized: false,
        }
    }

    pub fn node(&self) -> &C {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut C {
        &mut self.node
    }

    /// Interface shared by all agents.
    pub fn prototype(&self) -> &NodeInterface {
        &self.pool.prototype
    }

    pub fn agent_count(&self) -> usize {
        self.pool.indices.len()
    }

    pub fn agent_ids(&self) -> impl Iterator<Item = &C::AgentId> + '_ {
        self.pool.indices.keys()
    }

    /// The agent `agent_id`, if it is alive and of type `N`.
    pub fn agent<N: 'static>(&self, agent_id: &C::AgentId) -> Option<&N> {
        let index = self.pool.indices.get(agent_id)?;
        let agent = self.pool.agents.get(index)?;
        agent.node.as_ref().as_any().downcast_ref::<N>()
    }

    /// Number of agent and macro events scheduled on the internal queue.
    pub fn scheduled_event_count(&self) -> usize {
        self.pool.queue.event_count()
    }

    fn sync_time(&mut self, ctx: &EventContext<'_>) -> SimResult<()> {
        let t = ctx.time().clone();
        if *self.pool.queue.current_time() < t {
            self.pool.queue.advance_time_to(&t)?;
        }
        if *self.pool.cache.current_time() < t {
            self.pool.cache.advance_time_to(&t)?;
        }
        Ok(())
    }

    fn plan_macro(&mut self, planned: Duration, pop: bool) -> SimResult<()> {
        if planned.finite() {
            self.pool.queue.plan_event(MACRO_EVENT_ID, planned)?;
        } else if pop {
            self.pool.queue.pop_imminent_event(MACRO_EVENT_ID)?;
        } else {
            self.pool.queue.cancel_event(MACRO_EVENT_ID);
        }
        let precision = self.node.time_precision();
        if precision != NO_SCALE {
            self.pool.cache.retain_event(MACRO_EVENT_ID, precision)?;
        }
        Ok(())
    }
}

impl<C: CollectionNode + 'static> AtomicNode for Collection<C> {
    fn interface(&self) -> NodeInterface {
        self.node.interface()
    }

    fn time_precision(&self) -> Scale {
        self.node.time_precision()
    }

    fn init(&mut self, ctx: &mut EventContext<'_>) -> SimResult<Duration> {
        if self.initialized {
            return Err(SimError::logic(format!(
                "Attempt to initialize collection node ({}) more than once",
                ctx.node_name()
            )));
        }
        let t = ctx.time().clone();
        self.pool.queue = TimeQueue::with_time(t.clone());
        self.pool.cache = TimeCache::with_time(t);
        let (name, flags) = (ctx.node_name().to_string(), ctx.flags());
        ctx.sim_mut().trace_event(&name, flags, "macro-initialization")?;
        let dt = self.node.macro_init(&mut CollectionContext {
            event: &mut *ctx,
            pool: &mut self.pool,
        })?;
        self.pool.clear_prototype();
        let macro_dt = scale_planned_duration(dt, self.node.time_precision())?;
        if macro_dt.finite() {
            self.pool.queue.plan_event(MACRO_EVENT_ID, macro_dt)?;
        }
        let precision = self.node.time_precision();
        if precision != NO_SCALE {
            self.pool.cache.retain_event(MACRO_EVENT_ID, precision)?;
        }
        let planned = self.pool.queue.imminent_duration();
        ctx.sim_mut().trace_planned(&name, flags, planned)?;
        self.initialized = true;
        Ok(planned)
    }

    fn on_message(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration> {
        self.sync_time(ctx)?;
        let (name, flags) = (ctx.node_name().to_string(), ctx.flags());
        ctx.sim_mut().trace_event(&name, flags, "macro-unplanned")?;
        ctx.sim_mut().trace_elapsed(&name, flags, elapsed)?;
        let dt = self.node.macro_unplanned(
            &mut CollectionContext {
                event: &mut *ctx,
                pool: &mut self.pool,
            },
            elapsed,
        )?;
        self.pool.clear_prototype();
        let macro_dt = scale_planned_duration(dt, self.node.time_precision())?;
        self.plan_macro(macro_dt, false)?;
        let planned = self.pool.queue.imminent_duration();
        ctx.sim_mut().trace_planned(&name, flags, planned)?;
        Ok(planned)
    }

    fn on_timer(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration> {
        self.sync_time(ctx)?;
        if self.pool.queue.imminent_duration() != Duration::ZERO {
            return Err(SimError::logic(
                "Unexpected error while advancing time to that of next planned event",
            ));
        }
        let index = self
            .pool
            .queue
            .imminent_event_ids()?
            .iter()
            .next()
            .copied()
            .unwrap_or(MACRO_EVENT_ID);
        let (name, flags) = (ctx.node_name().to_string(), ctx.flags());
        if index != MACRO_EVENT_ID {
            let (agent_id, outputs) = self.pool.agent_planned(ctx.sim_mut(), flags, index)?;
            let mut micro_elapsed = elapsed;
            for (port, value) in outputs {
                ctx.sim_mut().next_event();
                ctx.sim_mut().trace_event(&name, flags, "micro-planned")?;
                ctx.sim_mut().trace_elapsed(&name, flags, micro_elapsed)?;
                self.pool.transmitting = Some((port, value));
                let result = self.node.micro_planned(
                    &mut CollectionContext {
                        event: &mut *ctx,
                        pool: &mut self.pool,
                    },
                    &agent_id,
                    micro_elapsed,
                );
                self.pool.transmitting = None;
                let dt = result?;
                self.pool.clear_prototype();
                let macro_dt = scale_planned_duration(dt, self.node.time_precision())?;
                ctx.sim_mut().trace_planned(&name, flags, macro_dt)?;
                if micro_elapsed.valid() {
                    micro_elapsed = Duration::ZERO.fixed_at(self.node.time_precision());
                }
                self.plan_macro(macro_dt, false)?;
            }
        } else {
            ctx.sim_mut().trace_event(&name, flags, "macro-planned")?;
            ctx.sim_mut().trace_elapsed(&name, flags, elapsed)?;
            let dt = self.node.macro_planned(
                &mut CollectionContext {
                    event: &mut *ctx,
                    pool: &mut self.pool,
                },
                elapsed,
            )?;
            self.pool.clear_prototype();
            let macro_dt = scale_planned_duration(dt, self.node.time_precision())?;
            ctx.sim_mut().trace_planned(&name, flags, macro_dt)?;
            self.plan_macro(macro_dt, true)?;
        }
        Ok(self.pool.queue.imminent_duration())
    }

    fn finalize(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<()> {
        if self.finalized {
            return Err(SimError::logic(format!(
                "Attempt to finalize collection node ({}) more than once",
                ctx.node_name()
            )));
        }
        self.sync_time(ctx)?;
        let (name, flags) = (ctx.node_name().to_string(), ctx.flags());
        ctx.sim_mut().trace_event(&name, flags, "macro-finalization")?;
        ctx.sim_mut().trace_elapsed(&name, flags, elapsed)?;
        let mut cctx = CollectionContext {
            event: &mut *ctx,
            pool: &mut self.pool,
        };
        self.node.macro_finalize(&mut cctx, elapsed)?;
        while let Some(agent_id) = cctx.pool.indices.keys().next().cloned() {
            cctx.remove_agent(&agent_id)?;
        }
        self.finalized = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{TimePoint, UNIT};
    use crate::trace::SharedTrace;
    use serde_json::json;

    struct Ticker {
        period: i64,
        count: u64,
    }

    impl Ticker {
        fn new() -> Self {
            Self { period: 0, count: 0 }
        }
    }

    impl AtomicNode for Ticker {
        fn interface(&self) -> NodeInterface {
            NodeInterface::new()
                .with_flow_input("period")
                .with_message_input("reset")
                .with_message_output("tick")
                .with_flow_output("ticks")
        }

        fn time_precision(&self) -> Scale {
            UNIT
        }

        fn init(&mut self, ctx: &mut EventContext<'_>) -> SimResult<Duration> {
            self.period = ctx.flow_input_as("period")?;
            Ok(Duration::seconds(self.period))
        }

        fn on_message(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
            self.count = 0;
            Ok(Duration::seconds(self.period))
        }

        fn on_timer(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
            self.count += 1;
            ctx.send("tick", self.count)?;
            Ok(Duration::seconds(self.period))
        }

        fn finalize(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
            ctx.assign("ticks", self.count)
        }
    }

    #[derive(Default)]
    struct Fleet {
        seen: Vec<(u32, u64)>,
        action: &'static str,
    }

    impl CollectionNode for Fleet {
        type AgentId = u32;

        fn interface(&self) -> NodeInterface {
            NodeInterface::new().with_message_input("reset")
        }

        fn time_precision(&self) -> Scale {
            UNIT
        }

        fn macro_init(&mut self, ctx: &mut CollectionContext<'_, '_, u32>) -> SimResult<Duration> {
            match self.action {
                "duplicate" => {
                    ctx.set_agent_input("period", 2)?;
                    ctx.create_agent(1)?;
                    ctx.create_agent(1)?;
                }
                "invoke" => ctx.invoke_agent(1)?,
                "affect_missing" => {
                    ctx.set_agent_message("reset", true)?;
                    ctx.affect_agent(&9)?;
                }
                "missing_input" => ctx.create_agent(1)?,
                _ => {
                    ctx.set_agent_input("period", 2)?;
                    ctx.create_agent(1)?;
                    ctx.set_agent_input("period", 3)?;
                    ctx.create_agent(2)?;
                }
            }
            Ok(Duration::inf())
        }

        fn macro_unplanned(
            &mut self,
            ctx: &mut CollectionContext<'_, '_, u32>,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            ctx.set_agent_message("reset", true)?;
            ctx.affect_agent(&1)?;
            Ok(Duration::inf())
        }

        fn micro_planned(
            &mut self,
            ctx: &mut CollectionContext<'_, '_, u32>,
            agent_id: &u32,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            assert!(ctx.transmitted("tick"));
            let count = ctx.agent_message_as::<u64>("tick")?;
            self.seen.push((*agent_id, count));
            Ok(Duration::inf())
        }

        fn macro_planned(
            &mut self,
            _ctx: &mut CollectionContext<'_, '_, u32>,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn macro_finalize(
            &mut self,
            _ctx: &mut CollectionContext<'_, '_, u32>,
            _elapsed: Duration,
        ) -> SimResult<()> {
            Ok(())
        }
    }

    fn fleet(action: &'static str) -> Collection<Fleet> {
        Collection::new(
            Fleet {
                action,
                ..Fleet::default()
            },
            AgentFactory::message(Ticker::new),
        )
    }

    fn run_init(coll: &mut Collection<Fleet>, sim: &mut SimulationContext) -> SimResult<Duration> {
        let iface = coll.interface();
        let mut buffers = PortBuffers::new();
        let mut ctx = EventContext::new(
            EventPhase::Initialization,
            "top.fleet",
            &iface,
            &mut buffers,
            TraceFlags::all(),
            sim,
        );
        coll.init(&mut ctx)
    }

    #[test]
    fn test_agents_drive_micro_planned_events() {
        let mut sim = SimulationContext::new(0, TimePoint::new());
        let mut coll = fleet("");
        let planned = run_init(&mut coll, &mut sim).unwrap();
        assert_eq!(planned, Duration::seconds(2));
        assert_eq!(coll.agent_count(), 2);
        assert!(coll.agent::<Ticker>(&2).is_some());
        assert_eq!(coll.agent::<Ticker>(&2).unwrap().period, 3);

        let end_t = TimePoint::from_duration(Duration::seconds(100)).unwrap();
        sim.event_time_mut().advance_by(planned, &end_t).unwrap();
        let iface = coll.interface();
        let mut buffers = PortBuffers::new();
        let mut ctx = EventContext::new(
            EventPhase::Planned,
            "top.fleet",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        let planned = coll.on_timer(&mut ctx, Duration::seconds(2)).unwrap();
        assert_eq!(planned, Duration::seconds(1));
        assert_eq!(coll.node().seen, vec![(1, 1)]);
    }

    #[test]
    fn test_affect_and_finalize() {
        let mut sim = SimulationContext::new(0, TimePoint::new());
        let mut coll = fleet("");
        run_init(&mut coll, &mut sim).unwrap();
        let iface = coll.interface();

        let mut buffers = PortBuffers::new();
        buffers.set_message_input("reset", json!(true));
        let mut ctx = EventContext::new(
            EventPhase::Unplanned,
            "top.fleet",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        assert_eq!(coll.on_message(&mut ctx, Duration::ZERO).unwrap(), Duration::seconds(2));

        let mut buffers = PortBuffers::new();
        let mut ctx = EventContext::new(
            EventPhase::Finalization,
            "top.fleet",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        coll.finalize(&mut ctx, Duration::ZERO).unwrap();
        assert_eq!(coll.agent_count(), 0);
        assert_eq!(coll.scheduled_event_count(), 0);

        let mut ctx = EventContext::new(
            EventPhase::Finalization,
            "top.fleet",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        let err = coll.finalize(&mut ctx, Duration::ZERO).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to finalize collection node (top.fleet) more than once"
        );
    }

    #[test]
    fn test_agent_misuse_is_reported() {
        let cases = [
            ("duplicate", "Created agent (top.fleet#1) already exists."),
            (
                "invoke",
                "Attempt to use \"invoke_agent\" to invoke a message node agent of a collection node (top.fleet); use \"create_agent\", \"affect_agent\", and \"remove_agent\" instead",
            ),
            ("affect_missing", "Attempt to affect agent (top.fleet#9) that does not exist"),
            (
                "missing_input",
                "Flow input port (period) of created agent (top.fleet#1) has no value",
            ),
        ];
        for (action, message) in cases {
            let mut sim = SimulationContext::new(0, TimePoint::new());
            let mut coll = fleet(action);
            let err = run_init(&mut coll, &mut sim).unwrap_err();
            assert_eq!(err.to_string(), message, "action {}", action);
        }
    }

    #[test]
    fn test_agent_events_are_traced() {
        let trace = SharedTrace::new();
        let mut sim = SimulationContext::new(0, TimePoint::new());
        sim.tracer_mut().set_sink(Some(Box::new(trace.clone())));
        let mut coll = fleet("");
        run_init(&mut coll, &mut sim).unwrap();
        let lines = trace.lines();
        assert_eq!(lines[0], "0|0|$time:time_point()");
        assert_eq!(lines[1], "0|0|top.fleet$macro-initialization");
        assert_eq!(lines[2], "0|1|top.fleet#1$initialization");
        assert_eq!(lines[3], "0|1|top.fleet#1#period:2");
        assert_eq!(lines.last().unwrap(), "0|2|top.fleet$planned_dt:2_s");
    }

    struct Doubler;

    impl FunctionNode for Doubler {
        fn interface(&self) -> NodeInterface {
            NodeInterface::new().with_flow_input("x").with_flow_output("y")
        }

        fn flow_event(&mut self, ctx: &mut EventContext<'_>) -> SimResult<()> {
            let x: i64 = ctx.flow_input_as("x")?;
            ctx.assign("y", 2 * x)
        }
    }

    #[derive(Default)]
    struct Mapper {
        results: Vec<i64>,
    }

    impl CollectionNode for Mapper {
        type AgentId = i64;

        fn interface(&self) -> NodeInterface {
            NodeInterface::new().with_message_input("in")
        }

        fn time_precision(&self) -> Scale {
            NO_SCALE
        }

        fn macro_init(&mut self, ctx: &mut CollectionContext<'_, '_, i64>) -> SimResult<Duration> {
            ctx.create_agent(0)?;
            Ok(Duration::inf())
        }

        fn macro_unplanned(
            &mut self,
            ctx: &mut CollectionContext<'_, '_, i64>,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            let x: i64 = ctx.message_as("in")?;
            ctx.set_agent_input("x", x)?;
            ctx.invoke_agent(x)?;
            let y = ctx.agent_output_as::<i64>("y")?;
            self.results.push(y);
            Ok(Duration::inf())
        }

        fn micro_planned(
            &mut self,
            _ctx: &mut CollectionContext<'_, '_, i64>,
            _agent_id: &i64,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn macro_planned(
            &mut self,
            _ctx: &mut CollectionContext<'_, '_, i64>,
            _elapsed: Duration,
        ) -> SimResult<Duration> {
            Ok(Duration::inf())
        }

        fn macro_finalize(
            &mut self,
            _ctx: &mut CollectionContext<'_, '_, i64>,
            _elapsed: Duration,
        ) -> SimResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_flow_agents_are_invoked() {
        let mut coll = Collection::new(Mapper::default(), AgentFactory::flow(|| Doubler));
        let iface = coll.interface();
        let mut sim = SimulationContext::new(0, TimePoint::new());
        let mut buffers = PortBuffers::new();
        let mut ctx = EventContext::new(
            EventPhase::Initialization,
            "top.mapper",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        let err = coll.init(&mut ctx).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attempt to use \"create_agent\" to create a flow node agent of a collection node (top.mapper); use \"invoke_agent\" instead"
        );

        let mut coll = Collection::new(Mapper::default(), AgentFactory::flow(|| Doubler));
        let mut buffers = PortBuffers::new();
        buffers.set_message_input("in", json!(21));
        let mut ctx = EventContext::new(
            EventPhase::Unplanned,
            "top.mapper",
            &iface,
            &mut buffers,
            TraceFlags::none(),
            &mut sim,
        );
        assert_eq!(coll.on_message(&mut ctx, Duration::invalid()).unwrap(), Duration::inf());
        assert_eq!(coll.node().results, vec![42]);
        assert_eq!(coll.agent_count(), 0);
        assert_eq!(coll.prototype().len(), 2);
    }
}
