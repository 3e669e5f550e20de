//! Node behaviour traits.
//!
//! Leaf behaviour comes in two flavours:
//!
//! - [`AtomicNode`]: a timed state machine driven by four callbacks. `init`
//!   runs once at the start, `on_message` whenever a message arrives,
//!   `on_timer` when the previously planned duration has elapsed, and
//!   `finalize` once at the end. Every callback except `finalize` returns
//!   the next planned duration: zero for "right away", infinity for "only
//!   when a message arrives".
//! - [`FunctionNode`]: a pure flow computation run once, as soon as all of
//!   its flow inputs are known.
//!
//! Grouping is done by the [`Model`](crate::structure::Model); dynamically
//! sized groups of agents by [`Collection`](crate::collection::Collection).

use serde::{Deserialize, Serialize};
use std::any::Any;

use crate::context::EventContext;
use crate::error::{SimError, SimResult};
use crate::port::NodeInterface;
use crate::time::{Duration, Scale, NO_SCALE};

/// The kind of a node in the model arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// Groups and wires child nodes.
    Composite,
    /// Timed state machine.
    Atomic,
    /// Keyed set of agents managed by procedural logic.
    Collection,
    /// One-shot flow computation.
    Function,
}

impl NodeKind {
    /// Returns `true` for node kinds that receive planned and unplanned events.
    pub fn is_message_node(self) -> bool {
        matches!(self, NodeKind::Atomic | NodeKind::Collection)
    }

    pub fn is_leaf(self) -> bool {
        self != NodeKind::Composite
    }
}

/// Upcasting to [`Any`] so concrete nodes can be inspected after a run.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A timed node defined by four event callbacks.
///
/// # Example
///
/// ```rust
/// use jikoku::context::EventContext;
/// use jikoku::error::SimResult;
/// use jikoku::node::AtomicNode;
/// use jikoku::port::NodeInterface;
/// use jikoku::time::{Duration, Scale, UNIT};
///
/// struct Beacon {
///     count: u64,
/// }
///
/// impl AtomicNode for Beacon {
///     fn interface(&self) -> NodeInterface {
///         NodeInterface::new().with_message_output("ping")
///     }
///
///     fn time_precision(&self) -> Scale {
///         UNIT
///     }
///
///     fn init(&mut self, _ctx: &mut EventContext<'_>) -> SimResult<Duration> {
///         Ok(Duration::seconds(1))
///     }
///
///     fn on_message(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
///         Ok(Duration::inf())
///     }
///
///     fn on_timer(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
///         self.count += 1;
///         ctx.send("ping", self.count)?;
///         Ok(Duration::seconds(1))
///     }
///
///     fn finalize(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
///         Ok(())
///     }
/// }
/// ```
pub trait AtomicNode: AsAny + Send {
    /// Ports of the node. Called once when the node is added to a model.
    fn interface(&self) -> NodeInterface;

    /// Precision at which elapsed and planned durations are expressed.
    ///
    /// [`NO_SCALE`] means the node has no notion of time: it only ever plans
    /// zero or infinite durations and is handed invalid elapsed durations.
    fn time_precision(&self) -> Scale;

    /// First event. Flow inputs are readable.
    fn init(&mut self, ctx: &mut EventContext<'_>) -> SimResult<Duration>;

    /// A message arrived; `elapsed` is the time since this node's last event.
    fn on_message(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration>;

    /// The planned duration has elapsed.
    fn on_timer(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration>;

    /// Last event. Flow outputs must be assigned here.
    fn finalize(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<()>;
}

/// A node computing flow outputs from flow inputs, once.
pub trait FunctionNode: AsAny + Send {
    fn interface(&self) -> NodeInterface;

    /// Reads every flow input and assigns every flow output.
    fn flow_event(&mut self, ctx: &mut EventContext<'_>) -> SimResult<()>;
}

/// Checks a planned duration returned by a node and rescales it to the
/// node's precision.
///
/// The duration must be valid and non-negative. A node without a time scale
/// may only plan zero or infinity; any other node must plan a duration that
/// its precision represents exactly.
pub fn scale_planned_duration(planned: Duration, precision: Scale) -> SimResult<Duration> {
    if !planned.valid() {
        return Err(SimError::logic("Planned duration for atomic node must be valid"));
    }
    if planned < Duration::ZERO {
        return Err(SimError::logic(
            "Planned duration for atomic node must be non-negative",
        ));
    }
    if precision == NO_SCALE {
        if planned != Duration::ZERO && planned.finite() {
            return Err(SimError::logic(
                "Planned duration for atomic node with no time scale must be either zero or infinity",
            ));
        }
        return Ok(planned);
    }
    let scaled = planned.fixed_at(precision);
    if scaled != planned {
        return Err(SimError::logic(
            "Planned duration must not lose precision when automatically scaled to match the model's time precision",
        ));
    }
    Ok(scaled)
}
