//! Counts arriving messages.

use crate::context::EventContext;
use crate::error::SimResult;
use crate::node::AtomicNode;
use crate::port::NodeInterface;
use crate::time::{Duration, Scale, TimePoint, UNIT};
use crate::types::PortValue;

/// Counts messages received on `in` and assigns the total to the flow
/// output `count` at finalization.
#[derive(Clone, Debug)]
pub struct CounterNode {
    /// Number of messages received
    pub count: u64,
    /// Time and value of every message
    pub arrivals: Vec<(TimePoint, PortValue)>,
    /// Elapsed durations reported by each unplanned event
    pub elapsed: Vec<Duration>,
    /// Set once the finalization event ran
    pub finalized: bool,
    precision: Scale,
}

impl Default for CounterNode {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterNode {
    pub fn new() -> Self {
        Self {
            count: 0,
            arrivals: Vec::new(),
            elapsed: Vec::new(),
            finalized: false,
            precision: UNIT,
        }
    }

    pub fn with_precision(mut self, precision: Scale) -> Self {
        self.precision = precision;
        self
    }
}

impl AtomicNode for CounterNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface::new()
            .with_message_input("in")
            .with_flow_output("count")
    }

    fn time_precision(&self) -> Scale {
        self.precision
    }

    fn init(&mut self, _ctx: &mut EventContext<'_>) -> SimResult<Duration> {
        Ok(Duration::inf())
    }

    fn on_message(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration> {
        let value = ctx.message("in")?.clone();
        self.count += 1;
        self.arrivals.push((ctx.time().clone(), value));
        self.elapsed.push(elapsed);
        Ok(Duration::inf())
    }

    fn on_timer(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
        Ok(Duration::inf())
    }

    fn finalize(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
        self.finalized = true;
        ctx.assign("count", self.count)
    }
}
