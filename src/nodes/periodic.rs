//! A node that fires at a fixed period.

use crate::context::EventContext;
use crate::error::{SimError, SimResult};
use crate::node::AtomicNode;
use crate::port::NodeInterface;
use crate::time::{Duration, Scale, TimePoint};

/// Sends the running tick count on `tick` every `period`.
///
/// The first tick happens after `first_delay` (the period by default). At
/// finalization the total is assigned to the flow output `count`.
#[derive(Clone, Debug)]
pub struct PeriodicNode {
    /// Time between ticks
    pub period: Duration,
    /// Delay before the first tick
    pub first_delay: Duration,
    /// Number of ticks so far
    pub count: u64,
    /// Simulated time of every tick
    pub fire_times: Vec<TimePoint>,
    precision: Scale,
}

impl PeriodicNode {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            first_delay: period,
            count: 0,
            fire_times: Vec::new(),
            precision: period.precision(),
        }
    }

    /// Fires first after `delay` instead of after one period.
    pub fn with_first_delay(mut self, delay: Duration) -> Self {
        self.first_delay = delay;
        self
    }

    pub fn with_precision(mut self, precision: Scale) -> Self {
        self.precision = precision;
        self
    }
}

impl AtomicNode for PeriodicNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface::new()
            .with_message_output("tick")
            .with_flow_output("count")
    }

    fn time_precision(&self) -> Scale {
        self.precision
    }

    fn init(&mut self, _ctx: &mut EventContext<'_>) -> SimResult<Duration> {
        self.count = 0;
        self.fire_times.clear();
        Ok(self.first_delay)
    }

    fn on_message(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
        Err(SimError::model(format!(
            "Periodic node ({}) does not expect messages",
            ctx.node_name()
        )))
    }

    fn on_timer(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
        self.count += 1;
        self.fire_times.push(ctx.time().clone());
        ctx.send("tick", self.count)?;
        Ok(self.period)
    }

    fn finalize(&mut self, ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
        ctx.assign("count", self.count)
    }
}
