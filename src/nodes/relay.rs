//! Forwards messages within the same instant.

use crate::context::EventContext;
use crate::error::SimResult;
use crate::node::AtomicNode;
use crate::port::NodeInterface;
use crate::time::{Duration, Scale, UNIT};
use crate::types::PortValue;

/// Re-sends every message received on `in` through `out` during the same
/// unplanned event, so chains of relays cascade without time passing.
#[derive(Clone, Debug, Default)]
pub struct RelayNode {
    /// Messages forwarded so far
    pub forwarded: Vec<PortValue>,
    /// Elapsed durations reported by each unplanned event
    pub elapsed: Vec<Duration>,
}

impl RelayNode {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AtomicNode for RelayNode {
    fn interface(&self) -> NodeInterface {
        NodeInterface::new()
            .with_message_input("in")
            .with_message_output("out")
    }

    fn time_precision(&self) -> Scale {
        UNIT
    }

    fn init(&mut self, _ctx: &mut EventContext<'_>) -> SimResult<Duration> {
        Ok(Duration::inf())
    }

    fn on_message(&mut self, ctx: &mut EventContext<'_>, elapsed: Duration) -> SimResult<Duration> {
        let value = ctx.message("in")?.clone();
        ctx.send("out", &value)?;
        self.forwarded.push(value);
        self.elapsed.push(elapsed);
        Ok(Duration::inf())
    }

    fn on_timer(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<Duration> {
        Ok(Duration::inf())
    }

    fn finalize(&mut self, _ctx: &mut EventContext<'_>, _elapsed: Duration) -> SimResult<()> {
        Ok(())
    }
}
