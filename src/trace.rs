//! Model trace output.
//!
//! The trace is a deterministic, line-oriented record of what nodes did,
//! separate from `tracing` diagnostics. Each line is
//! `{t_index}|{c}|{full_name}{text}`, and the first line printed at a new
//! simulated time announces it as `{t_index}|0|$time:{t}`:
//!
//! ```text
//! 1|0|$time:time_point() + 5_s
//! 1|1|top.clock$planned
//! 1|1|top.clock$elapsed_dt:5_s
//! 1|1|top.clock$planned_dt:5_s
//! 1|1|top.clock#tick:1
//! ```
//!
//! Which lines a node produces is governed by its [`TraceFlags`]. Without a
//! sink nothing is formatted at all.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Arc;

use crate::error::SimResult;
use crate::event_time::DiscreteEventTime;
use crate::time::Duration;
use crate::types::PortValue;

/// Which trace lines a node emits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFlags {
    /// Event kind, e.g. `$planned`.
    #[serde(default)]
    pub on_event: bool,
    /// `$elapsed_dt:` lines.
    #[serde(default)]
    pub on_elapsed_duration: bool,
    /// `$planned_dt:` lines.
    #[serde(default)]
    pub on_planned_duration: bool,
    /// `#port:value` lines.
    #[serde(default)]
    pub on_port_use: bool,
}

impl TraceFlags {
    pub fn all() -> Self {
        Self {
            on_event: true,
            on_elapsed_duration: true,
            on_planned_duration: true,
            on_port_use: true,
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_event(mut self, flag: bool) -> Self {
        self.on_event = flag;
        self
    }

    pub fn with_elapsed_duration(mut self, flag: bool) -> Self {
        self.on_elapsed_duration = flag;
        self
    }

    pub fn with_planned_duration(mut self, flag: bool) -> Self {
        self.on_planned_duration = flag;
        self
    }

    pub fn with_port_use(mut self, flag: bool) -> Self {
        self.on_port_use = flag;
        self
    }

    /// Flags set in either `self` or `other`.
    pub fn union(self, other: TraceFlags) -> Self {
        Self {
            on_event: self.on_event || other.on_event,
            on_elapsed_duration: self.on_elapsed_duration || other.on_elapsed_duration,
            on_planned_duration: self.on_planned_duration || other.on_planned_duration,
            on_port_use: self.on_port_use || other.on_port_use,
        }
    }
}

/// Destination for trace lines.
pub trait TraceSink: Send {
    fn record(&mut self, line: &str) -> io::Result<()>;
}

/// In-memory sink whose handle can be cloned and inspected after a run.
///
/// # Example
///
/// ```rust
/// use jikoku::trace::{SharedTrace, TraceSink};
///
/// let trace = SharedTrace::new();
/// let mut sink = trace.clone();
/// sink.record("0|1|top.a$initialization").unwrap();
/// assert_eq!(trace.lines(), vec!["0|1|top.a$initialization".to_string()]);
/// ```
#[derive(Clone, Debug, Default)]
pub struct SharedTrace {
    lines: Arc<Mutex<Vec<String>>>,
}

impl SharedTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// All lines joined with newlines.
    pub fn to_text(&self) -> String {
        let lines = self.lines.lock();
        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        text
    }
}

impl TraceSink for SharedTrace {
    fn record(&mut self, line: &str) -> io::Result<()> {
        self.lines.lock().push(line.to_string());
        Ok(())
    }
}

/// Sink writing one line per record to any writer.
pub struct WriterSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TraceSink for WriterSink<W> {
    fn record(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }
}

/// Formats trace lines and hands them to the installed sink.
#[derive(Default)]
pub struct Tracer {
    sink: Option<Box<dyn TraceSink>>,
    printed_t_index: Option<i64>,
}

impl Tracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(sink: impl TraceSink + 'static) -> Self {
        Self {
            sink: Some(Box::new(sink)),
            printed_t_index: None,
        }
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn TraceSink>>) {
        self.sink = sink;
        self.printed_t_index = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    fn line(&mut self, et: &DiscreteEventTime, full_name: &str, text: &str) -> SimResult<()> {
        let Some(sink) = self.sink.as_mut() else {
            return Ok(());
        };
        if self.printed_t_index != Some(et.t_index()) {
            sink.record(&format!("{}|0|$time:{}", et.t_index(), et.t()))?;
            self.printed_t_index = Some(et.t_index());
        }
        sink.record(&format!("{}|{}|{}{}", et.t_index(), et.c(), full_name, text))?;
        Ok(())
    }

    pub(crate) fn event(
        &mut self,
        et: &DiscreteEventTime,
        full_name: &str,
        flags: TraceFlags,
        kind: &str,
    ) -> SimResult<()> {
        if !flags.on_event {
            return Ok(());
        }
        self.line(et, full_name, &format!("${}", kind))
    }

    pub(crate) fn elapsed(
        &mut self,
        et: &DiscreteEventTime,
        full_name: &str,
        flags: TraceFlags,
        elapsed: Duration,
    ) -> SimResult<()> {
        if !flags.on_elapsed_duration {
            return Ok(());
        }
        self.line(et, full_name, &format!("$elapsed_dt:{}", elapsed))
    }

    pub(crate) fn planned(
        &mut self,
        et: &DiscreteEventTime,
        full_name: &str,
        flags: TraceFlags,
        planned: Duration,
    ) -> SimResult<()> {
        if !flags.on_planned_duration {
            return Ok(());
        }
        self.line(et, full_name, &format!("$planned_dt:{}", planned))
    }

    pub(crate) fn port(
        &mut self,
        et: &DiscreteEventTime,
        full_name: &str,
        flags: TraceFlags,
        port: &str,
        value: &PortValue,
    ) -> SimResult<()> {
        if !flags.on_port_use {
            return Ok(());
        }
        self.line(et, full_name, &format!("#{}:{}", port, value))
    }

    /// Free text requested by a node; always printed when a sink exists.
    pub(crate) fn print(&mut self, et: &DiscreteEventTime, full_name: &str, text: &str) -> SimResult<()> {
        self.line(et, full_name, &format!("$print:{}", text))
    }

    pub(crate) fn error(&mut self, et: &DiscreteEventTime, full_name: &str, message: &str) -> SimResult<()> {
        self.line(et, full_name, &format!("$error:{}", message))
    }
}

impl std::fmt::Debug for Tracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracer")
            .field("enabled", &self.is_enabled())
            .field("printed_t_index", &self.printed_t_index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimePoint;
    use serde_json::json;

    #[test]
    fn test_time_line_printed_once_per_t_index() {
        let trace = SharedTrace::new();
        let mut tracer = Tracer::with_sink(trace.clone());
        let mut et = DiscreteEventTime::new();
        et.advance();
        tracer.event(&et, "top.a", TraceFlags::all(), "initialization").unwrap();
        et.advance();
        tracer.event(&et, "top.b", TraceFlags::all(), "initialization").unwrap();
        let end_t = TimePoint::from_duration(Duration::seconds(10)).unwrap();
        et.advance_by(Duration::seconds(2), &end_t).unwrap();
        tracer
            .port(&et, "top.a", TraceFlags::all(), "out", &json!(7))
            .unwrap();

        assert_eq!(
            trace.lines(),
            vec![
                "0|0|$time:time_point()",
                "0|1|top.a$initialization",
                "0|2|top.b$initialization",
                "1|0|$time:time_point() + 2_s",
                "1|0|top.a#out:7",
            ]
        );
    }

    #[test]
    fn test_flags_filter_lines() {
        let trace = SharedTrace::new();
        let mut tracer = Tracer::with_sink(trace.clone());
        let et = DiscreteEventTime::new();
        let flags = TraceFlags::none().with_planned_duration(true);
        tracer.event(&et, "top.a", flags, "planned").unwrap();
        tracer.elapsed(&et, "top.a", flags, Duration::ZERO).unwrap();
        tracer.planned(&et, "top.a", flags, Duration::inf()).unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.lines()[1], "0|0|top.a$planned_dt:duration::inf()");
    }

    #[test]
    fn test_no_sink_records_nothing() {
        let mut tracer = Tracer::new();
        let et = DiscreteEventTime::new();
        assert!(!tracer.is_enabled());
        tracer.print(&et, "top.a", "hello").unwrap();
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.record("0|1|top.a$flow").unwrap();
        assert_eq!(String::from_utf8(sink.into_inner()).unwrap(), "0|1|top.a$flow\n");
    }
}
