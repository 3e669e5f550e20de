//! Scheduling of future events.
//!
//! The queue stores each planned event as a *phase*: its position within the
//! epoch of `QUANTITY_LIMIT` units at the event's precision, coarsened as far
//! as it can be without losing digits. Phases stay valid while the current
//! time advances, so untouched events are never rewritten.
//!
//! Durations handed in and out are relative to the current time truncated to
//! the duration's own precision, which is exactly what
//! [`TimePoint::advance_on_grid`] adds them to.
//!
//! # Example
//!
//! ```rust
//! use jikoku::time::{Duration, TimeQueue};
//!
//! let mut queue = TimeQueue::new();
//! queue.plan_event(1, Duration::seconds(5)).unwrap();
//! queue.plan_event(2, Duration::millis(3000)).unwrap();
//! assert_eq!(queue.imminent_duration(), Duration::seconds(3));
//! queue.advance_time().unwrap();
//! assert_eq!(queue.imminent_duration(), Duration::seconds(2));
//! ```

use std::collections::{BTreeSet, HashMap};

use super::duration::{Duration, QUANTITY_LIMIT};
use super::time_point::{scale_at, TimePoint};
use super::{Scale, TimeError, TimeResult};

/// Identifier of a scheduled event.
pub type EventId = i64;

/// A planned event position within its epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Phase {
    multiplier: i64,
    precision: Scale,
}

impl Phase {
    fn level(&self) -> i32 {
        i32::from(self.precision.level())
    }
}

/// Priority queue of future events, keyed by event id.
#[derive(Clone, Debug)]
pub struct TimeQueue {
    default_precision: Scale,
    current: TimePoint,
    queue: Vec<Phase>,
    event_id_sets: HashMap<Phase, BTreeSet<EventId>>,
    event_accounts: HashMap<EventId, (Phase, Scale)>,
}

impl TimeQueue {
    /// An empty queue whose current time is zero.
    pub fn new() -> Self {
        Self::with_time(TimePoint::new())
    }

    /// An empty queue whose current time is `t0`.
    pub fn with_time(t0: TimePoint) -> Self {
        let default_precision = scale_at(i32::from(t0.precision().level()) + t0.nscales() as i32);
        Self {
            default_precision,
            current: t0,
            queue: Vec::new(),
            event_id_sets: HashMap::new(),
            event_accounts: HashMap::new(),
        }
    }

    pub fn current_time(&self) -> &TimePoint {
        &self.current
    }

    /// Advances to the imminent events.
    pub fn advance_time(&mut self) -> TimeResult<&TimePoint> {
        if self.is_empty() {
            return Err(TimeError::OutOfRange(
                "No events exist to constrain time advancement".to_string(),
            ));
        }
        let dt = self.imminent_duration();
        self.current.advance_on_grid(dt)?;
        Ok(&self.current)
    }

    /// Advances by `dt`, which must not pass the imminent events.
    pub fn advance_time_by(&mut self, dt: Duration) -> TimeResult<&TimePoint> {
        if !self.can_advance_by(dt)? {
            return Err(TimeError::OutOfRange(
                "Advancement duration must not set current time later than imminent events"
                    .to_string(),
            ));
        }
        self.current.advance_on_grid(dt)?;
        Ok(&self.current)
    }

    /// Advances to the time point `t`, which must not pass the imminent events.
    pub fn advance_time_to(&mut self, t: &TimePoint) -> TimeResult<&TimePoint> {
        if *t < self.current {
            return Err(TimeError::OutOfRange(
                "Advancement time must be later than current time of time queue".to_string(),
            ));
        }
        while self.current < *t {
            let dt = t.gap(&self.current);
            if dt <= Duration::ZERO {
                break;
            }
            self.advance_time_by(dt)?;
        }
        if self.current != *t {
            return Err(TimeError::Logic(
                "Unexpected error occurred while advancing time queue to specified time"
                    .to_string(),
            ));
        }
        Ok(&self.current)
    }

    /// Returns `true` if advancing by `dt` would not skip over any event.
    pub fn can_advance_by(&self, dt: Duration) -> TimeResult<bool> {
        if dt == Duration::ZERO {
            return Ok(true);
        }
        if !dt.valid() {
            return Err(TimeError::InvalidArgument(
                "Advancement duration must be valid".to_string(),
            ));
        }
        if dt < Duration::ZERO {
            return Err(TimeError::OutOfRange(
                "Advancement duration must be non-negative".to_string(),
            ));
        }
        if !dt.finite() {
            return Err(TimeError::OutOfRange(
                "Advancement duration must be finite".to_string(),
            ));
        }
        let imminent_dt = self.imminent_duration();
        if !imminent_dt.finite() {
            return Ok(true);
        }
        let precision = dt.precision().min(imminent_dt.precision());
        Ok(self.refined_duration(dt, precision) <= self.refined_duration(imminent_dt, precision))
    }

    /// Duration until the imminent events, or infinity if there are none.
    pub fn imminent_duration(&self) -> Duration {
        match self.queue.first() {
            Some(phase) => self.reported_duration(*phase),
            None => Duration::inf(),
        }
    }

    /// Duration until the event `event_id`, at the precision it was planned
    /// with, or infinity if it is not scheduled.
    pub fn duration_until(&self, event_id: EventId) -> Duration {
        match self.event_accounts.get(&event_id) {
            Some((phase, precision)) => self.rescaled_duration_from_phase(*phase, *precision),
            None => Duration::inf(),
        }
    }

    /// Duration until the `time_index`-th distinct event time.
    pub fn duration_at(&self, time_index: usize) -> TimeResult<Duration> {
        let phase = self.queue.get(time_index).ok_or_else(|| {
            TimeError::OutOfRange(
                "Duration time index must be less than the number of distinct event times"
                    .to_string(),
            )
        })?;
        Ok(self.reported_duration(*phase))
    }

    /// Ids of all events sharing the imminent time, in ascending order.
    pub fn imminent_event_ids(&self) -> TimeResult<&BTreeSet<EventId>> {
        let phase = self
            .queue
            .first()
            .ok_or_else(|| TimeError::OutOfRange("No imminent events exist".to_string()))?;
        self.event_ids_for(phase)
    }

    /// Ids of all events at the `time_index`-th distinct event time.
    pub fn event_ids_at(&self, time_index: usize) -> TimeResult<&BTreeSet<EventId>> {
        let phase = self.queue.get(time_index).ok_or_else(|| {
            TimeError::OutOfRange(
                "Event time index must be less than the number of distinct event times"
                    .to_string(),
            )
        })?;
        self.event_ids_for(phase)
    }

    fn event_ids_for(&self, phase: &Phase) -> TimeResult<&BTreeSet<EventId>> {
        self.event_id_sets
            .get(phase)
            .ok_or_else(|| TimeError::Logic("Event time has no event ids".to_string()))
    }

    /// Removes one of the imminent events.
    pub fn pop_imminent_event(&mut self, event_id: EventId) -> TimeResult<()> {
        let phase = *self.queue.first().ok_or_else(|| {
            TimeError::OutOfRange(
                "No imminent events exist to search for specified id".to_string(),
            )
        })?;
        let ids = self
            .event_id_sets
            .get_mut(&phase)
            .ok_or_else(|| TimeError::Logic("Event time has no event ids".to_string()))?;
        if !ids.remove(&event_id) {
            return Err(TimeError::OutOfRange(
                "No imminent event has specified id".to_string(),
            ));
        }
        if ids.is_empty() {
            self.queue.remove(0);
            self.event_id_sets.remove(&phase);
        }
        self.event_accounts.remove(&event_id);
        Ok(())
    }

    /// Removes all imminent events.
    pub fn pop_imminent_events(&mut self) -> TimeResult<()> {
        if self.queue.is_empty() {
            return Err(TimeError::OutOfRange(
                "No imminent events exist to be popped".to_string(),
            ));
        }
        let phase = self.queue.remove(0);
        if let Some(ids) = self.event_id_sets.remove(&phase) {
            for event_id in ids {
                self.event_accounts.remove(&event_id);
            }
        }
        Ok(())
    }

    /// Schedules `event_id` after `dt`, replacing any existing schedule.
    pub fn plan_event(&mut self, event_id: EventId, dt: Duration) -> TimeResult<()> {
        if !dt.valid() {
            return Err(TimeError::InvalidArgument(
                "Planned duration must be valid".to_string(),
            ));
        }
        if dt < Duration::ZERO {
            return Err(TimeError::OutOfRange(
                "Planned duration must be non-negative".to_string(),
            ));
        }
        if !dt.finite() {
            return Err(TimeError::OutOfRange(
                "Planned duration must be finite".to_string(),
            ));
        }
        self.cancel_event(event_id);
        let phase = self.phase_from_duration(dt);
        let index = self.lower_bound(phase);
        if self.queue.get(index) == Some(&phase) {
            self.event_id_sets.entry(phase).or_default().insert(event_id);
        } else {
            self.queue.insert(index, phase);
            self.event_id_sets.insert(phase, BTreeSet::from([event_id]));
        }
        self.event_accounts.insert(event_id, (phase, dt.precision()));
        Ok(())
    }

    /// Unschedules `event_id`. Returns whether it was scheduled.
    pub fn cancel_event(&mut self, event_id: EventId) -> bool {
        let Some((phase, _)) = self.event_accounts.remove(&event_id) else {
            return false;
        };
        let now_empty = match self.event_id_sets.get_mut(&phase) {
            Some(ids) => {
                ids.remove(&event_id);
                ids.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.event_id_sets.remove(&phase);
            if let Some(index) = self.queue.iter().position(|p| *p == phase) {
                self.queue.remove(index);
            }
        }
        true
    }

    /// Number of distinct event times.
    pub fn time_count(&self) -> usize {
        self.queue.len()
    }

    /// Number of scheduled events.
    pub fn event_count(&self) -> usize {
        self.event_accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Duration until an event time, at the finest precision any of its
    /// events was planned with.
    fn reported_duration(&self, phase: Phase) -> Duration {
        let dt = self.duration_from_phase(phase);
        let finest = self.event_id_sets.get(&phase).and_then(|ids| {
            ids.iter()
                .filter_map(|id| self.event_accounts.get(id))
                .map(|(_, precision)| *precision)
                .min()
        });
        match finest {
            Some(precision) if precision < dt.precision() => {
                let refined = self.refined_duration(dt, precision);
                if refined.finite() {
                    refined
                } else {
                    dt
                }
            }
            _ => dt,
        }
    }

    fn duration_from_phase(&self, phase: Phase) -> Duration {
        let mut multiplier = phase.multiplier - self.current.epoch_phase(phase.precision);
        if multiplier < 0 {
            multiplier += QUANTITY_LIMIT;
        }
        Duration::new(multiplier, phase.precision)
    }

    /// Re-expresses `dt` at the finer `precision`, measured from the current
    /// time rather than from the start of the current `dt.precision()` unit.
    fn refined_duration(&self, dt: Duration, precision: Scale) -> Duration {
        let mut multiplier = dt.multiplier();
        if multiplier > 0 {
            let mut s = i32::from(dt.precision().level()) - 1;
            let floor = i32::from(precision.level());
            while multiplier < QUANTITY_LIMIT && s >= floor {
                multiplier = 1000 * multiplier - self.current.scale_phase(scale_at(s));
                s -= 1;
            }
        }
        Duration::new(multiplier, precision)
    }

    fn refined_duration_from_phase(&self, phase: Phase, precision: Scale) -> Duration {
        self.refined_duration(self.duration_from_phase(phase), precision)
    }

    fn rescaled_duration_from_phase(&self, phase: Phase, precision: Scale) -> Duration {
        let dt = self.duration_from_phase(phase);
        if precision <= dt.precision() {
            self.refined_duration(dt, precision)
        } else {
            // Only reachable for events at the current time, whose multiplier
            // is zero or one.
            Duration::new(dt.multiplier(), precision)
        }
    }

    fn phase_from_duration(&self, dt: Duration) -> Phase {
        let mut level = if dt.multiplier() == 0 {
            i32::from(self.current.precision().level())
        } else {
            i32::from(dt.precision().level())
        };
        let top = i32::from(self.current.precision().level()) + self.current.nscales() as i32;
        let mut phase = self.current.epoch_phase(scale_at(level)) + dt.multiplier();
        let mut maximized = false;
        let mut unbounded = false;
        while !maximized && !unbounded {
            let mut carry = 0;
            if phase >= QUANTITY_LIMIT {
                phase -= QUANTITY_LIMIT;
                carry = 1;
            }
            if phase % 1000 != 0 {
                maximized = true;
            } else if phase == 0 && level + 5 >= top {
                unbounded = if self.current.sign() == 1 { carry == 0 } else { carry == 1 };
            }
            if !maximized && !unbounded {
                phase = phase / 1000
                    + (QUANTITY_LIMIT / 1000) * (self.current.scale_phase(scale_at(level + 5)) + carry);
                level += 1;
            }
        }
        let precision = if unbounded { self.default_precision } else { scale_at(level) };
        Phase {
            multiplier: phase,
            precision,
        }
    }

    fn lower_bound(&self, phase: Phase) -> usize {
        self.queue.partition_point(|entry| {
            let precision = scale_at(entry.level().min(phase.level()));
            let entry_dt = self.refined_duration_from_phase(*entry, precision);
            let value_dt = self.refined_duration_from_phase(phase, precision);
            entry_dt < value_dt
        })
    }
}

impl Default for TimeQueue {
    fn default() -> Self {
        Self::new()
    }
}
