//! Memory of past events.
//!
//! A [`TimeCache`] answers "how long ago did event `id` happen?" by planning a
//! retained event almost one full epoch into the future on an inner
//! [`TimeQueue`]: the elapsed duration is the epoch length minus what remains.
//! Records that would be skipped by an advance are evicted first, so the cache
//! forgets events older than an epoch at their precision.

use std::collections::BTreeSet;

use super::duration::{Duration, QUANTITY_LIMIT};
use super::time_point::TimePoint;
use super::time_queue::{EventId, TimeQueue};
use super::{Scale, TimeError, TimeResult};

#[derive(Clone, Debug, Default)]
pub struct TimeCache {
    queue: TimeQueue,
    event_ids: BTreeSet<EventId>,
}

impl TimeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache whose current time is `t0`.
    pub fn with_time(t0: TimePoint) -> Self {
        Self {
            queue: TimeQueue::with_time(t0),
            event_ids: BTreeSet::new(),
        }
    }

    pub fn current_time(&self) -> &TimePoint {
        self.queue.current_time()
    }

    /// Advances by `dt`, evicting records that the advance would skip over.
    pub fn advance_time(&mut self, dt: Duration) -> TimeResult<&TimePoint> {
        while !self.queue.can_advance_by(dt)? {
            for event_id in self.queue.imminent_event_ids()? {
                self.event_ids.remove(event_id);
            }
            self.queue.pop_imminent_events()?;
        }
        self.queue.advance_time_by(dt)
    }

    /// Advances to the time point `t`.
    pub fn advance_time_to(&mut self, t: &TimePoint) -> TimeResult<&TimePoint> {
        if *t < *self.current_time() {
            return Err(TimeError::OutOfRange(
                "Advancement time must be later than current time of time cache".to_string(),
            ));
        }
        while *self.current_time() < *t {
            let dt = t.gap(self.current_time());
            if dt <= Duration::ZERO {
                break;
            }
            self.advance_time(dt)?;
        }
        if self.current_time() != t {
            return Err(TimeError::Logic(
                "Unexpected error occurred while advancing time cache to specified time"
                    .to_string(),
            ));
        }
        Ok(self.current_time())
    }

    /// Elapsed duration since `event_id` was retained, at the precision it was
    /// retained with, or infinity if it is not (or no longer) retained.
    pub fn duration_since(&self, event_id: EventId) -> Duration {
        let until_dt = self.queue.duration_until(event_id);
        if until_dt.finite() {
            Duration::new(QUANTITY_LIMIT - 1 - until_dt.multiplier(), until_dt.precision())
        } else {
            Duration::inf()
        }
    }

    /// Records that `event_id` happens now. Retaining an id again resets it.
    pub fn retain_event(&mut self, event_id: EventId, precision: Scale) -> TimeResult<()> {
        self.queue
            .plan_event(event_id, Duration::new(QUANTITY_LIMIT - 1, precision))?;
        self.event_ids.insert(event_id);
        Ok(())
    }

    /// Forgets `event_id`. Returns whether it was retained.
    pub fn release_event(&mut self, event_id: EventId) -> bool {
        let removed = self.queue.cancel_event(event_id);
        if removed {
            self.event_ids.remove(&event_id);
        }
        removed
    }

    /// Retained ids in ascending order.
    pub fn event_ids(&self) -> &BTreeSet<EventId> {
        &self.event_ids
    }

    pub fn len(&self) -> usize {
        self.event_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.event_ids.is_empty()
    }
}
