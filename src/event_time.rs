//! Simulated time with a sub-step counter.
//!
//! A [`DiscreteEventTime`] pairs the current [`TimePoint`] with two counters:
//! `t_index` counts how many times simulated time has moved forward, and `c`
//! counts events processed at the current instant. Together they give every
//! event a unique, totally ordered stamp even when many events share the same
//! simulated time.

use crate::time::{Duration, TimePoint, TimeResult};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscreteEventTime {
    t: TimePoint,
    t_index: i64,
    c: i64,
}

impl DiscreteEventTime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts at time `t` with both counters at zero.
    pub fn with_time(t: TimePoint) -> Self {
        Self { t, t_index: 0, c: 0 }
    }

    pub fn t(&self) -> &TimePoint {
        &self.t
    }

    pub fn t_index(&self) -> i64 {
        self.t_index
    }

    pub fn c(&self) -> i64 {
        self.c
    }

    /// Moves to the next event at the same instant.
    pub fn advance(&mut self) -> &TimePoint {
        self.c += 1;
        &self.t
    }

    /// Moves forward by `dt`, never past `end_t`.
    ///
    /// A zero `dt` only counts another event at the same instant. Otherwise
    /// time moves (an infinite `dt` jumps straight to `end_t`), `t_index`
    /// increments and `c` restarts at zero.
    ///
    /// # Example
    ///
    /// ```rust
    /// use jikoku::event_time::DiscreteEventTime;
    /// use jikoku::time::{Duration, TimePoint};
    ///
    /// let end_t = TimePoint::from_duration(Duration::seconds(10)).unwrap();
    /// let mut et = DiscreteEventTime::new();
    /// et.advance_by(Duration::ZERO, &end_t).unwrap();
    /// assert_eq!((et.t_index(), et.c()), (0, 1));
    /// et.advance_by(Duration::seconds(4), &end_t).unwrap();
    /// assert_eq!((et.t_index(), et.c()), (1, 0));
    /// et.advance_by(Duration::inf(), &end_t).unwrap();
    /// assert_eq!(et.t(), &end_t);
    /// ```
    pub fn advance_by(&mut self, dt: Duration, end_t: &TimePoint) -> TimeResult<&TimePoint> {
        if dt == Duration::ZERO {
            self.c += 1;
            return Ok(&self.t);
        }
        if dt.finite() {
            self.t.advance_on_grid(dt)?;
            if self.t > *end_t {
                self.t = end_t.clone();
            }
        } else {
            self.t = end_t.clone();
        }
        self.t_index += 1;
        self.c = 0;
        Ok(&self.t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeError;

    fn point(dt: Duration) -> TimePoint {
        TimePoint::from_duration(dt).unwrap()
    }

    #[test]
    fn test_zero_duration_counts_substeps() {
        let end_t = point(Duration::seconds(60));
        let mut et = DiscreteEventTime::new();
        et.advance();
        et.advance_by(Duration::ZERO, &end_t).unwrap();
        assert_eq!(et.c(), 2);
        assert_eq!(et.t_index(), 0);
        assert!(et.t().is_zero());
    }

    #[test]
    fn test_positive_duration_moves_time() {
        let end_t = point(Duration::seconds(60));
        let mut et = DiscreteEventTime::new();
        et.advance();
        et.advance_by(Duration::millis(1500), &end_t).unwrap();
        assert_eq!(et.t(), &point(Duration::millis(1500)));
        assert_eq!(et.t_index(), 1);
        assert_eq!(et.c(), 0);
    }

    #[test]
    fn test_clamped_to_end_time() {
        let end_t = point(Duration::seconds(3));
        let mut et = DiscreteEventTime::new();
        et.advance_by(Duration::seconds(5), &end_t).unwrap();
        assert_eq!(et.t(), &end_t);
        et.advance_by(Duration::inf(), &end_t).unwrap();
        assert_eq!(et.t(), &end_t);
        assert_eq!(et.t_index(), 2);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let end_t = point(Duration::seconds(3));
        let mut et = DiscreteEventTime::new();
        let err = et.advance_by(Duration::seconds(-1), &end_t).unwrap_err();
        assert!(matches!(err, TimeError::OutOfRange(_)));
    }
}
