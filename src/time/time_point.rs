//! Absolute simulated instants.
//!
//! A [`TimePoint`] stores its offset from time zero as a sign plus one base-1000
//! digit per scale level, from the finest non-zero digit upward. Adding a
//! [`Duration`] of any precision is therefore exact, however far apart the
//! scales involved are.

use std::cmp::Ordering;
use std::fmt;

use super::duration::{Duration, QUANTITY_LIMIT};
use super::scale::{Scale, UNIT};
use super::{TimeError, TimeResult};

/// An absolute point in simulated time.
#[derive(Clone, Debug)]
pub struct TimePoint {
    sign: i64,
    precision: i32,
    digits: Vec<i16>,
}

pub(crate) fn scale_at(level: i32) -> Scale {
    Scale::new(level.clamp(i32::from(i8::MIN), i32::from(i8::MAX)) as i8)
}

impl TimePoint {
    /// Time zero.
    pub fn new() -> Self {
        Self {
            sign: 1,
            precision: i32::from(UNIT.level()),
            digits: Vec::new(),
        }
    }

    /// The time point `dt` after time zero.
    pub fn from_duration(dt: Duration) -> TimeResult<Self> {
        let mut tp = Self::new();
        tp.add_duration(dt)?;
        Ok(tp)
    }

    /// Returns `+1` or `-1`.
    pub fn sign(&self) -> i64 {
        self.sign
    }

    /// The scale of the finest non-zero digit.
    pub fn precision(&self) -> Scale {
        scale_at(self.precision)
    }

    /// Number of stored digits.
    pub fn nscales(&self) -> usize {
        self.digits.len()
    }

    /// Returns `true` for time zero.
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    fn top(&self) -> i32 {
        self.precision + self.digits.len() as i32
    }

    fn digit_at(&self, level: i32) -> i64 {
        if level < self.precision || level >= self.top() {
            0
        } else {
            i64::from(self.digits[(level - self.precision) as usize])
        }
    }

    /// The unsigned digit at `precision`.
    pub fn scale_digit(&self, precision: Scale) -> i64 {
        self.digit_at(i32::from(precision.level()))
    }

    fn phase_at(&self, level: i32) -> i64 {
        let mut phase = self.digit_at(level);
        if self.sign == -1 {
            phase = 1000 - phase;
            if self.precision < level {
                phase -= 1;
            } else if phase == 1000 {
                phase = 0;
            }
        }
        phase
    }

    /// The digit at `precision` of the equivalent non-negative representation,
    /// i.e. the position within the enclosing unit of the next coarser scale.
    pub fn scale_phase(&self, precision: Scale) -> i64 {
        self.phase_at(i32::from(precision.level()))
    }

    /// The five digits starting at `precision`, combined into one multiplier:
    /// the position within the current epoch of `1000^5` units.
    pub fn epoch_phase(&self, precision: Scale) -> i64 {
        let level = i32::from(precision.level());
        let mut phase = 0;
        for s in (level..=level + 4).rev() {
            phase = 1000 * phase + self.digit_at(s);
        }
        if self.sign == -1 {
            phase = QUANTITY_LIMIT - phase;
            if self.precision < level {
                phase -= 1;
            } else if phase == QUANTITY_LIMIT {
                phase = 0;
            }
        }
        phase
    }

    /// Adds `dt` exactly.
    pub fn add_duration(&mut self, dt: Duration) -> TimeResult<()> {
        if !dt.valid() {
            return Err(TimeError::InvalidArgument(
                "Adjustment duration must be valid".to_string(),
            ));
        }
        if !dt.finite() {
            return Err(TimeError::OutOfRange(
                "Adjustment duration must be finite".to_string(),
            ));
        }
        if dt != Duration::ZERO {
            let dt = dt.coarsened();
            self.add_ticks(self.sign * dt.multiplier(), i32::from(dt.precision().level()));
        }
        Ok(())
    }

    /// Subtracts `dt` exactly.
    pub fn sub_duration(&mut self, dt: Duration) -> TimeResult<()> {
        self.add_duration(-dt)
    }

    /// Returns the point `dt` after this one.
    pub fn offset(&self, dt: Duration) -> TimeResult<TimePoint> {
        let mut tp = self.clone();
        tp.add_duration(dt)?;
        Ok(tp)
    }

    /// Moves forward by a non-negative `dt`, exactly.
    ///
    /// A zero duration leaves the point unchanged and an infinite one jumps to
    /// `end_t`, which must not lie before this point. Successive calls add up:
    /// advancing by `a` then `b` ends where advancing by `a + b` does.
    pub fn advance(&mut self, dt: Duration, end_t: &TimePoint) -> TimeResult<()> {
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
            if *end_t < *self {
                return Err(TimeError::OutOfRange(
                    "End of horizon must not precede the time point".to_string(),
                ));
            }
            *self = end_t.clone();
            return Ok(());
        }
        self.add_duration(dt)
    }

    /// Moves forward by a non-negative, finite `dt` on `dt`'s grid.
    ///
    /// Digits finer than `dt`'s precision are first truncated toward negative
    /// infinity, so the result is a multiple of `dt`'s precision. This is how
    /// planned durations are measured: a node planning `1_s` at `1.5_s` fires
    /// at `2_s`. A zero duration leaves the point unchanged.
    pub fn advance_on_grid(&mut self, dt: Duration) -> TimeResult<()> {
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
        if dt > Duration::ZERO {
            let dt_level = i32::from(dt.precision().level());
            if self.precision < dt_level {
                if self.sign == -1 {
                    // Step one grid unit further from zero so truncation floors.
                    self.add_ticks(1, dt_level);
                }
                let mut level = dt_level;
                if self.top() > level {
                    while self.digit_at(level) == 0 {
                        level += 1;
                    }
                }
                let erased = ((level - self.precision) as usize).min(self.digits.len());
                self.digits.drain(..erased);
                self.precision = level;
            }
            self.add_duration(dt)?;
        }
        Ok(())
    }

    /// Mixed-radix addition of `ticks` units at `level`, with carries, followed
    /// by renormalization of sign and trailing zeros.
    fn add_ticks(&mut self, ticks: i64, level: i32) {
        if ticks == 0 {
            return;
        }
        if self.digits.is_empty() {
            self.precision = level;
            self.digits.push(0);
        } else {
            if self.precision > level {
                let count = (self.precision - level) as usize;
                self.digits.splice(0..0, std::iter::repeat(0).take(count));
                self.precision = level;
            }
            if self.top() <= level {
                let count = (level - self.top() + 1) as usize;
                self.digits.extend(std::iter::repeat(0).take(count));
            }
        }

        let mut tick_count = ticks;
        let mut i = (level - self.precision) as usize;
        while tick_count != 0 {
            let rest = tick_count / 1000;
            let offset = tick_count - 1000 * rest;
            let sum = i64::from(self.digits[i]) + offset;
            if sum >= 1000 {
                self.digits[i] = (sum - 1000) as i16;
                tick_count = rest + 1;
            } else if sum >= 0 {
                self.digits[i] = sum as i16;
                tick_count = rest;
            } else {
                self.digits[i] = (sum + 1000) as i16;
                tick_count = rest - 1;
            }
            if tick_count != 0 && i + 1 == self.digits.len() {
                self.digits.push(0);
                if tick_count < 0 && tick_count > -1000 {
                    self.digits[i + 1] = tick_count as i16;
                    tick_count = 0;
                }
            }
            i += 1;
        }

        let fine_zeros = self.digits.iter().take_while(|&&d| d == 0).count();
        if fine_zeros > 0 {
            self.precision += fine_zeros as i32;
            self.digits.drain(..fine_zeros);
        }
        if self.digits.is_empty() {
            self.precision = i32::from(UNIT.level());
            self.sign = 1;
            return;
        }
        let last = self.digits.len() - 1;
        if self.digits[last] < 0 {
            // The coarsest digit went negative: complement everything.
            self.digits[last] = -self.digits[last];
            self.sign = -self.sign;
            for i in (1..self.digits.len()).rev() {
                self.digits[i] -= 1;
                self.digits[i - 1] = 1000 - self.digits[i - 1];
            }
        }
        while self.digits.last() == Some(&0) {
            self.digits.pop();
        }
    }

    /// The signed duration from `rhs` to `self`, rounded to the finest
    /// precision that can hold it.
    pub fn gap(&self, rhs: &TimePoint) -> Duration {
        let min_level = self.precision.min(rhs.precision);
        let max_level = self.top().max(rhs.top()) - 1;
        let mut big_dt = Duration::new((self.sign - rhs.sign) / 2, scale_at(max_level + 1));
        let mut precision = min_level;
        let mut s = max_level;
        while precision == min_level && s >= min_level {
            let scale_dt = Duration::new(self.phase_at(s) - rhs.phase_at(s), scale_at(s));
            let next_dt = big_dt + scale_dt;
            if next_dt - big_dt != scale_dt {
                precision = s + 1;
            } else {
                big_dt = next_dt;
            }
            s -= 1;
        }

        let mut small_dt = Duration::ZERO;
        for s in min_level..precision {
            small_dt += Duration::new(self.phase_at(s) - rhs.phase_at(s), scale_at(s));
            let rounded_dt = (small_dt + Duration::ZERO.fixed_at(scale_at(s - 4))).unfixed();
            if rounded_dt.finite() {
                small_dt = rounded_dt;
            }
        }

        if small_dt == Duration::new(500, scale_at(precision - 1)) {
            if big_dt > Duration::ZERO {
                big_dt + Duration::new(1, scale_at(precision))
            } else {
                big_dt
            }
        } else if small_dt == Duration::new(-500, scale_at(precision - 1)) {
            if big_dt < Duration::ZERO {
                big_dt - Duration::new(1, scale_at(precision))
            } else {
                big_dt
            }
        } else {
            big_dt + (small_dt + Duration::ZERO.fixed_at(scale_at(precision))).unfixed()
        }
    }

    fn upper_discrepant_level(&self, rhs: &TimePoint) -> i32 {
        let min_level = self.precision.min(rhs.precision);
        let mut level = self.top().max(rhs.top()) - 1;
        while level >= min_level && self.sign * self.digit_at(level) == rhs.sign * rhs.digit_at(level) {
            level -= 1;
        }
        level
    }
}

impl Default for TimePoint {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Duration> for TimePoint {
    type Error = TimeError;

    fn try_from(dt: Duration) -> Result<Self, Self::Error> {
        Self::from_duration(dt)
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TimePoint {}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        let level = self.upper_discrepant_level(other);
        if level < self.precision.min(other.precision) {
            Ordering::Equal
        } else {
            (self.sign * self.digit_at(level)).cmp(&(other.sign * other.digit_at(level)))
        }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time_point()")?;
        let op = if self.sign == 1 { " + " } else { " - " };
        for s in (self.precision..self.top()).rev() {
            write!(f, "{}{}", op, Duration::new(self.digit_at(s), scale_at(s)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::scale::{KILO, MICRO, MILLI, NANO};

    fn tp(dt: Duration) -> TimePoint {
        TimePoint::from_duration(dt).unwrap()
    }

    #[test]
    fn test_zero_time_point() {
        let t = TimePoint::new();
        assert!(t.is_zero());
        assert_eq!(t.sign(), 1);
        assert_eq!(t.nscales(), 0);
        assert_eq!(t, tp(Duration::ZERO));
        assert_eq!(t.to_string(), "time_point()");
    }

    #[test]
    fn test_digits() {
        let t = tp(Duration::seconds(1) + Duration::millis(250) + Duration::nanos(7));
        assert_eq!(t.precision(), NANO);
        assert_eq!(t.scale_digit(UNIT), 1);
        assert_eq!(t.scale_digit(MILLI), 250);
        assert_eq!(t.scale_digit(MICRO), 0);
        assert_eq!(t.scale_digit(NANO), 7);
        assert_eq!(t.scale_digit(KILO), 0);
        assert_eq!(t.to_string(), "time_point() + 1_s + 250_ms + 0_us + 7_ns");
    }

    #[test]
    fn test_carry_and_sign_flip() {
        let mut t = tp(Duration::millis(999));
        t.add_duration(Duration::millis(2)).unwrap();
        assert_eq!(t, tp(Duration::millis(1001)));

        let mut t = tp(Duration::seconds(1));
        t.sub_duration(Duration::millis(1500)).unwrap();
        assert_eq!(t.sign(), -1);
        assert_eq!(t, tp(Duration::millis(-500)));
        assert_eq!(t.scale_digit(MILLI), 500);
        assert_eq!(t.scale_phase(MILLI), 500);
        assert_eq!(t.scale_phase(UNIT), 999);

        t.add_duration(Duration::millis(500)).unwrap();
        assert!(t.is_zero());
        assert_eq!(t.sign(), 1);
    }

    #[test]
    fn test_epoch_phase() {
        let t = tp(Duration::seconds(1_002_003_004_005));
        assert_eq!(t.epoch_phase(UNIT), 1_002_003_004_005);
        assert_eq!(t.epoch_phase(KILO), 1_002_003_004);
        let neg = tp(Duration::seconds(-3));
        assert_eq!(neg.epoch_phase(UNIT), QUANTITY_LIMIT - 3);
    }

    #[test]
    fn test_advance_on_grid_truncates_fine_digits() {
        let mut t = tp(Duration::seconds(3) + Duration::millis(700));
        t.advance_on_grid(Duration::seconds(2)).unwrap();
        assert_eq!(t, tp(Duration::seconds(5)));

        let mut t = tp(Duration::millis(-500));
        t.advance_on_grid(Duration::seconds(1)).unwrap();
        assert!(t.is_zero());

        let mut t = tp(Duration::seconds(3));
        t.advance_on_grid(Duration::ZERO).unwrap();
        assert_eq!(t, tp(Duration::seconds(3)));
    }

    #[test]
    fn test_advance_on_grid_rejects_bad_durations() {
        let mut t = TimePoint::new();
        assert!(matches!(t.advance_on_grid(Duration::invalid()), Err(TimeError::InvalidArgument(_))));
        assert!(matches!(t.advance_on_grid(Duration::seconds(-1)), Err(TimeError::OutOfRange(_))));
        assert!(matches!(t.advance_on_grid(Duration::inf()), Err(TimeError::OutOfRange(_))));
    }

    #[test]
    fn test_advance_keeps_fine_digits() {
        let end_t = tp(Duration::years(1));
        let mut t = tp(Duration::seconds(3) + Duration::millis(700));
        t.advance(Duration::seconds(2), &end_t).unwrap();
        assert_eq!(t, tp(Duration::millis(5700)));

        t.advance(Duration::ZERO, &end_t).unwrap();
        assert_eq!(t, tp(Duration::millis(5700)));
    }

    #[test]
    fn test_advance_steps_add_up() {
        let end_t = tp(Duration::years(1));
        let steps = [
            Duration::millis(1),
            Duration::seconds(1),
            Duration::micros(250),
            Duration::minutes(2),
            Duration::nanos(7),
        ];
        let mut stepped = TimePoint::new();
        let mut total = Duration::ZERO;
        for dt in steps {
            stepped.advance(dt, &end_t).unwrap();
            total = total + dt;
        }
        let mut once = TimePoint::new();
        once.advance(total, &end_t).unwrap();
        assert_eq!(stepped, once);
    }

    #[test]
    fn test_advance_by_infinity_jumps_to_end() {
        let end_t = tp(Duration::seconds(30));
        let mut t = tp(Duration::millis(1250));
        t.advance(Duration::inf(), &end_t).unwrap();
        assert_eq!(t, end_t);

        let mut late = tp(Duration::seconds(31));
        assert!(matches!(late.advance(Duration::inf(), &end_t), Err(TimeError::OutOfRange(_))));
    }

    #[test]
    fn test_advance_rejects_bad_durations() {
        let end_t = tp(Duration::seconds(30));
        let mut t = TimePoint::new();
        assert!(matches!(t.advance(Duration::invalid(), &end_t), Err(TimeError::InvalidArgument(_))));
        assert!(matches!(t.advance(Duration::seconds(-1), &end_t), Err(TimeError::OutOfRange(_))));
    }

    #[test]
    fn test_ordering() {
        let a = tp(Duration::millis(1500));
        let b = tp(Duration::seconds(2));
        let c = tp(Duration::millis(-1));
        assert!(a < b);
        assert!(c < TimePoint::new());
        assert!(c < a);
        assert_eq!(tp(Duration::millis(2000)), b);
    }

    #[test]
    fn test_gap() {
        let a = tp(Duration::seconds(5) + Duration::nanos(3));
        let b = tp(Duration::seconds(2));
        assert_eq!(a.gap(&b), Duration::seconds(3) + Duration::nanos(3));
        assert_eq!(b.gap(&a), -(Duration::seconds(3) + Duration::nanos(3)));
        assert_eq!(a.gap(&a), Duration::ZERO);

        let far = tp(Duration::kiloseconds(999_999_999_999) + Duration::kiloseconds(999_999_999_999));
        let near = tp(Duration::new(1, crate::time::scale::YOCTO));
        let dt = far.gap(&near);
        assert!(dt.finite());
        assert_eq!(dt, Duration::kiloseconds(1_999_999_999_998));
    }
}
