//! Fixed-point durations.
//!
//! A [`Duration`] is an integer multiplier paired with a [`Scale`]. Its value
//! in seconds is `multiplier * 1000^level`. Magnitudes at or above
//! [`QUANTITY_LIMIT`] are infinite, and an explicit invalid value stands in for
//! "unset".
//!
//! Arithmetic between durations of different precision is exact: the result
//! lives at the finer of the two precisions and is only coarsened when its
//! multiplier would otherwise reach the limit. A *fixed* duration keeps its
//! precision through arithmetic and rounds other operands to it instead.
//!
//! # Example
//!
//! ```rust
//! use jikoku::time::{Duration, MILLI};
//!
//! let dt = Duration::seconds(1) + Duration::millis(250);
//! assert_eq!(dt.precision(), MILLI);
//! assert_eq!(dt.multiplier(), 1250);
//! assert_eq!(dt.to_string(), "1250_ms");
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use super::scale::{Scale, UNIT};
use super::{TimeError, TimeResult};

/// The smallest multiplier magnitude treated as infinite.
pub const QUANTITY_LIMIT: i64 = 1_000_000_000_000_000;

const INVALID_MULTIPLIER: i64 = i64::MIN;
const INF_MULTIPLIER: i64 = i64::MAX;
const LIMIT: i128 = QUANTITY_LIMIT as i128;

/// Largest power of 1000 that can scale any finite multiplier inside an `i128`.
const MAX_EXACT_SHIFT: u32 = 7;

/// A time interval with an integer multiplier and a power-of-1000 precision.
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Duration {
    multiplier: i64,
    precision: Scale,
    fixed: bool,
}

impl Duration {
    /// Zero seconds.
    pub const ZERO: Duration = Duration {
        multiplier: 0,
        precision: UNIT,
        fixed: false,
    };

    /// Creates a duration of `multiplier` units of `precision`.
    ///
    /// Multipliers whose magnitude reaches [`QUANTITY_LIMIT`] produce an
    /// infinite duration.
    pub fn new(multiplier: i64, precision: Scale) -> Self {
        Self::from_parts(multiplier, precision, false)
    }

    /// Creates a fixed duration, which keeps its precision through arithmetic.
    pub fn new_fixed(multiplier: i64, precision: Scale) -> Self {
        Self::from_parts(multiplier, precision, true)
    }

    /// The invalid ("unset") duration.
    pub const fn invalid() -> Self {
        Self {
            multiplier: INVALID_MULTIPLIER,
            precision: UNIT,
            fixed: false,
        }
    }

    /// Positive infinity.
    pub const fn inf() -> Self {
        Self {
            multiplier: INF_MULTIPLIER,
            precision: UNIT,
            fixed: false,
        }
    }

    /// The largest finite duration at the given precision.
    pub fn max(precision: Scale) -> Self {
        Self::new(QUANTITY_LIMIT - 1, precision)
    }

    pub fn seconds(n: i64) -> Self {
        Self::new(n, UNIT)
    }

    pub fn millis(n: i64) -> Self {
        Self::new(n, super::scale::MILLI)
    }

    pub fn micros(n: i64) -> Self {
        Self::new(n, super::scale::MICRO)
    }

    pub fn nanos(n: i64) -> Self {
        Self::new(n, super::scale::NANO)
    }

    pub fn picos(n: i64) -> Self {
        Self::new(n, super::scale::PICO)
    }

    pub fn femtos(n: i64) -> Self {
        Self::new(n, super::scale::FEMTO)
    }

    pub fn kiloseconds(n: i64) -> Self {
        Self::new(n, super::scale::KILO)
    }

    /// `n` minutes, expressed in seconds.
    pub fn minutes(n: i64) -> Self {
        Self::seconds(n.saturating_mul(60))
    }

    /// `n` hours, expressed in seconds.
    pub fn hours(n: i64) -> Self {
        Self::seconds(n.saturating_mul(60 * 60))
    }

    /// `n` days, expressed in seconds.
    pub fn days(n: i64) -> Self {
        Self::seconds(n.saturating_mul(60 * 60 * 24))
    }

    /// `n` 365-day years, expressed in seconds.
    pub fn years(n: i64) -> Self {
        Self::seconds(n.saturating_mul(60 * 60 * 24 * 365))
    }

    fn from_parts(multiplier: i64, precision: Scale, fixed: bool) -> Self {
        if multiplier == INVALID_MULTIPLIER {
            Self::invalid()
        } else if multiplier >= QUANTITY_LIMIT {
            Self {
                multiplier: INF_MULTIPLIER,
                precision: UNIT,
                fixed,
            }
        } else if multiplier <= -QUANTITY_LIMIT {
            Self {
                multiplier: -INF_MULTIPLIER,
                precision: UNIT,
                fixed,
            }
        } else {
            Self {
                multiplier,
                precision,
                fixed,
            }
        }
    }

    /// Builds a duration from an exact value, saturating to infinity.
    fn rounded_value(value: i128, precision: Scale, fixed: bool) -> Self {
        if value >= LIMIT {
            Self::from_parts(QUANTITY_LIMIT, precision, fixed)
        } else if value <= -LIMIT {
            Self::from_parts(-QUANTITY_LIMIT, precision, fixed)
        } else {
            Self::from_parts(value as i64, precision, fixed)
        }
    }

    /// Builds an unfixed duration from an exact value, coarsening the
    /// precision until the multiplier fits below the limit.
    fn autoscaled_value(mut value: i128, mut precision: Scale) -> Self {
        while value.abs() >= LIMIT {
            if precision.level() >= i8::MAX - 1 {
                return Self::rounded_value(value, precision, false);
            }
            value = div_round(value, 1000);
            precision = precision + 1;
        }
        Self::from_parts(value as i64, precision, false)
    }

    /// Builds a duration from a floating-point multiplier, refining or
    /// coarsening the precision so the result is as exact as the limit allows.
    fn scaled_float(multiplier: f64, precision: Scale, fixed: bool) -> Self {
        if multiplier.is_nan() {
            return Self::invalid();
        }
        if fixed {
            return Self::rounded_float(multiplier, precision, true);
        }
        let limit = QUANTITY_LIMIT as f64;
        let mut x = multiplier;
        let mut p = precision;
        loop {
            if x.is_infinite() {
                return Self::rounded_float(x, p, false);
            }
            if x.abs() + 0.5 >= limit {
                if p.level() >= i8::MAX - 1 {
                    return Self::rounded_float(x, p, false);
                }
                x *= 0.001;
                p = p + 1;
            } else if 1000.0 * x.abs() + 0.5 >= limit || x == x.trunc() || p.level() <= i8::MIN + 1 {
                return Self::rounded_float(x, p, false);
            } else {
                x *= 1000.0;
                p = p - 1;
            }
        }
    }

    fn rounded_float(x: f64, precision: Scale, fixed: bool) -> Self {
        let limit = QUANTITY_LIMIT as f64;
        if x + 0.5 >= limit {
            Self::from_parts(QUANTITY_LIMIT, precision, fixed)
        } else if x - 0.5 <= -limit {
            Self::from_parts(-QUANTITY_LIMIT, precision, fixed)
        } else {
            Self::from_parts(x.round() as i64, precision, fixed)
        }
    }

    /// Returns `false` for the invalid duration.
    pub fn valid(&self) -> bool {
        self.multiplier != INVALID_MULTIPLIER
    }

    /// Returns `true` for valid, non-infinite durations.
    pub fn finite(&self) -> bool {
        self.valid() && self.multiplier != INF_MULTIPLIER && self.multiplier != -INF_MULTIPLIER
    }

    /// Returns `true` for positive or negative infinity.
    pub fn is_infinite(&self) -> bool {
        self.valid() && !self.finite()
    }

    /// Returns the multiplier; `i64::MAX`/`-i64::MAX` for infinities and
    /// `i64::MIN` for the invalid duration.
    pub fn multiplier(&self) -> i64 {
        self.multiplier
    }

    pub fn precision(&self) -> Scale {
        self.precision
    }

    pub fn fixed(&self) -> bool {
        self.fixed
    }

    fn is_negative(&self) -> bool {
        self.valid() && self.multiplier < 0
    }

    /// Rescales to `precision` (rounding to nearest) and marks the result fixed.
    pub fn fixed_at(&self, precision: Scale) -> Self {
        self.rescaled_as(precision, true)
    }

    /// Like [`fixed_at`](Self::fixed_at), but fails instead of rounding away
    /// non-zero low-order digits.
    pub fn try_fixed_at(&self, precision: Scale) -> TimeResult<Self> {
        let result = self.fixed_at(precision);
        if self.finite() && result != *self {
            return Err(TimeError::PrecisionLoss {
                value: self.to_string(),
                precision,
            });
        }
        Ok(result)
    }

    /// Rescales to `precision`, rounding to nearest and keeping the fixed flag.
    pub fn rescaled(&self, precision: Scale) -> Self {
        self.rescaled_as(precision, self.fixed)
    }

    fn rescaled_as(&self, precision: Scale, fixed: bool) -> Self {
        if !self.valid() {
            return Self::invalid();
        }
        if !self.finite() {
            return Self { fixed, ..*self };
        }
        match rescale_value(self.multiplier, self.precision, precision) {
            Some(value) => Self::rounded_value(value, precision, fixed),
            None => Self::from_parts(
                if self.multiplier > 0 { QUANTITY_LIMIT } else { -QUANTITY_LIMIT },
                precision,
                fixed,
            ),
        }
    }

    /// Moves to the finest precision that still keeps the multiplier below the
    /// limit. The result is unfixed.
    pub fn refined(&self) -> Self {
        if !self.valid() {
            return Self::invalid();
        }
        if !self.finite() {
            return *self;
        }
        if self.multiplier == 0 {
            return Self::ZERO;
        }
        let mut value = self.multiplier as i128;
        let mut precision = self.precision;
        while (value * 1000).abs() < LIMIT && precision.level() > i8::MIN + 1 {
            value *= 1000;
            precision = precision - 1;
        }
        Self::from_parts(value as i64, precision, false)
    }

    /// Moves to the coarsest precision that represents the value exactly. The
    /// result is unfixed.
    pub fn coarsened(&self) -> Self {
        if !self.valid() {
            return Self::invalid();
        }
        if !self.finite() {
            return *self;
        }
        if self.multiplier == 0 {
            return Self::ZERO;
        }
        let mut multiplier = self.multiplier;
        let mut precision = self.precision;
        while multiplier % 1000 == 0 && precision.level() < i8::MAX - 1 {
            multiplier /= 1000;
            precision = precision + 1;
        }
        Self::from_parts(multiplier, precision, false)
    }

    /// Returns a copy with the fixed flag cleared.
    pub fn unfixed(&self) -> Self {
        Self {
            fixed: false,
            ..*self
        }
    }

    /// Absolute value.
    pub fn abs(&self) -> Self {
        if self.is_negative() {
            -*self
        } else {
            *self
        }
    }

    /// Approximate value in seconds.
    pub fn approx_seconds(&self) -> f64 {
        if !self.valid() {
            f64::NAN
        } else if self.multiplier == INF_MULTIPLIER {
            f64::INFINITY
        } else if self.multiplier == -INF_MULTIPLIER {
            f64::NEG_INFINITY
        } else {
            self.multiplier as f64 * self.precision.approx()
        }
    }

    fn combine(self, rhs: Duration) -> Duration {
        if !self.valid() || !rhs.valid() {
            return Self::invalid();
        }
        let fixed = self.fixed || rhs.fixed;
        match (self.finite(), rhs.finite()) {
            (false, false) => {
                if self.multiplier == rhs.multiplier {
                    Self { fixed, ..self }
                } else {
                    Self::invalid()
                }
            }
            (false, true) => Self { fixed, ..self },
            (true, false) => Self { fixed, ..rhs },
            (true, true) => {
                if self.fixed && rhs.fixed {
                    if self.precision == rhs.precision {
                        let value = self.multiplier as i128 + rhs.multiplier as i128;
                        Self::rounded_value(value, self.precision, true)
                    } else {
                        Self::invalid()
                    }
                } else if self.fixed {
                    self.fixed_sum(rhs)
                } else if rhs.fixed {
                    rhs.fixed_sum(self)
                } else {
                    let (value, precision) =
                        exact_sum(self.multiplier, self.precision, rhs.multiplier, rhs.precision);
                    Self::autoscaled_value(value, precision)
                }
            }
        }
    }

    /// Adds `other` rounded to this (fixed) duration's precision.
    fn fixed_sum(self, other: Duration) -> Duration {
        match rescale_value(other.multiplier, other.precision, self.precision) {
            Some(value) => {
                Self::rounded_value(self.multiplier as i128 + value, self.precision, true)
            }
            None => Self::from_parts(
                if other.multiplier > 0 { QUANTITY_LIMIT } else { -QUANTITY_LIMIT },
                self.precision,
                true,
            ),
        }
    }
}

/// `1000^k` for `k <= 12`.
fn pow1000(k: u32) -> i128 {
    1000i128.pow(k)
}

/// Integer division rounding half away from zero.
fn div_round(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    let remainder = value % divisor;
    if 2 * remainder.abs() >= divisor {
        quotient + value.signum()
    } else {
        quotient
    }
}

/// Converts a multiplier between precisions, rounding to nearest. Returns
/// `None` when the converted magnitude exceeds anything a duration can hold.
fn rescale_value(multiplier: i64, from: Scale, to: Scale) -> Option<i128> {
    let shift = from - to;
    if shift >= 0 {
        let k = shift as u32;
        if multiplier == 0 {
            Some(0)
        } else if k > MAX_EXACT_SHIFT {
            None
        } else {
            Some(multiplier as i128 * pow1000(k))
        }
    } else {
        let k = (-shift) as u32;
        if k > 12 {
            Some(0)
        } else {
            Some(div_round(multiplier as i128, pow1000(k)))
        }
    }
}

/// Exact sum of two finite multipliers, expressed at the finer precision
/// whenever that fits in an `i128`.
fn exact_sum(m1: i64, p1: Scale, m2: i64, p2: Scale) -> (i128, Scale) {
    let (mc, pc, mf, pf) = if p1 >= p2 { (m1, p1, m2, p2) } else { (m2, p2, m1, p1) };
    let k = (pc - pf) as u32;
    if mc == 0 {
        (mf as i128, pf)
    } else if k <= MAX_EXACT_SHIFT {
        (mc as i128 * pow1000(k) + mf as i128, pf)
    } else {
        // The coarse term alone overflows the limit at the finer precision,
        // so the result is coarsened anyway.
        let j = k - MAX_EXACT_SHIFT;
        let fine = if j > 12 { 0 } else { div_round(mf as i128, pow1000(j)) };
        (
            mc as i128 * pow1000(MAX_EXACT_SHIFT) + fine,
            pc - MAX_EXACT_SHIFT as i8,
        )
    }
}

fn cmp_finite(m1: i64, p1: Scale, m2: i64, p2: Scale) -> Ordering {
    if p1 == p2 {
        return m1.cmp(&m2);
    }
    let coarse_first = p1 > p2;
    let (mc, mf, k) = if coarse_first {
        (m1, m2, (p1 - p2) as u32)
    } else {
        (m2, m1, (p2 - p1) as u32)
    };
    let ordering = if k <= MAX_EXACT_SHIFT {
        (mc as i128 * pow1000(k)).cmp(&(mf as i128))
    } else if mc == 0 {
        0.cmp(&mf)
    } else if mc > 0 {
        Ordering::Greater
    } else {
        Ordering::Less
    };
    if coarse_first {
        ordering
    } else {
        ordering.reverse()
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.partial_cmp(other) == Some(Ordering::Equal)
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.valid() || !other.valid() {
            return None;
        }
        let ordering = match (self.finite(), other.finite()) {
            (true, true) => cmp_finite(
                self.multiplier,
                self.precision,
                other.multiplier,
                other.precision,
            ),
            _ => {
                // At least one side is infinite; rank finite values as 0.
                let lhs = if self.finite() { 0 } else { self.multiplier.signum() };
                let rhs = if other.finite() { 0 } else { other.multiplier.signum() };
                lhs.cmp(&rhs)
            }
        };
        Some(ordering)
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Duration {
        if !self.valid() {
            return self;
        }
        Duration {
            multiplier: -self.multiplier,
            ..self
        }
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        self.combine(rhs)
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Duration {
        self.combine(-rhs)
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for Duration {
    type Output = Duration;

    /// Scales by a float, rounding to the nearest representable multiplier.
    fn mul(self, rhs: f64) -> Duration {
        if !self.valid() || rhs.is_nan() {
            return Duration::invalid();
        }
        if !self.finite() {
            return if rhs > 0.0 {
                self
            } else if rhs < 0.0 {
                -self
            } else {
                Duration::invalid()
            };
        }
        Duration::scaled_float(self.multiplier as f64 * rhs, self.precision, self.fixed)
    }
}

impl Div<f64> for Duration {
    type Output = Duration;

    fn div(self, rhs: f64) -> Duration {
        if !self.valid() || rhs.is_nan() {
            return Duration::invalid();
        }
        if !self.finite() {
            return self * rhs.signum();
        }
        Duration::scaled_float(self.multiplier as f64 / rhs, self.precision, self.fixed)
    }
}

impl Mul<i64> for Duration {
    type Output = Duration;

    fn mul(self, rhs: i64) -> Duration {
        if !self.valid() {
            return self;
        }
        if !self.finite() {
            return match rhs.signum() {
                1 => self,
                -1 => -self,
                _ => Duration::invalid(),
            };
        }
        let value = self.multiplier as i128 * rhs as i128;
        if self.fixed {
            Duration::rounded_value(value, self.precision, true)
        } else {
            Duration::autoscaled_value(value, self.precision)
        }
    }
}

impl Div<i64> for Duration {
    type Output = Duration;

    /// Divides by an integer, rounding to nearest. Unfixed durations are
    /// refined first so the quotient keeps as many digits as possible.
    fn div(self, rhs: i64) -> Duration {
        if !self.valid() || rhs == 0 {
            return Duration::invalid();
        }
        if !self.finite() {
            return if rhs > 0 { self } else { -self };
        }
        let base = if self.fixed { self } else { self.refined() };
        let value = div_round(base.multiplier as i128 * rhs.signum() as i128, rhs.abs() as i128);
        if self.fixed {
            Duration::rounded_value(value, base.precision, true)
        } else {
            Duration::autoscaled_value(value, base.precision)
        }
    }
}

impl MulAssign<f64> for Duration {
    fn mul_assign(&mut self, rhs: f64) {
        *self = *self * rhs;
    }
}

impl Div for Duration {
    type Output = f64;

    /// Ratio between two durations.
    fn div(self, rhs: Duration) -> f64 {
        if self.finite() && rhs.finite() {
            (self.multiplier as f64 / rhs.multiplier as f64) * self.precision.ratio(rhs.precision)
        } else {
            self.approx_seconds() / rhs.approx_seconds()
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.valid() {
            write!(f, "duration()")
        } else if !self.finite() {
            let sign = if self.multiplier < 0 { "-" } else { "" };
            write!(f, "{}duration::inf()", sign)
        } else {
            match self.precision.symbol() {
                Some(symbol) => write!(f, "{}_{}s", self.multiplier, symbol),
                None => write!(f, "duration({}, {})", self.multiplier, self.precision),
            }
        }
    }
}

impl fmt::Debug for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)?;
        if self.fixed {
            write!(f, " (fixed)")?;
        }
        Ok(())
    }
}

impl FromStr for Duration {
    type Err = TimeError;

    /// Parses the `Display` form (`"5_s"`, `"250_ms"`, `"duration::inf()"`),
    /// plus `"inf"`, `"min"`/`"hr"`/`"day"`/`"yr"` suffixes.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        match text {
            "duration()" => return Ok(Duration::invalid()),
            "inf" | "duration::inf()" => return Ok(Duration::inf()),
            "-inf" | "-duration::inf()" => return Ok(-Duration::inf()),
            _ => {}
        }
        let parse_error = || TimeError::InvalidArgument(format!("Invalid duration literal: {}", s));
        let (number, suffix) = text.split_once('_').ok_or_else(parse_error)?;
        let n: i64 = number.parse().map_err(|_| parse_error())?;
        let duration = match suffix {
            "min" => Duration::minutes(n),
            "hr" => Duration::hours(n),
            "day" => Duration::days(n),
            "yr" => Duration::years(n),
            _ => {
                let symbol = suffix.strip_suffix('s').ok_or_else(parse_error)?;
                let level = (-8i8..=8)
                    .map(Scale::new)
                    .find(|scale| scale.symbol() == Some(symbol))
                    .ok_or_else(parse_error)?;
                Duration::new(n, level)
            }
        };
        Ok(duration)
    }
}

impl TryFrom<String> for Duration {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Duration> for String {
    fn from(value: Duration) -> Self {
        value.to_string()
    }
}
