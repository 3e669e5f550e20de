//! Power-of-1000 time scales.
//!
//! A [`Scale`] identifies the resolution of a time value: level `0` is one
//! second, level `-1` one millisecond, level `1` one kilosecond, and so on.
//! The sentinel [`NO_SCALE`] marks nodes whose events are not time-typed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Neg, Sub};

/// A compact signed exponent of 1000.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scale(i8);

/// Sentinel scale for nodes without a time precision (pure dataflow nodes).
pub const NO_SCALE: Scale = Scale(i8::MAX);

pub const YOCTO: Scale = Scale(-8);
pub const ZEPTO: Scale = Scale(-7);
pub const ATTO: Scale = Scale(-6);
pub const FEMTO: Scale = Scale(-5);
pub const PICO: Scale = Scale(-4);
pub const NANO: Scale = Scale(-3);
pub const MICRO: Scale = Scale(-2);
pub const MILLI: Scale = Scale(-1);
pub const UNIT: Scale = Scale(0);
pub const KILO: Scale = Scale(1);
pub const MEGA: Scale = Scale(2);
pub const GIGA: Scale = Scale(3);
pub const TERA: Scale = Scale(4);
pub const PETA: Scale = Scale(5);
pub const EXA: Scale = Scale(6);
pub const ZETTA: Scale = Scale(7);
pub const YOTTA: Scale = Scale(8);

const SYMBOLS: [&str; 17] = [
    "y", "z", "a", "f", "p", "n", "u", "m", "", "k", "M", "G", "T", "P", "E", "Z", "Y",
];

const NAMES: [&str; 17] = [
    "yocto", "zepto", "atto", "femto", "pico", "nano", "micro", "milli", "unit", "kilo", "mega",
    "giga", "tera", "peta", "exa", "zetta", "yotta",
];

impl Scale {
    /// Creates a scale with the given level.
    pub const fn new(level: i8) -> Self {
        Self(level)
    }

    /// Returns the level integer.
    pub const fn level(self) -> i8 {
        self.0
    }

    /// Returns `true` if the scale lies within `YOCTO..=YOTTA`.
    pub const fn is_named(self) -> bool {
        self.0 >= YOCTO.0 && self.0 <= YOTTA.0
    }

    /// Returns the SI prefix symbol (`"m"` for milli, `""` for unit), or `None`
    /// outside the named range.
    pub fn symbol(self) -> Option<&'static str> {
        self.table_index().map(|i| SYMBOLS[i])
    }

    /// Returns the SI prefix name (`"milli"`, `"unit"`, ...), or `None` outside
    /// the named range.
    pub fn name(self) -> Option<&'static str> {
        self.table_index().map(|i| NAMES[i])
    }

    /// Returns 1000 raised to the level, as a float.
    pub fn approx(self) -> f64 {
        1000f64.powi(i32::from(self.0))
    }

    /// Returns the factor `1000^(self - rhs)` as a float.
    pub fn ratio(self, rhs: Scale) -> f64 {
        1000f64.powi(i32::from(self.0) - i32::from(rhs.0))
    }

    fn table_index(self) -> Option<usize> {
        if self.is_named() {
            Some((self.0 - YOCTO.0) as usize)
        } else {
            None
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        UNIT
    }
}

impl Add<i8> for Scale {
    type Output = Scale;

    fn add(self, rhs: i8) -> Scale {
        Scale(self.0 + rhs)
    }
}

impl Sub<i8> for Scale {
    type Output = Scale;

    fn sub(self, rhs: i8) -> Scale {
        Scale(self.0 - rhs)
    }
}

impl Sub<Scale> for Scale {
    type Output = i32;

    fn sub(self, rhs: Scale) -> i32 {
        i32::from(self.0) - i32::from(rhs.0)
    }
}

impl Neg for Scale {
    type Output = Scale;

    fn neg(self) -> Scale {
        Scale(-self.0)
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NO_SCALE {
            return write!(f, "no_scale");
        }
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "scale({})", self.0),
        }
    }
}
