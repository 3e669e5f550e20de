//! Multi-precision simulated time.
//!
//! Time values never go through floating point on the scheduling path:
//!
//! - [`Scale`] names a power-of-1000 resolution.
//! - [`Duration`] is an integer multiplier at a scale, plus infinities.
//! - [`TimePoint`] is an absolute instant stored digit-by-digit in base 1000.
//! - [`TimeQueue`] schedules future events by event id.
//! - [`TimeCache`] remembers when past events happened.
//! - [`TimeSequence`] records an increasing series of time points.

pub mod scale;
pub mod duration;
pub mod time_point;
pub mod time_queue;
pub mod time_cache;
pub mod time_sequence;

pub use scale::{
    Scale, ATTO, EXA, FEMTO, GIGA, KILO, MEGA, MICRO, MILLI, NANO, NO_SCALE, PETA, PICO, TERA,
    UNIT, YOCTO, YOTTA, ZEPTO, ZETTA,
};
pub use duration::{Duration, QUANTITY_LIMIT};
pub use time_point::TimePoint;
pub use time_queue::TimeQueue;
pub use time_cache::TimeCache;
pub use time_sequence::TimeSequence;

use thiserror::Error;

/// Errors raised by time arithmetic and the time queue/cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("{0}")]
    Logic(String),

    #[error("Duration {value} cannot be fixed at {precision} precision without loss")]
    PrecisionLoss { value: String, precision: Scale },
}

/// Result type for time operations.
pub type TimeResult<T> = Result<T, TimeError>;
