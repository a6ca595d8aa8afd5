#[cfg(test)]
#[macro_use]
extern crate approx;
use bincode::{Decode, Encode};
use quanta::{Clock, Instant, Mock};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

/// Nanoseconds, used both for stamps and for timeouts. Unsigned, so neither can be negative.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Default,
    Encode,
    Decode,
)]
pub struct TfDuration(pub u64);

impl TfDuration {
    pub const ZERO: TfDuration = TfDuration(0);

    #[inline]
    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_secs(secs: u64) -> Self {
        TfDuration(secs.saturating_mul(1_000_000_000))
    }

    #[inline]
    pub fn from_millis(millis: u64) -> Self {
        TfDuration(millis.saturating_mul(1_000_000))
    }

    /// Negative or non finite inputs clamp to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if !secs.is_finite() || secs <= 0.0 {
            return TfDuration(0);
        }
        TfDuration((secs * 1e9).round() as u64)
    }

    #[inline]
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1e9
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        TfDuration(self.0.saturating_sub(rhs.0))
    }

    #[inline]
    pub fn saturating_add(self, rhs: Self) -> Self {
        TfDuration(self.0.saturating_add(rhs.0))
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl From<Duration> for TfDuration {
    fn from(duration: Duration) -> Self {
        TfDuration(u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl From<TfDuration> for Duration {
    fn from(duration: TfDuration) -> Self {
        Duration::from_nanos(duration.0)
    }
}

impl From<u64> for TfDuration {
    fn from(duration: u64) -> Self {
        TfDuration(duration)
    }
}

impl From<TfDuration> for u64 {
    fn from(duration: TfDuration) -> Self {
        duration.0
    }
}

const UNITS: [(u64, &str); 6] = [
    (86_400_000_000_000, "d"),
    (3_600_000_000_000, "h"),
    (60_000_000_000, "m"),
    (1_000_000_000, "s"),
    (1_000_000, "ms"),
    (1_000, "µs"),
];

/// Picks the largest unit the duration reaches, `1.500 s`, `250.000 ms`, `42 ns`.
impl Display for TfDuration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match UNITS.iter().find(|(scale, _)| self.0 >= *scale) {
            Some((scale, unit)) => write!(f, "{:.3} {unit}", self.0 as f64 / *scale as f64),
            None => write!(f, "{} ns", self.0),
        }
    }
}

/// A transform time is just a duration from a fixed point in time chosen by the publishers.
pub type TfTime = TfDuration;

/// The time at which a lookup should be evaluated.
///
/// `Latest` asks for the most recent data available. It is deliberately not encoded as a zero
/// time so that a genuine zero stamp stays addressable.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, Encode, Decode,
)]
pub enum TfStamp {
    #[default]
    Latest,
    At(TfTime),
}

impl TfStamp {
    #[inline]
    pub fn at(time: impl Into<TfTime>) -> Self {
        TfStamp::At(time.into())
    }

    /// The explicit time, if any.
    #[inline]
    pub fn time(&self) -> Option<TfTime> {
        match self {
            TfStamp::Latest => None,
            TfStamp::At(t) => Some(*t),
        }
    }
}

impl From<TfTime> for TfStamp {
    fn from(time: TfTime) -> Self {
        TfStamp::At(time)
    }
}

impl From<Option<TfTime>> for TfStamp {
    fn from(time: Option<TfTime>) -> Self {
        match time {
            Some(t) => TfStamp::At(t),
            None => TfStamp::Latest,
        }
    }
}

impl Display for TfStamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TfStamp::Latest => write!(f, "latest"),
            TfStamp::At(t) => write!(f, "{:.9}", t.as_secs_f64()),
        }
    }
}

/// Monotonic time source used to stamp published transforms.
///
/// Time starts at zero when the clock is created. Clones share the same origin, and clones of a
/// mocked clock follow the same [`RobotClockMock`].
#[derive(Clone, Debug)]
pub struct RobotClock {
    inner: Clock,
    origin: Instant,
}

/// Drives every clone of a clock built with [`RobotClock::mock`].
#[derive(Debug, Clone)]
pub struct RobotClockMock(Arc<Mock>);

impl RobotClockMock {
    pub fn increment(&self, amount: Duration) {
        self.0.increment(amount);
    }
}

impl RobotClock {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    /// A clock frozen at zero that only moves when the mock says so.
    pub fn mock() -> (Self, RobotClockMock) {
        let (clock, mock) = Clock::mock();
        (Self::with_clock(clock), RobotClockMock(mock))
    }

    fn with_clock(inner: Clock) -> Self {
        let origin = inner.now();
        RobotClock { inner, origin }
    }

    #[inline]
    pub fn now(&self) -> TfTime {
        (self.inner.now() - self.origin).into()
    }
}

impl Default for RobotClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mocked_clock_moves_all_clones() {
        let (clock, mock) = RobotClock::mock();
        let clone = clock.clone();
        assert_eq!(clock.now(), TfDuration::ZERO);
        mock.increment(Duration::from_millis(1500));
        assert_eq!(clock.now(), TfDuration::from_millis(1500));
        assert_eq!(clone.now(), clock.now());
    }

    #[test]
    fn test_real_clock_starts_near_zero() {
        let clock = RobotClock::new();
        let first = clock.now();
        assert!(first < TfDuration::from_secs(1));
        assert!(clock.now() >= first);
    }

    #[test]
    fn test_secs_f64_conversions() {
        assert_eq!(TfDuration::from_secs_f64(1.5), TfDuration(1_500_000_000));
        assert_eq!(TfDuration::from_secs_f64(-3.0), TfDuration::ZERO);
        assert_eq!(TfDuration::from_secs_f64(f64::NAN), TfDuration::ZERO);
        assert_relative_eq!(TfDuration::from_millis(250).as_secs_f64(), 0.25);
    }

    #[test]
    fn test_saturating_arithmetics() {
        let a: TfDuration = 10.into();
        let b: TfDuration = 20.into();
        assert_eq!(a.saturating_add(b), TfDuration(30));
        assert_eq!(a.saturating_sub(b), TfDuration::ZERO);
        assert_eq!(TfDuration(u64::MAX).saturating_add(b), TfDuration(u64::MAX));
    }

    #[test]
    fn test_stamp_is_not_zero_time() {
        let zero = TfStamp::at(0u64);
        assert_ne!(zero, TfStamp::Latest);
        assert_eq!(zero.time(), Some(TfDuration::ZERO));
        assert!(TfStamp::Latest.time().is_none());
        assert_eq!(TfStamp::from(None), TfStamp::Latest);
    }

    #[test]
    fn test_display() {
        assert_eq!(TfDuration(1_500_000_000).to_string(), "1.500 s");
        assert_eq!(TfDuration::from_millis(250).to_string(), "250.000 ms");
        assert_eq!(TfDuration(42).to_string(), "42 ns");
        assert_eq!(TfStamp::Latest.to_string(), "latest");
    }
}
