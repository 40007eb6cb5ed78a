//! Time unit and clocks.
//!
//! Every duration, position and timeout in the crate is a [`ClockTime`]: an
//! unsigned nanosecond count. Coarser units are converted with the fixed
//! multipliers [`ClockTime::SECOND`], [`ClockTime::MSECOND`],
//! [`ClockTime::USECOND`] and [`ClockTime::NSECOND`].
//!
//! [`ClockTime::NONE`] doubles as "infinite" when passed as a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time in nanoseconds.
///
/// # Examples
///
/// ```rust
/// use pipewright::clock::ClockTime;
///
/// let t = ClockTime::from_millis(1500);
/// assert_eq!(t.nanos(), 1_500 * ClockTime::MSECOND.nanos());
/// assert_eq!(format!("{}", t), "0:00:01.500000000");
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ClockTime(u64);

impl ClockTime {
    /// Zero time.
    pub const ZERO: Self = Self(0);

    /// One nanosecond.
    pub const NSECOND: Self = Self(1);

    /// One microsecond.
    pub const USECOND: Self = Self(1_000);

    /// One millisecond.
    pub const MSECOND: Self = Self(1_000_000);

    /// One second.
    pub const SECOND: Self = Self(1_000_000_000);

    /// Maximum representable time (one less than the NONE sentinel).
    pub const MAX: Self = Self(u64::MAX - 1);

    /// Unset time; as a timeout it means "wait forever".
    pub const NONE: Self = Self(u64::MAX);

    /// Create from nanoseconds.
    #[inline]
    pub const fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    /// Create from microseconds.
    #[inline]
    pub const fn from_micros(us: u64) -> Self {
        Self(us.saturating_mul(1_000))
    }

    /// Create from milliseconds.
    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    /// Create from seconds.
    #[inline]
    pub const fn from_secs(s: u64) -> Self {
        Self(s.saturating_mul(1_000_000_000))
    }

    /// Nanoseconds.
    #[inline]
    pub const fn nanos(self) -> u64 {
        self.0
    }

    /// Microseconds (truncated).
    #[inline]
    pub const fn micros(self) -> u64 {
        self.0 / 1_000
    }

    /// Milliseconds (truncated).
    #[inline]
    pub const fn millis(self) -> u64 {
        self.0 / 1_000_000
    }

    /// Seconds (truncated).
    #[inline]
    pub const fn secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    /// Whether this is the NONE sentinel.
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    /// Whether this is a valid time.
    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to `Option`, mapping NONE to `None`.
    #[inline]
    pub const fn to_option(self) -> Option<Self> {
        if self.is_none() { None } else { Some(self) }
    }

    /// Interpret as a timeout: `None` means block without limit.
    #[inline]
    pub fn as_timeout(self) -> Option<Duration> {
        self.to_option().map(|t| Duration::from_nanos(t.0))
    }

    /// Saturating addition. NONE is absorbing.
    #[inline]
    pub const fn saturating_add(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_add(rhs.0);
        if result == u64::MAX { Self::MAX } else { Self(result) }
    }

    /// Saturating subtraction. NONE is absorbing.
    #[inline]
    pub const fn saturating_sub(self, rhs: Self) -> Self {
        if self.is_none() || rhs.is_none() {
            return Self::NONE;
        }
        Self(self.0.saturating_sub(rhs.0))
    }

    /// Multiply by a scalar.
    #[inline]
    pub const fn saturating_mul(self, rhs: u64) -> Self {
        if self.is_none() {
            return Self::NONE;
        }
        let result = self.0.saturating_mul(rhs);
        if result == u64::MAX { Self::MAX } else { Self(result) }
    }

    /// Divide by a scalar.
    #[inline]
    pub const fn checked_div(self, rhs: u64) -> Option<u64> {
        if self.is_none() || rhs == 0 {
            return None;
        }
        Some(self.0 / rhs)
    }
}

impl std::ops::Add for ClockTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl std::ops::Sub for ClockTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.saturating_sub(rhs)
    }
}

impl std::ops::Mul<u64> for ClockTime {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: u64) -> Self {
        self.saturating_mul(rhs)
    }
}

impl From<Duration> for ClockTime {
    #[inline]
    fn from(d: Duration) -> Self {
        Self(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1))
    }
}

impl std::fmt::Display for ClockTime {
    /// Formats as `H:MM:SS.NNNNNNNNN`, the way pipeline tools print positions.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_none() {
            return write!(f, "--:--:--.---------");
        }
        let secs = self.secs();
        write!(
            f,
            "{}:{:02}:{:02}.{:09}",
            secs / 3600,
            (secs / 60) % 60,
            secs % 60,
            self.0 % 1_000_000_000
        )
    }
}

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Current time of the clock.
    fn now(&self) -> ClockTime;

    /// Name for diagnostics.
    fn name(&self) -> &str {
        "clock"
    }
}

/// Monotonic system clock, counting from its creation.
#[derive(Debug)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    /// Create a clock whose zero is now.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Create a shareable clock.
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTime {
        ClockTime::from(self.epoch.elapsed())
    }

    fn name(&self) -> &str {
        "system"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_multipliers() {
        assert_eq!(ClockTime::SECOND.nanos(), 1_000 * ClockTime::MSECOND.nanos());
        assert_eq!(ClockTime::MSECOND.nanos(), 1_000 * ClockTime::USECOND.nanos());
        assert_eq!(ClockTime::USECOND.nanos(), 1_000 * ClockTime::NSECOND.nanos());
        assert_eq!(ClockTime::MSECOND * 250, ClockTime::from_millis(250));
    }

    #[test]
    fn test_none_is_infinite_timeout() {
        assert_eq!(ClockTime::NONE.as_timeout(), None);
        assert_eq!(ClockTime::ZERO.as_timeout(), Some(Duration::ZERO));
        assert_eq!(
            ClockTime::from_millis(5).as_timeout(),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_saturation() {
        assert_eq!(ClockTime::MAX + ClockTime::SECOND, ClockTime::MAX);
        assert_eq!(ClockTime::ZERO - ClockTime::SECOND, ClockTime::ZERO);
        assert!((ClockTime::NONE + ClockTime::SECOND).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            ClockTime::from_secs(3723).to_string(),
            "1:02:03.000000000"
        );
        assert_eq!(ClockTime::NONE.to_string(), "--:--:--.---------");
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
