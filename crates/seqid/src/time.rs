use chrono::{DateTime, FixedOffset, Local, Offset, TimeDelta, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

/// A trait for wall-clock time sources.
///
/// The same clock stamps lease expiry and decides the daily rollover date, so
/// every process sharing a datastore must use clocks that agree within normal
/// skew. Nothing here compensates for skew.
///
/// # Example
///
/// ```
/// use chrono::{DateTime, FixedOffset};
/// use seqid::TimeSource;
///
/// struct FixedTime(DateTime<FixedOffset>);
/// impl TimeSource for FixedTime {
///     fn now(&self) -> DateTime<FixedOffset> {
///         self.0
///     }
/// }
///
/// let time = FixedTime(DateTime::parse_from_rfc3339("2025-06-17T00:00:01Z").unwrap());
/// assert_eq!(time.current_millis(), 1_750_118_401_000);
/// ```
pub trait TimeSource {
    /// Returns the current wall-clock time in the zone used for date stamps.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

impl<T: TimeSource + ?Sized> TimeSource for Arc<T> {
    fn now(&self) -> DateTime<FixedOffset> {
        (**self).now()
    }
}

/// The system wall clock, rendered either in the host's local zone or in a
/// fixed offset.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock {
    offset: Option<FixedOffset>,
}

impl SystemClock {
    /// Stamps dates in the host's local time zone.
    pub fn local() -> Self {
        Self { offset: None }
    }

    /// Stamps dates in UTC.
    pub fn utc() -> Self {
        Self::with_offset(Utc.fix())
    }

    /// Stamps dates in a fixed offset, independent of the host's zone.
    pub fn with_offset(offset: FixedOffset) -> Self {
        Self {
            offset: Some(offset),
        }
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        match self.offset {
            Some(offset) => Utc::now().with_timezone(&offset),
            None => Local::now().fixed_offset(),
        }
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so one handle can be given to an allocator
/// while a test advances another.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<FixedOffset>>>,
}

impl ManualClock {
    pub fn new(now: DateTime<FixedOffset>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Builds a clock from an RFC 3339 timestamp such as
    /// `2025-06-17T09:30:00+08:00`.
    pub fn from_rfc3339(now: &str) -> Result<Self, chrono::ParseError> {
        DateTime::parse_from_rfc3339(now).map(Self::new)
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock();
        *now = *now + by;
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        *self.now.lock()
    }
}
