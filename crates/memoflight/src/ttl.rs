use std::time::Duration;

/// How long a successfully computed value stays reusable.
///
/// A [`Ttl`] is either a positive [`Duration`], or [`Ttl::FOREVER`], in which case successful
/// results are never expired. Every conversion that does not describe a positive, finite amount of
/// time (zero, negative numbers, `NaN`, infinity, `None`) yields [`Ttl::FOREVER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ttl(Option<Duration>);

impl Ttl {
    /// Successful results are cached indefinitely.
    pub const FOREVER: Ttl = Ttl(None);

    /// Creates a [`Ttl`] from a number of milliseconds.
    pub const fn from_millis(millis: u64) -> Self {
        if millis == 0 {
            Self::FOREVER
        } else {
            Ttl(Some(Duration::from_millis(millis)))
        }
    }

    /// Creates a [`Ttl`] from a possibly fractional, negative or non-finite number of milliseconds.
    pub fn from_millis_f64(millis: f64) -> Self {
        if millis.is_finite() && millis > 0.0 {
            // sub-nanosecond values still expire, as soon as possible
            Duration::try_from_secs_f64(millis / 1000.0)
                .map_or(Self::FOREVER, |ttl| Ttl(Some(ttl.max(Duration::from_nanos(1)))))
        } else {
            Self::FOREVER
        }
    }

    /// Returns the expiration delay, or `None` if results never expire.
    pub fn duration(&self) -> Option<Duration> {
        self.0
    }

    /// Whether successful results are kept forever.
    pub fn is_forever(&self) -> bool {
        self.0.is_none()
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::FOREVER
        } else {
            Ttl(Some(duration))
        }
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(duration: Option<Duration>) -> Self {
        duration.map_or(Self::FOREVER, Ttl::from)
    }
}

impl From<u64> for Ttl {
    fn from(millis: u64) -> Self {
        Self::from_millis(millis)
    }
}

impl From<u32> for Ttl {
    fn from(millis: u32) -> Self {
        Self::from_millis(millis.into())
    }
}

impl From<i64> for Ttl {
    fn from(millis: i64) -> Self {
        u64::try_from(millis).map_or(Self::FOREVER, Self::from_millis)
    }
}

impl From<i32> for Ttl {
    fn from(millis: i32) -> Self {
        i64::from(millis).into()
    }
}

impl From<f64> for Ttl {
    fn from(millis: f64) -> Self {
        Self::from_millis_f64(millis)
    }
}
