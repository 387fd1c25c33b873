use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ttl::Ttl;

/// The name used for caches that were created without an explicit [`CacheConfig`].
pub const DEFAULT_CACHE_NAME: &str = "memoized";

/// Configuration of a single memoized function.
///
/// This can be embedded into a larger application configuration file:
///
/// ```yaml
/// name: users
/// ttl: 30s
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// The name of the cache, used to tag logs and metrics.
    pub name: String,

    /// How long a successful result stays reusable.
    ///
    /// When absent, or zero, results never expire.
    #[serde(with = "humantime_serde")]
    pub ttl: Option<Duration>,
}

impl CacheConfig {
    /// Creates a configuration with the given name that never expires results.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ttl: None,
        }
    }

    /// Sets the time-to-live of successful results.
    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into().duration();
        self
    }

    /// The effective time-to-live.
    pub fn ttl(&self) -> Ttl {
        self.ttl.into()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::named(DEFAULT_CACHE_NAME)
    }
}
