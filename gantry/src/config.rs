//! Construction-time configuration.
//!
//! All knobs the original process read from the environment at init are
//! packaged here and injected, so tests can override them cleanly.

use rand::Rng;
use std::time::Duration;
use tracing::warn;

/// Per-entry expiry for the user schema caches, hours.
pub const SCHEMAS_CACHE_EXPIRY_ENV: &str = "CATTLE_SCHEMAS_CACHE_EXPIRY";
/// Lower bound for jittered expiry; must be below the expiry to enable jitter.
pub const SCHEMA_CACHE_EXPIRY_LOWER_ENV: &str = "CATTLE_SCHEMA_CACHE_EXPIRY_LOWER";
/// Emit debug logs on cache size when `"true"`.
pub const LOG_CACHE_SIZE_DEBUG_ENV: &str = "CATTLE_LOG_CACHE_SIZE_DEBUG";
/// Client-side concurrency limit for informer start-up; integer >= 1.
pub const CACHE_CLIENT_LIMIT_ENV: &str = "RANCHER_CACHE_CLIENT_LIMIT";

/// Runtime configuration for the gateway core.
#[derive(Clone, Debug)]
pub struct Config {
    /// Per-entry expiry of the projection caches, in hours.
    pub cache_expiry_hours: u64,
    /// When set (and below `cache_expiry_hours`), each cache entry gets a
    /// random expiry in `[lower, cache_expiry_hours)` hours.
    pub expiry_lower_bound_hours: Option<u64>,
    /// Log projection cache sizes at debug level on every insert.
    pub log_cache_size_debug: bool,
    /// Bound on concurrent informer start-up list calls.
    pub client_limit: Option<usize>,
    /// Shared capacity of the user->id and id->schemas caches.
    pub user_cache_size: usize,
    /// Tick interval of the schema refresh loop.
    pub refresh_debounce: Duration,
    /// Collapse window for counts deliveries.
    pub counts_debounce: Duration,
    /// Budget for assembling a counts snapshot across kinds.
    pub counts_budget: Duration,
    /// Bound on concurrent column probes during refresh.
    pub column_fetch_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            cache_expiry_hours: 24,
            expiry_lower_bound_hours: None,
            log_cache_size_debug: false,
            client_limit: None,
            user_cache_size: 256,
            refresh_debounce: Duration::from_millis(500),
            counts_debounce: Duration::from_secs(5),
            counts_budget: Duration::from_millis(750),
            column_fetch_concurrency: 10,
        }
    }
}

impl Config {
    /// Read the recognized environment variables, falling back to defaults
    /// (with a warning) on unparsable values.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Some(hours) = parse_env::<u64>(SCHEMAS_CACHE_EXPIRY_ENV) {
            config.cache_expiry_hours = hours;
        }
        if let Some(lower) = parse_env::<u64>(SCHEMA_CACHE_EXPIRY_LOWER_ENV) {
            config.expiry_lower_bound_hours = Some(lower);
        }
        config.log_cache_size_debug =
            std::env::var(LOG_CACHE_SIZE_DEBUG_ENV).is_ok_and(|v| v == "true");
        if let Some(limit) = parse_env::<usize>(CACHE_CLIENT_LIMIT_ENV) {
            if limit >= 1 {
                config.client_limit = Some(limit);
            } else {
                warn!(limit, "ignoring {}: must be >= 1", CACHE_CLIENT_LIMIT_ENV);
            }
        }
        config.validate()
    }

    /// Disable jitter when the bounds cannot produce a valid range.
    #[must_use]
    pub fn validate(mut self) -> Self {
        if let Some(lower) = self.expiry_lower_bound_hours {
            if lower >= self.cache_expiry_hours {
                warn!(
                    lower,
                    expiry = self.cache_expiry_hours,
                    "jitter lower bound must be below the cache expiry; disabling jitter"
                );
                self.expiry_lower_bound_hours = None;
            }
        }
        self
    }

    /// The expiry for one cache entry, jittered when a lower bound is set.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        let hours = match self.expiry_lower_bound_hours {
            // the constructor guards lower < expiry, but re-check: an equal
            // pair would panic the range sampler
            Some(lower) if lower < self.cache_expiry_hours => {
                rand::rng().random_range(lower..self.cache_expiry_hours)
            }
            _ => self.cache_expiry_hours,
        };
        Duration::from_secs(hours * 3600)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(%raw, "ignoring unparsable {}", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_disabled_when_bounds_invert() {
        let config = Config {
            cache_expiry_hours: 24,
            expiry_lower_bound_hours: Some(24),
            ..Config::default()
        }
        .validate();
        assert_eq!(config.expiry_lower_bound_hours, None);
        assert_eq!(config.cache_ttl(), Duration::from_secs(24 * 3600));
    }

    #[test]
    fn jittered_ttl_stays_in_range() {
        let config = Config {
            cache_expiry_hours: 24,
            expiry_lower_bound_hours: Some(12),
            ..Config::default()
        };
        for _ in 0..50 {
            let ttl = config.cache_ttl();
            assert!(ttl >= Duration::from_secs(12 * 3600));
            assert!(ttl < Duration::from_secs(24 * 3600));
        }
    }
}
