//! Component configuration with fail-fast validation.
//!
//! All options are checked once at construction; an out-of-range value is a
//! programming error, not something the engine recovers from at runtime.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the pull-based pager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Nominal width of each fetch chunk.
    pub load_size: i64,

    /// Half-width of the window the planner tries to have loaded on each
    /// side of the access position.
    pub preload_size: i64,

    /// Half-width of the retention window; values outside
    /// `[key - cache_size, key + cache_size]` are evicted on every plan.
    pub cache_size: i64,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self {
            load_size: 20,
            preload_size: 60,
            cache_size: 100,
        }
    }
}

impl PagerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_size <= 0 {
            return Err(ConfigError::validation("load_size must be positive"));
        }
        if self.preload_size <= 0 {
            return Err(ConfigError::validation("preload_size must be positive"));
        }
        if self.cache_size <= 0 {
            return Err(ConfigError::validation("cache_size must be positive"));
        }
        Ok(())
    }
}

/// Configuration for the push-based streaming pager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingPagerConfig {
    /// Nominal width of each chunk-aligned subscription.
    pub load_size: i64,

    /// Half-width of the subscription window around the access position.
    pub preload_size: i64,

    /// Half-width of the retention window for materialized values.
    pub cache_size: i64,

    /// How far beyond the active window a subscribed range must lie before
    /// its subscription is closed. `None` means `load_size`.
    pub close_threshold: Option<i64>,

    /// Debounce applied to access events, in milliseconds.
    pub key_debounce_ms: u64,
}

impl Default for StreamingPagerConfig {
    fn default() -> Self {
        Self {
            load_size: 20,
            preload_size: 60,
            cache_size: 100,
            close_threshold: None,
            key_debounce_ms: 300,
        }
    }
}

impl StreamingPagerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_size <= 0 {
            return Err(ConfigError::validation("load_size must be positive"));
        }
        if self.preload_size < 0 {
            return Err(ConfigError::validation("preload_size must not be negative"));
        }
        if self.cache_size < 0 {
            return Err(ConfigError::validation("cache_size must not be negative"));
        }
        if let Some(threshold) = self.close_threshold {
            if threshold < 0 {
                return Err(ConfigError::validation(
                    "close_threshold must not be negative",
                ));
            }
        }
        Ok(())
    }

    /// The effective close threshold.
    pub fn close_threshold(&self) -> i64 {
        self.close_threshold.unwrap_or(self.load_size)
    }

    /// The access-event debounce as a [`Duration`].
    pub fn key_debounce(&self) -> Duration {
        Duration::from_millis(self.key_debounce_ms)
    }
}

/// Configuration for the local+remote paging mediator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediatorConfig {
    /// Nominal width of each fetch chunk, forwarded to the embedded pager.
    pub load_size: i64,

    /// Preload half-width, forwarded to the embedded pager.
    pub prefetch_size: i64,

    /// Retention half-width, forwarded to the embedded pager.
    pub cache_size: i64,

    /// Maximum number of parallel remote fetches for missing sub-ranges.
    pub concurrency: usize,

    /// On any local miss, fetch the whole requested range in one remote
    /// call instead of computing gap ranges.
    pub fetch_full_range_on_miss: bool,

    /// Emit the raw local portion (stale entries included) instead of the
    /// stale-filtered one.
    pub emit_outdated_records: bool,

    /// Emit each remote portion as it arrives. Only effective when fetches
    /// run serially; parallel fetches always collect before emitting.
    pub emit_intermediate_results: bool,
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            load_size: 20,
            prefetch_size: 60,
            cache_size: 100,
            concurrency: 1,
            fetch_full_range_on_miss: false,
            emit_outdated_records: false,
            emit_intermediate_results: true,
        }
    }
}

impl MediatorConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.load_size <= 0 {
            return Err(ConfigError::validation("load_size must be positive"));
        }
        if self.prefetch_size <= 0 {
            return Err(ConfigError::validation("prefetch_size must be positive"));
        }
        if self.cache_size <= 0 {
            return Err(ConfigError::validation("cache_size must be positive"));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::validation("concurrency must be at least 1"));
        }
        Ok(())
    }

    /// The configuration of the embedded pager.
    pub fn pager_config(&self) -> PagerConfig {
        PagerConfig {
            load_size: self.load_size,
            preload_size: self.prefetch_size,
            cache_size: self.cache_size,
        }
    }
}

/// Predicate deciding whether a locally cached record is stale.
///
/// Stale records are omitted from local emissions and treated as missing,
/// which routes them to the remote source. Carried outside the config
/// structs because closures are not configuration data.
pub type StalePredicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// The default staleness predicate: nothing is ever stale.
pub fn never_stale<T>() -> StalePredicate<T> {
    Arc::new(|_| false)
}
