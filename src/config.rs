//! Engine configuration
//!
//! Settings are decided once at process start: the presence of a remote
//! backend URL selects the Redis backend, its absence selects the local
//! in-process backend with no error.

use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable naming the remote backend URL
pub const ENV_REDIS_URL: &str = "RECACHE_REDIS_URL";

/// Environment variable overriding the key namespace
pub const ENV_NAMESPACE: &str = "RECACHE_NAMESPACE";

/// Default key/tag namespace prefix
pub const DEFAULT_NAMESPACE: &str = "cache";

/// Default hard freshness window
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default TTL for tag index entries (24h) - tag metadata should outlive
/// typical data TTLs so that a tag registered against a still-live entry is
/// not silently lost before that entry expires naturally
pub const DEFAULT_TAG_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Payloads above this size are compressed when compression is on auto
pub const COMPRESSION_THRESHOLD: usize = 10 * 1024; // 10KB

/// Default interval between local backend expiry sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default capacity bound for the local backend
pub const DEFAULT_LOCAL_CAPACITY: usize = 100_000;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Namespace prefix scoping all keys and tags, so multiple logical
    /// caches can coexist in one backend without collision
    pub namespace: String,
    /// Remote backend URL; `None` selects the local in-process backend
    pub redis_url: Option<String>,
    /// Hard freshness window applied when options don't override it
    pub default_ttl: Duration,
    /// TTL for tag index entries
    pub tag_ttl: Duration,
    /// Size threshold for automatic compression
    pub compression_threshold: usize,
    /// Interval between local backend expiry sweeps
    pub sweep_interval: Duration,
    /// Maximum number of entries held by the local backend
    pub max_local_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            redis_url: None,
            default_ttl: DEFAULT_TTL,
            tag_ttl: DEFAULT_TAG_TTL,
            compression_threshold: COMPRESSION_THRESHOLD,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            max_local_entries: DEFAULT_LOCAL_CAPACITY,
        }
    }
}

impl CacheConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a config from the process environment.
    ///
    /// Reads `RECACHE_REDIS_URL` and `RECACHE_NAMESPACE`; absence of the URL
    /// selects the local backend.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(url) = std::env::var(ENV_REDIS_URL) {
            if url.trim().is_empty() {
                return Err(Error::Config(format!("{} is set but empty", ENV_REDIS_URL)));
            }
            config.redis_url = Some(url);
        }

        if let Ok(ns) = std::env::var(ENV_NAMESPACE) {
            if !ns.trim().is_empty() {
                config.namespace = ns;
            }
        }

        Ok(config)
    }

    /// Set the key namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the remote backend URL
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Set the default freshness window
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Set the tag index entry TTL
    pub fn with_tag_ttl(mut self, ttl: Duration) -> Self {
        self.tag_ttl = ttl;
        self
    }

    /// Set the automatic compression threshold
    pub fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Set the local backend sweep interval
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the local backend capacity bound
    pub fn with_max_local_entries(mut self, max: usize) -> Self {
        self.max_local_entries = max;
        self
    }
}
