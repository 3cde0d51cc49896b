//! Pluggable key-value backends
//!
//! Everything else in the engine is built on this minimal contract:
//! get / set-with-TTL / delete / list-keys-by-pattern. Two implementations
//! satisfy it:
//!
//! - [`RedisBackend`]: delegates to a networked key-value service; every
//!   call may fail, and the engine fails open to the local backend.
//! - [`MemoryBackend`]: a bounded in-process map with a periodic expiry
//!   sweep; always available as the default and the fallback.
//!
//! Selection between the two happens once at process start via [`select`],
//! based on whether remote configuration is present and reachable. It does
//! not hot-swap mid-process except per-operation fail-open.

mod memory;
mod redis;

pub use memory::MemoryBackend;
pub use redis::RedisBackend;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use crate::config::CacheConfig;
use crate::error::Result;

/// Minimal key-value contract the engine is built on
#[async_trait]
pub trait BackendStore: Send + Sync {
    /// Fetch the raw bytes stored under `key`, or `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store `value` under `key`, expiring after `ttl`
    async fn set_with_ttl(&self, key: &str, value: Bytes, ttl: Duration) -> Result<()>;

    /// Delete `key`. Deleting an absent key is a success, not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys matching a glob-style pattern (`*` wildcard)
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Number of live entries, when the backend can report it cheaply.
    /// The remote backend reports 0 (unknown).
    async fn entry_count(&self) -> u64;

    /// Short backend name for logging
    fn name(&self) -> &'static str;
}

/// The backends a cache operates against: the primary chosen at startup,
/// plus the local fallback when the primary is remote
pub struct BackendSelection {
    /// The backend all operations go to first
    pub primary: Arc<dyn BackendStore>,
    /// Fail-open target for individual operations; `None` when the primary
    /// is already the local backend
    pub fallback: Option<Arc<MemoryBackend>>,
}

impl BackendSelection {
    /// Wrap a caller-supplied backend with no fallback (tests, custom stores)
    pub fn custom(primary: Arc<dyn BackendStore>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }
}

/// Choose the backend once at startup.
///
/// A configured and reachable remote URL selects [`RedisBackend`] with a
/// local fallback behind it; anything else selects [`MemoryBackend`] alone,
/// with no error.
pub async fn select(config: &CacheConfig) -> BackendSelection {
    let local = || {
        Arc::new(MemoryBackend::new(
            config.max_local_entries,
            config.sweep_interval,
        ))
    };

    match &config.redis_url {
        Some(url) => match RedisBackend::connect(url).await {
            Ok(remote) => {
                info!(url = %url, "cache backend: redis (with local fallback)");
                BackendSelection {
                    primary: Arc::new(remote),
                    fallback: Some(local()),
                }
            }
            Err(e) => {
                warn!(url = %url, error = %e, "remote backend unreachable, using local backend");
                BackendSelection {
                    primary: local(),
                    fallback: None,
                }
            }
        },
        None => {
            info!("cache backend: local in-process");
            BackendSelection {
                primary: local(),
                fallback: None,
            }
        }
    }
}

// =============================================================================
// Fail-open composition
// =============================================================================

/// The primary backend plus its optional local fallback, with the engine's
/// degradation discipline baked in.
///
/// Read/write paths fail open: a primary failure is logged and the
/// operation degrades to the fallback instead of surfacing. Invalidation
/// paths are strict: a primary failure surfaces, since the caller needs to
/// know staleness is no longer guaranteed; the fallback is still cleaned
/// up either way.
pub(crate) struct StoreHandle {
    primary: Arc<dyn BackendStore>,
    fallback: Option<Arc<MemoryBackend>>,
}

impl StoreHandle {
    pub(crate) fn new(selection: BackendSelection) -> Self {
        Self {
            primary: selection.primary,
            fallback: selection.fallback,
        }
    }

    /// Read with fail-open degradation; absent and unreachable both read
    /// as `None`
    pub(crate) async fn get_failopen(&self, key: &str) -> Option<Bytes> {
        match self.primary.get(key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %key, backend = self.primary.name(), error = %e,
                    "backend read failed, trying local fallback");
                match &self.fallback {
                    Some(local) => local.get(key).await.ok().flatten(),
                    None => None,
                }
            }
        }
    }

    /// Write with fail-open degradation; failures are logged, never surfaced
    pub(crate) async fn set_failopen(&self, key: &str, value: Bytes, ttl: Duration) {
        if let Err(e) = self.primary.set_with_ttl(key, value.clone(), ttl).await {
            warn!(key = %key, backend = self.primary.name(), error = %e,
                "backend write failed, writing to local fallback");
            if let Some(local) = &self.fallback {
                // Infallible in practice
                let _ = local.set_with_ttl(key, value, ttl).await;
            }
        }
    }

    /// Best-effort delete used on the read path (corrupt entries); logged,
    /// never surfaced
    pub(crate) async fn delete_failopen(&self, key: &str) {
        if let Err(e) = self.primary.delete(key).await {
            warn!(key = %key, backend = self.primary.name(), error = %e,
                "best-effort delete failed");
        }
        if let Some(local) = &self.fallback {
            let _ = local.delete(key).await;
        }
    }

    /// Strict delete for invalidation: the fallback is always cleaned, a
    /// primary failure surfaces
    pub(crate) async fn delete_strict(&self, key: &str) -> Result<()> {
        if let Some(local) = &self.fallback {
            let _ = local.delete(key).await;
        }
        self.primary.delete(key).await
    }

    /// Strict read for invalidation metadata; a primary failure surfaces.
    /// Returns the primary's bytes and, separately, the fallback's, since
    /// fail-open writes may have split state across the two.
    pub(crate) async fn get_strict(&self, key: &str) -> Result<(Option<Bytes>, Option<Bytes>)> {
        let primary = self.primary.get(key).await?;
        let local = match &self.fallback {
            Some(local) => local.get(key).await.ok().flatten(),
            None => None,
        };
        Ok((primary, local))
    }

    /// Enumerate matching keys across the primary and the fallback; a
    /// primary failure surfaces
    pub(crate) async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut keys = self.primary.keys_matching(pattern).await?;
        if let Some(local) = &self.fallback {
            for key in local.keys_matching(pattern).await.unwrap_or_default() {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }

    /// Live entry count as the primary reports it (0 for remote)
    pub(crate) async fn entry_count(&self) -> u64 {
        self.primary.entry_count().await
    }
}
