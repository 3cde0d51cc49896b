//! Cache entry types and freshness classification

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Freshness state of a cache entry at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Within the hard TTL window; trusted as-is
    Fresh,
    /// Past the TTL but within the stale-while-revalidate grace window;
    /// may be served while a refresh runs in the background
    Stale,
    /// Past both windows; functionally a miss
    Dead,
}

impl std::fmt::Display for Freshness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Freshness::Fresh => write!(f, "fresh"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Dead => write!(f, "dead"),
        }
    }
}

/// A cached value with its freshness metadata
///
/// Invariant: `created_at <= expires_at <= stale_until` (when present),
/// guaranteed by construction since both windows are non-negative durations
/// added to the creation time.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached payload
    pub value: T,
    /// When the value was computed
    pub created_at: DateTime<Utc>,
    /// Hard expiry; after this the value is not trusted as fresh
    pub expires_at: DateTime<Utc>,
    /// End of the stale-while-revalidate grace window, when configured
    pub stale_until: Option<DateTime<Utc>>,
    /// Logical group memberships for bulk invalidation
    pub tags: Vec<String>,
}

impl<T> CacheEntry<T> {
    /// Wrap a freshly computed value with windows starting now
    pub fn new(value: T, ttl: Duration, swr: Duration, tags: Vec<String>) -> Self {
        let created_at = Utc::now();
        let expires_at = saturating_add(created_at, ttl);
        let stale_until = if swr.is_zero() {
            None
        } else {
            Some(saturating_add(expires_at, swr))
        };

        Self {
            value,
            created_at,
            expires_at,
            stale_until,
            tags,
        }
    }

    /// Classify this entry's freshness at `now`
    pub fn freshness(&self, now: DateTime<Utc>) -> Freshness {
        if now < self.expires_at {
            return Freshness::Fresh;
        }
        match self.stale_until {
            Some(stale_until) if now < stale_until => Freshness::Stale,
            _ => Freshness::Dead,
        }
    }

    /// The instant after which the physical backend entry is gone
    pub fn physical_deadline(&self) -> DateTime<Utc> {
        self.stale_until.unwrap_or(self.expires_at)
    }

    /// Consume the entry, returning the value
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Add a std duration to a timestamp, clamping instead of overflowing on
/// absurd windows
fn saturating_add(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
