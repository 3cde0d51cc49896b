//! recache - Read-Through Caching Engine
//!
//! A generic read-through cache that sits between arbitrary expensive data
//! producers (database queries, external API calls, report generation) and
//! their consumers: given a cache key and an async function that can
//! compute the authoritative value, return a cached value when fresh,
//! recompute and store on miss, and optionally serve a stale value while
//! refreshing in the background. Groups of entries can be invalidated by
//! logical tag rather than by individual key.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Cache (engine)                           │
//! │   lookup → freshness → miss compute / stale refresh / hit        │
//! ├──────────────┬───────────────┬───────────────┬──────────────────┤
//! │  EntryCodec  │   TagIndex    │  CacheMetrics │   KeyBuilder     │
//! │  frame + LZ4 │  tag → keys   │  hits/misses  │  deterministic   │
//! ├──────────────┴───────────────┴───────────────┴──────────────────┤
//! │                        BackendStore                              │
//! │        RedisBackend (remote)  │  MemoryBackend (local)           │
//! │        fail-open: remote errors degrade to the local map         │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Freshness model
//!
//! An entry is **fresh** until its TTL elapses, then **stale** for the
//! configured stale-while-revalidate grace window (served immediately while
//! exactly one background refresh recomputes it), then **dead** - which is
//! treated identically to a miss.
//!
//! # Modules
//!
//! - [`backend`] - Pluggable key-value backends and startup selection
//! - [`codec`] - Entry framing, serialization, and compression
//! - [`config`] - Engine configuration
//! - [`engine`] - The read-through core, invalidation API, and warming
//! - [`entry`] - Cache entry types and freshness classification
//! - [`error`] - Error types
//! - [`key`] - Deterministic cache key construction
//! - [`metrics`] - Hit/miss counters
//! - [`tags`] - Tag index for bulk invalidation

pub mod backend;
pub mod codec;
pub mod config;
pub mod engine;
pub mod entry;
pub mod error;
pub mod key;
pub mod metrics;
pub mod tags;

// Re-export commonly used types
pub use backend::{BackendStore, MemoryBackend, RedisBackend};
pub use codec::EntryCodec;
pub use config::CacheConfig;
pub use engine::{Cache, CacheOptions, WarmEntry, WarmReport};
pub use entry::{CacheEntry, Freshness};
pub use error::{Error, Result};
pub use key::{request_key, KeyBuilder};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use tags::TagIndex;
