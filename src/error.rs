//! Error types for the recache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the caching engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// The remote backend could not be reached or the command failed in
    /// transit. Recovered internally by falling back to the local backend;
    /// never surfaced from `get_or_compute`.
    #[error("cache backend unavailable: {0}")]
    BackendUnavailable(#[from] redis::RedisError),

    /// A delete against the backend failed outright (not "key absent").
    /// Surfaced to the invoker of the invalidation call, since silently
    /// failing to invalidate could leave stale data indefinitely.
    #[error("invalidation of {target} failed: {reason}")]
    Invalidation { target: String, reason: String },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Serializing an entry for storage failed
    #[error("failed to encode cache entry: {0}")]
    Encode(#[source] serde_json::Error),

    /// Stored bytes could not be decoded (corruption, version mismatch).
    /// The engine treats this identically to a cache miss.
    #[error("failed to decode cache entry: {0}")]
    Decode(String),

    /// Compression failed
    #[error("compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// The caller-supplied compute function failed. Surfaced only on the
    /// synchronous miss path; swallowed (logged) on the background-refresh
    /// path.
    #[error("compute function failed: {0}")]
    Compute(#[source] anyhow::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
