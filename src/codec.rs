//! Entry codec: wire framing, serialization, and compression
//!
//! Stored frame layout:
//!
//! ```text
//! ┌─────────┬─────────┬──────────────┬───────────┬──────────────────┐
//! │ version │  flags  │ meta_len u32 │ meta JSON │ payload bytes    │
//! │  1 byte │  1 byte │  big-endian  │           │ (LZ4 if flagged) │
//! └─────────┴─────────┴──────────────┴───────────┴──────────────────┘
//! ```
//!
//! The compressed flag lives in the frame header, so decoding is
//! self-describing - decoders never guess. A corrupted or incompatible
//! frame fails with a decode error, which the engine treats identically
//! to a cache miss.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::error::{Error, Result};

/// Current frame format version
const FORMAT_VERSION: u8 = 1;

/// Flag bit: payload is LZ4-compressed
const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Frame header length: version + flags + meta_len
const HEADER_LEN: usize = 1 + 1 + 4;

/// LZ4 high-compression level
const LZ4_LEVEL: i32 = 4;

/// Entry metadata carried in the frame, separate from the payload so the
/// payload alone can be compressed
#[derive(Debug, Serialize, Deserialize)]
struct FrameMeta {
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    stale_until: Option<DateTime<Utc>>,
    tags: Vec<String>,
}

/// Serializes cache entries to self-describing frames and back
#[derive(Debug, Clone)]
pub struct EntryCodec {
    /// Payloads above this size are compressed in auto mode
    threshold: usize,
}

impl EntryCodec {
    /// Create a codec with the given auto-compression threshold
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    /// Encode an entry into a stored frame.
    ///
    /// `compress` forces (`Some(true)`) or forbids (`Some(false)`)
    /// compression; `None` applies the size threshold. Compressed output is
    /// kept only when it is actually smaller than the raw payload.
    pub fn encode<T: Serialize>(
        &self,
        entry: &CacheEntry<T>,
        compress: Option<bool>,
    ) -> Result<Bytes> {
        let meta = FrameMeta {
            created_at: entry.created_at,
            expires_at: entry.expires_at,
            stale_until: entry.stale_until,
            tags: entry.tags.clone(),
        };
        let meta_bytes = serde_json::to_vec(&meta).map_err(Error::Encode)?;
        let payload = serde_json::to_vec(&entry.value).map_err(Error::Encode)?;

        let want_compression = match compress {
            Some(forced) => forced,
            None => payload.len() > self.threshold,
        };

        let (payload, compressed) = if want_compression {
            let squeezed = lz4::block::compress(
                &payload,
                Some(lz4::block::CompressionMode::HIGHCOMPRESSION(LZ4_LEVEL)),
                true,
            )
            .map_err(|e| Error::CompressionFailed {
                algorithm: "lz4".into(),
                reason: e.to_string(),
            })?;

            if squeezed.len() < payload.len() {
                (squeezed, true)
            } else {
                (payload, false)
            }
        } else {
            (payload, false)
        };

        let mut frame = Vec::with_capacity(HEADER_LEN + meta_bytes.len() + payload.len());
        frame.push(FORMAT_VERSION);
        frame.push(if compressed { FLAG_COMPRESSED } else { 0 });
        frame.extend_from_slice(&(meta_bytes.len() as u32).to_be_bytes());
        frame.extend_from_slice(&meta_bytes);
        frame.extend_from_slice(&payload);

        Ok(Bytes::from(frame))
    }

    /// Decode a stored frame back into an entry
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<CacheEntry<T>> {
        if frame.len() < HEADER_LEN {
            return Err(Error::Decode(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }

        let version = frame[0];
        if version != FORMAT_VERSION {
            return Err(Error::Decode(format!(
                "unsupported frame version {}",
                version
            )));
        }

        let compressed = frame[1] & FLAG_COMPRESSED != 0;

        let meta_len = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]) as usize;
        let meta_end = HEADER_LEN + meta_len;
        if frame.len() < meta_end {
            return Err(Error::Decode(format!(
                "metadata length {} exceeds frame length {}",
                meta_len,
                frame.len()
            )));
        }

        let meta: FrameMeta = serde_json::from_slice(&frame[HEADER_LEN..meta_end])
            .map_err(|e| Error::Decode(format!("bad metadata: {}", e)))?;

        let payload = &frame[meta_end..];
        let payload = if compressed {
            lz4::block::decompress(payload, None).map_err(|e| Error::DecompressionFailed {
                algorithm: "lz4".into(),
                reason: e.to_string(),
            })?
        } else {
            payload.to_vec()
        };

        let value: T = serde_json::from_slice(&payload)
            .map_err(|e| Error::Decode(format!("bad payload: {}", e)))?;

        Ok(CacheEntry {
            value,
            created_at: meta.created_at,
            expires_at: meta.expires_at,
            stale_until: meta.stale_until,
            tags: meta.tags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::COMPRESSION_THRESHOLD;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn codec() -> EntryCodec {
        EntryCodec::new(COMPRESSION_THRESHOLD)
    }

    fn sample_entry(value: impl Serialize) -> CacheEntry<serde_json::Value> {
        CacheEntry::new(
            serde_json::to_value(value).unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(30),
            vec!["alpha".to_string(), "beta".to_string()],
        )
    }

    #[test]
    fn test_roundtrip_uncompressed() {
        let entry = sample_entry("small value");
        let frame = codec().encode(&entry, None).unwrap();

        // Under the threshold: stored raw
        assert_eq!(frame[1] & FLAG_COMPRESSED, 0);

        let decoded: CacheEntry<serde_json::Value> = codec().decode(&frame).unwrap();
        assert_eq!(decoded.value, entry.value);
        assert_eq!(decoded.created_at, entry.created_at);
        assert_eq!(decoded.expires_at, entry.expires_at);
        assert_eq!(decoded.stale_until, entry.stale_until);
        assert_eq!(decoded.tags, entry.tags);
    }

    #[test]
    fn test_auto_compression_above_threshold() {
        let big = "repetitive text ".repeat(2048); // well over 10KB, compresses well
        let entry = sample_entry(&big);
        let frame = codec().encode(&entry, None).unwrap();

        assert_ne!(frame[1] & FLAG_COMPRESSED, 0);
        assert!(frame.len() < big.len());

        let decoded: CacheEntry<serde_json::Value> = codec().decode(&frame).unwrap();
        assert_eq!(decoded.value, entry.value);
    }

    #[test]
    fn test_forced_compression() {
        let entry = sample_entry("tiny but repeated repeated repeated repeated");
        let frame = codec().encode(&entry, Some(true)).unwrap();
        let decoded: CacheEntry<serde_json::Value> = codec().decode(&frame).unwrap();
        assert_eq!(decoded.value, entry.value);
    }

    #[test]
    fn test_forbidden_compression() {
        let big = "x".repeat(64 * 1024);
        let entry = sample_entry(&big);
        let frame = codec().encode(&entry, Some(false)).unwrap();
        assert_eq!(frame[1] & FLAG_COMPRESSED, 0);
    }

    #[test]
    fn test_forced_compression_of_incompressible_payload() {
        // High-entropy payload: when compression does not shrink it, the
        // codec keeps the raw form and the frame stays self-describing
        let noise: String = (0..4096u32)
            .map(|i| char::from_u32(33 + (i.wrapping_mul(2654435761) % 90)).unwrap())
            .collect();
        let entry = sample_entry(&noise);
        let frame = codec().encode(&entry, Some(true)).unwrap();

        let decoded: CacheEntry<serde_json::Value> = codec().decode(&frame).unwrap();
        assert_eq!(decoded.value, entry.value);
    }

    #[test]
    fn test_truncated_frame_fails() {
        let err = codec().decode::<serde_json::Value>(&[1, 0, 0]).unwrap_err();
        assert_matches!(err, Error::Decode(_));
    }

    #[test]
    fn test_unknown_version_fails() {
        let entry = sample_entry("v");
        let mut frame = codec().encode(&entry, None).unwrap().to_vec();
        frame[0] = 99;
        let err = codec().decode::<serde_json::Value>(&frame).unwrap_err();
        assert_matches!(err, Error::Decode(_));
    }

    #[test]
    fn test_corrupted_metadata_fails() {
        let entry = sample_entry("v");
        let mut frame = codec().encode(&entry, None).unwrap().to_vec();
        // Stomp the metadata region
        frame[HEADER_LEN] = b'!';
        frame[HEADER_LEN + 1] = b'!';
        let err = codec().decode::<serde_json::Value>(&frame).unwrap_err();
        assert_matches!(err, Error::Decode(_));
    }

    #[test]
    fn test_lying_meta_length_fails() {
        let entry = sample_entry("v");
        let mut frame = codec().encode(&entry, None).unwrap().to_vec();
        frame[2..6].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = codec().decode::<serde_json::Value>(&frame).unwrap_err();
        assert_matches!(err, Error::Decode(_));
    }
}
