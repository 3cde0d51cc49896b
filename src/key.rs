//! Deterministic cache key construction
//!
//! Keys are built from an ordered list of components under a namespace
//! prefix: `prefix:component1:component2:...`. For request-derived keys,
//! query parameters are sorted by name before joining, so two logically
//! identical requests with differently-ordered query strings map to the
//! same key. This determinism is what makes the cache actually cache
//! repeat requests.

use std::fmt::Display;

use crate::config::DEFAULT_NAMESPACE;

/// Separator between key components
const SEPARATOR: char = ':';

/// Builder for namespaced cache keys
///
/// # Example
///
/// ```
/// use recache::KeyBuilder;
///
/// let key = KeyBuilder::new("reports")
///     .push("monthly")
///     .push(2024)
///     .build();
/// assert_eq!(key, "reports:monthly:2024");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
    components: Vec<String>,
}

impl KeyBuilder {
    /// Create a builder scoped to the given namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            components: Vec::new(),
        }
    }

    /// Append a component (string, number, or anything displayable)
    pub fn push(mut self, component: impl Display) -> Self {
        self.components.push(component.to_string());
        self
    }

    /// Append a component when present; `None` is filtered out
    pub fn push_opt<T: Display>(mut self, component: Option<T>) -> Self {
        if let Some(c) = component {
            self.components.push(c.to_string());
        }
        self
    }

    /// Append a pre-sorted, normalized query string component.
    ///
    /// Pairs are percent-decoded, sorted lexicographically by parameter
    /// name (then value), re-encoded, and joined. An empty query string
    /// contributes no component.
    pub fn push_query(mut self, query: &str) -> Self {
        if let Some(normalized) = normalize_query(query) {
            self.components.push(normalized);
        }
        self
    }

    /// Produce the final key string
    pub fn build(self) -> String {
        let mut key = self.namespace;
        for component in &self.components {
            key.push(SEPARATOR);
            key.push_str(component);
        }
        key
    }
}

impl Default for KeyBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

/// Build a request-derived key from method, path, and raw query string.
///
/// The query string is normalized so that parameter order does not affect
/// the resulting key.
pub fn request_key(namespace: &str, method: &str, path: &str, query: &str) -> String {
    KeyBuilder::new(namespace)
        .push(method)
        .push(path)
        .push_query(query)
        .build()
}

/// Sort and re-encode a raw query string; `None` when it has no pairs
fn normalize_query(query: &str) -> Option<String> {
    let mut pairs: Vec<(String, String)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (
                urlencoding::decode(name)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| name.to_string()),
                urlencoding::decode(value)
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| value.to_string()),
            )
        })
        .collect();

    if pairs.is_empty() {
        return None;
    }

    pairs.sort();

    let joined = pairs
        .iter()
        .map(|(name, value)| {
            format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
        })
        .collect::<Vec<_>>()
        .join("&");

    Some(joined)
}
