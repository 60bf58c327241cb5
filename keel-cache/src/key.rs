//! Hierarchical cache keys.
//!
//! A key is an ordered list of segments, e.g. `["cart", "user-42"]` or
//! `["stock", "product-7"]`. A shorter key addresses every key it prefixes,
//! so invalidating `["stock"]` marks every product's stock entry stale.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Segment separator used by the `Display` form.
pub const KEY_SEPARATOR: char = ':';

/// Hierarchical key addressing one cache entry or a family of entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(Vec<String>);

impl CacheKey {
    /// Build a key from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Single-segment key.
    pub fn root(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    /// Key one level below `self`.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when every segment of `self` leads `other`. A key prefixes
    /// itself; the empty key prefixes everything.
    pub fn is_prefix_of(&self, other: &CacheKey) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.0 {
            if !first {
                write!(f, "{}", KEY_SEPARATOR)?;
            }
            write!(f, "{}", segment)?;
            first = false;
        }
        Ok(())
    }
}

impl From<&str> for CacheKey {
    /// Parses the `Display` form back into segments.
    fn from(value: &str) -> Self {
        if value.is_empty() {
            return Self(Vec::new());
        }
        Self::new(value.split(KEY_SEPARATOR))
    }
}

/// Build a [`CacheKey`] from a list of displayable segments.
///
/// ```
/// use keel_cache::cache_key;
/// let key = cache_key!["cart", 42];
/// assert_eq!(key.to_string(), "cart:42");
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($segment:expr),* $(,)?) => {
        $crate::CacheKey::new([$($segment.to_string()),*])
    };
}
