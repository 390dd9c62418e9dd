//! Structured cache keys.
//!
//! Keys are ordered segments (`user:u1:orders`). Broad invalidation matches
//! whole leading segments, so `user:u1` never touches `user:u10:*`.

use std::fmt;
use std::str::FromStr;

const SEPARATOR: &str = ":";

/// Identifies one cached query result slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
  segments: Vec<String>,
}

impl CacheKey {
  /// Create a key from its segments.
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      segments: segments.into_iter().map(Into::into).collect(),
    }
  }

  /// Append a segment.
  pub fn with(mut self, segment: impl Into<String>) -> Self {
    self.segments.push(segment.into());
    self
  }

  pub fn segments(&self) -> &[String] {
    &self.segments
  }

  /// Whether this key falls under `prefix`.
  pub fn starts_with(&self, prefix: &KeyPrefix) -> bool {
    self.segments.starts_with(&prefix.segments)
  }
}

impl fmt::Display for CacheKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.segments.join(SEPARATOR))
  }
}

impl FromStr for CacheKey {
  type Err = std::convert::Infallible;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(Self::from(s))
  }
}

/// The empty string is the key with no segments.
impl From<&str> for CacheKey {
  fn from(s: &str) -> Self {
    if s.is_empty() {
      return Self::new(Vec::<String>::new());
    }
    Self::new(s.split(SEPARATOR))
  }
}

impl From<String> for CacheKey {
  fn from(s: String) -> Self {
    Self::from(s.as_str())
  }
}

/// Leading segments shared by a family of keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
  segments: Vec<String>,
}

impl KeyPrefix {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      segments: segments.into_iter().map(Into::into).collect(),
    }
  }

  /// Whether this prefix matches every key (no segments).
  pub fn is_root(&self) -> bool {
    self.segments.is_empty()
  }
}

impl fmt::Display for KeyPrefix {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.is_root() {
      return write!(f, "*");
    }
    write!(f, "{}{}*", self.segments.join(SEPARATOR), SEPARATOR)
  }
}

impl From<&CacheKey> for KeyPrefix {
  fn from(key: &CacheKey) -> Self {
    Self {
      segments: key.segments.clone(),
    }
  }
}
