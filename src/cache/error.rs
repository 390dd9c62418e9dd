use thiserror::Error;

use super::key::CacheKey;

/// Errors surfaced by queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
  /// The fetcher failed; carries its message
  #[error("{0}")]
  Fetch(String),

  /// A value shared under this key has a different type than requested
  #[error("cached value for {key} has an unexpected type")]
  TypeMismatch { key: CacheKey },
}

impl QueryError {
  /// Message suitable for rendering or storing in the cache.
  pub fn message(&self) -> String {
    self.to_string()
  }
}
