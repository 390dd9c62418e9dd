//! Cache entries and staleness.

use chrono::{DateTime, Utc};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live when neither the caller nor the entry names one.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Type-erased value as held by the store.
pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

/// A typed view of one cache slot.
#[derive(Debug)]
pub struct CacheEntry<T> {
  /// Cached value, absent while the first fetch is loading or after an error
  pub data: Option<Arc<T>>,
  /// When the value was stored (or the slot created)
  pub timestamp: DateTime<Utc>,
  pub loading: bool,
  pub error: Option<String>,
}

impl<T> CacheEntry<T> {
  /// Whether this entry carries usable data (present and not errored).
  pub fn is_ready(&self) -> bool {
    self.data.is_some() && self.error.is_none()
  }
}

impl<T> Clone for CacheEntry<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      timestamp: self.timestamp,
      loading: self.loading,
      error: self.error.clone(),
    }
  }
}

impl<T: PartialEq> PartialEq for CacheEntry<T> {
  fn eq(&self, other: &Self) -> bool {
    self.data == other.data
      && self.timestamp == other.timestamp
      && self.loading == other.loading
      && self.error == other.error
  }
}

/// Stored form of an entry.
#[derive(Clone)]
pub(crate) struct StoredEntry {
  pub value: Option<AnyValue>,
  pub timestamp: DateTime<Utc>,
  pub loading: bool,
  pub error: Option<String>,
  /// TTL remembered from `set`, used when a read doesn't name one
  pub ttl: Option<Duration>,
}

impl StoredEntry {
  pub fn empty() -> Self {
    Self {
      value: None,
      timestamp: Utc::now(),
      loading: false,
      error: None,
      ttl: None,
    }
  }
}

/// Check whether something stamped at `timestamp` has outlived `ttl`.
///
/// A TTL beyond chrono's range (e.g. `Duration::MAX`) never expires.
pub fn is_expired(timestamp: DateTime<Utc>, ttl: Duration) -> bool {
  match chrono::Duration::from_std(ttl) {
    Ok(ttl) => Utc::now() - timestamp > ttl,
    Err(_) => false,
  }
}
