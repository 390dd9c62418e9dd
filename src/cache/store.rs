//! In-memory cache store.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::entry::{is_expired, AnyValue, CacheEntry, StoredEntry, DEFAULT_TTL};
use super::key::{CacheKey, KeyPrefix};

/// Key-value store of query results with read-time staleness checks.
///
/// There is no background eviction and no size bound: stale entries are
/// dropped when a read finds them expired. Every operation holds the lock
/// only for its own body, so each one is atomic with respect to the others.
/// No operation fails; missing keys read as `None` and invalidate as no-ops.
#[derive(Default)]
pub struct CacheStore {
  entries: Mutex<HashMap<CacheKey, StoredEntry>>,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self, op: &'static str) -> MutexGuard<'_, HashMap<CacheKey, StoredEntry>> {
    match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!(op, "Recovered from poisoned cache lock");
        poisoned.into_inner()
      }
    }
  }

  /// Store `data` under `key`, stamping the current time.
  ///
  /// Clears loading and error. A `ttl` given here becomes the entry's default
  /// for reads that don't name one.
  pub fn set<T: Send + Sync + 'static>(&self, key: &CacheKey, data: T, ttl: Option<Duration>) {
    self.set_arc(key, Arc::new(data), ttl);
  }

  /// Like [`set`](Self::set), sharing an existing allocation.
  pub fn set_arc<T: Send + Sync + 'static>(
    &self,
    key: &CacheKey,
    data: Arc<T>,
    ttl: Option<Duration>,
  ) {
    let value: AnyValue = data;
    self.entries("set").insert(
      key.clone(),
      StoredEntry {
        value: Some(value),
        timestamp: Utc::now(),
        loading: false,
        error: None,
        ttl,
      },
    );
    debug!(%key, "cache set");
  }

  /// Read the entry for `key` if it is still fresh.
  ///
  /// TTL resolution: `ttl` if given, else the TTL remembered by `set`, else
  /// five minutes. A stale entry is removed as a side effect. A value of a
  /// different type than `T` reads as a miss.
  pub fn get<T: Send + Sync + 'static>(
    &self,
    key: &CacheKey,
    ttl: Option<Duration>,
  ) -> Option<CacheEntry<T>> {
    let mut entries = self.entries("get");
    let stored = entries.get(key)?;

    let ttl = ttl.or(stored.ttl).unwrap_or(DEFAULT_TTL);
    if is_expired(stored.timestamp, ttl) {
      entries.remove(key);
      debug!(%key, "cache entry expired");
      return None;
    }

    let data = match &stored.value {
      Some(value) => match Arc::clone(value).downcast::<T>() {
        Ok(data) => Some(data),
        Err(_) => {
          warn!(%key, expected = std::any::type_name::<T>(), "cache value type mismatch");
          return None;
        }
      },
      None => None,
    };

    Some(CacheEntry {
      data,
      timestamp: stored.timestamp,
      loading: stored.loading,
      error: stored.error.clone(),
    })
  }

  /// Mark `key` as loading (or not), creating an empty entry if absent.
  pub fn set_loading(&self, key: &CacheKey, loading: bool) {
    self
      .entries("set_loading")
      .entry(key.clone())
      .or_insert_with(StoredEntry::empty)
      .loading = loading;
  }

  /// Record a fetch failure for `key`, creating an empty entry if absent.
  pub fn set_error(&self, key: &CacheKey, message: impl Into<String>) {
    let mut entries = self.entries("set_error");
    let entry = entries.entry(key.clone()).or_insert_with(StoredEntry::empty);
    entry.error = Some(message.into());
    entry.loading = false;
  }

  /// Remove one entry.
  pub fn invalidate(&self, key: &CacheKey) {
    if self.entries("invalidate").remove(key).is_some() {
      debug!(%key, "cache entry invalidated");
    }
  }

  /// Remove every entry under `prefix`, returning how many were removed.
  pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> usize {
    let mut entries = self.entries("invalidate_prefix");
    let before = entries.len();
    entries.retain(|key, _| !key.starts_with(prefix));
    let removed = before - entries.len();
    debug!(%prefix, removed, "cache prefix invalidated");
    removed
  }

  /// Remove everything.
  pub fn clear(&self) {
    self.entries("clear").clear();
  }

  pub fn len(&self) -> usize {
    self.entries("len").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn contains(&self, key: &CacheKey) -> bool {
    self.entries("contains").contains_key(key)
  }
}

impl std::fmt::Debug for CacheStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheStore")
      .field("len", &self.len())
      .finish_non_exhaustive()
  }
}
