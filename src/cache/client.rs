//! Shared handle over one cache store and its flight table.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::entry::{CacheEntry, DEFAULT_TTL};
use super::error::QueryError;
use super::flight::FlightGroup;
use super::key::{CacheKey, KeyPrefix};
use super::store::CacheStore;

/// Per-query options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
  /// How long a stored result counts as fresh
  pub ttl: Duration,
  /// Serve fresh cached data immediately but refetch in the background
  pub stale_while_revalidate: bool,
  /// Skip the cache on mount
  pub force_refresh: bool,
}

impl Default for QueryOptions {
  fn default() -> Self {
    Self {
      ttl: DEFAULT_TTL,
      stale_while_revalidate: true,
      force_refresh: false,
    }
  }
}

struct Inner {
  store: CacheStore,
  flights: FlightGroup,
  defaults: QueryOptions,
}

/// Cache context handed to queries and paginators.
///
/// Cloning is cheap and every clone shares the same store, so independent
/// queries with equal keys see each other's results. Build separate clients
/// for isolated caches (one per test, one per tenant session).
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  pub fn new(defaults: QueryOptions) -> Self {
    Self {
      inner: Arc::new(Inner {
        store: CacheStore::new(),
        flights: FlightGroup::new(),
        defaults,
      }),
    }
  }

  pub fn store(&self) -> &CacheStore {
    &self.inner.store
  }

  pub fn default_options(&self) -> QueryOptions {
    self.inner.defaults
  }

  /// Fetch `key` through the flight table and write the outcome to the store.
  ///
  /// Concurrent calls for the same key share one invocation of `fetcher`;
  /// the store is written once per invocation, with the value on success or
  /// the error message on failure.
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &CacheKey,
    fetcher: F,
    ttl: Duration,
  ) -> Result<Arc<T>, QueryError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let client = self.clone();
    let flight_key = key.clone();
    self
      .inner
      .flights
      .run(key, move || {
        let future = fetcher();
        async move {
          client.store().set_loading(&flight_key, true);
          match future.await {
            Ok(value) => {
              let value = Arc::new(value);
              client.store().set_arc(&flight_key, Arc::clone(&value), Some(ttl));
              debug!(key = %flight_key, "fetched");
              Ok(ArcValue(value))
            }
            Err(message) => {
              client.store().set_error(&flight_key, message.clone());
              debug!(key = %flight_key, error = %message, "fetch failed");
              Err(message)
            }
          }
        }
      })
      .await
      .map(|shared: Arc<ArcValue<T>>| Arc::clone(&shared.0))
  }

  /// Fresh cached entry for `key`, if any.
  pub fn cached<T: Send + Sync + 'static>(
    &self,
    key: &CacheKey,
    ttl: Option<Duration>,
  ) -> Option<CacheEntry<T>> {
    self.inner.store.get(key, ttl)
  }

  pub fn is_fetching(&self, key: &CacheKey) -> bool {
    self.inner.flights.is_in_flight(key)
  }

  pub fn invalidate(&self, key: &CacheKey) {
    self.inner.store.invalidate(key);
  }

  pub fn invalidate_prefix(&self, prefix: &KeyPrefix) -> usize {
    self.inner.store.invalidate_prefix(prefix)
  }

  pub fn clear(&self) {
    self.inner.store.clear();
  }
}

impl Default for QueryClient {
  fn default() -> Self {
    Self::new(QueryOptions::default())
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryClient")
      .field("store", &self.inner.store)
      .field("defaults", &self.inner.defaults)
      .finish()
  }
}

/// Wrapper so the flight table and the store hold the same `Arc<T>`.
struct ArcValue<T>(Arc<T>);
