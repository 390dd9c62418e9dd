//! Async query abstraction for data fetching with caching support.
//!
//! Inspired by TanStack Query, this module provides a `Query<T>` type that
//! binds a cache key and a fetcher to loading/data/error state, reading
//! through the shared [`QueryClient`].
//!
//! # Example
//!
//! ```ignore
//! let source = documents.clone();
//! let mut query = Query::new(&client, SellahKey::Orders { user_id }, move || {
//!     let source = source.clone();
//!     async move { source.list(&spec).await.map_err(|e| e.to_string()) }
//! });
//!
//! // Serve from cache or start fetching
//! query.mount();
//!
//! // In event loop tick
//! if query.poll() {
//!     // State changed, trigger re-render
//! }
//!
//! // In render
//! if query.is_loading() { render_spinner() }
//! if let Some(orders) = query.data() { render_orders(orders) }
//! if let Some(e) = query.error() { render_error(e) }
//! ```

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::cache::{is_expired, CacheEntry, CacheKey, QueryClient, QueryError, QueryOptions};

/// The state of a query
#[derive(Debug)]
pub struct QueryState<T> {
  /// Last successful result, kept across later failures
  pub data: Option<Arc<T>>,
  /// When `data` was fetched or stored
  pub timestamp: Option<DateTime<Utc>>,
  pub loading: bool,
  pub error: Option<String>,
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    self.loading
  }

  pub fn is_success(&self) -> bool {
    self.data.is_some() && self.error.is_none()
  }

  pub fn is_error(&self) -> bool {
    self.error.is_some()
  }

  pub fn is_idle(&self) -> bool {
    !self.loading && self.data.is_none() && self.error.is_none()
  }

  pub fn data(&self) -> Option<&T> {
    self.data.as_deref()
  }

  pub fn error(&self) -> Option<&str> {
    self.error.as_deref()
  }
}

impl<T> Default for QueryState<T> {
  fn default() -> Self {
    Self {
      data: None,
      timestamp: None,
      loading: false,
      error: None,
    }
  }
}

impl<T> Clone for QueryState<T> {
  fn clone(&self) -> Self {
    Self {
      data: self.data.clone(),
      timestamp: self.timestamp,
      loading: self.loading,
      error: self.error.clone(),
    }
  }
}

/// A boxed future that returns a Result<T, String>
type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

/// A factory function that creates futures for fetching data
type FetcherFn<T> = Arc<dyn Fn() -> BoxFuture<T> + Send + Sync>;

type Outcome<T> = Result<Arc<T>, QueryError>;

/// Cached async query with state management.
///
/// Query<T> encapsulates:
/// - The cache key and fetching logic (via a closure)
/// - Loading/data/error state, with data kept across failed refetches
/// - Async result handling via channels
/// - Cache-first reads with optional stale-while-revalidate
///
/// Only the result of the most recently started fetch reaches the state.
/// Earlier fetches, and fetches still running when the query is dropped,
/// complete into the store only.
pub struct Query<T> {
  client: QueryClient,
  key: CacheKey,
  options: QueryOptions,
  state: QueryState<T>,
  fetcher: FetcherFn<T>,
  receiver: Option<mpsc::UnboundedReceiver<Outcome<T>>>,
  revalidating: bool,
}

impl<T: Send + Sync + 'static> Query<T> {
  /// Create a new query with the given key and fetcher function.
  ///
  /// The fetcher is a closure that returns a future. It is called whenever
  /// the query needs data the cache can't provide, and on `refetch()`.
  /// Options start from the client's defaults.
  pub fn new<F, Fut>(client: &QueryClient, key: impl Into<CacheKey>, fetcher: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    Self {
      client: client.clone(),
      key: key.into(),
      options: client.default_options(),
      state: QueryState::default(),
      fetcher: Arc::new(move || -> BoxFuture<T> { Box::pin(fetcher()) }),
      receiver: None,
      revalidating: false,
    }
  }

  pub fn with_options(mut self, options: QueryOptions) -> Self {
    self.options = options;
    self
  }

  /// Set how long fetched data stays fresh in the cache.
  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.options.ttl = ttl;
    self
  }

  pub fn with_stale_while_revalidate(mut self, enabled: bool) -> Self {
    self.options.stale_while_revalidate = enabled;
    self
  }

  pub fn with_force_refresh(mut self, enabled: bool) -> Self {
    self.options.force_refresh = enabled;
    self
  }

  /// Get the current state of the query.
  pub fn state(&self) -> &QueryState<T> {
    &self.state
  }

  /// Get the data if the query has any.
  pub fn data(&self) -> Option<&T> {
    self.state.data()
  }

  /// Check if the query is loading without data to show.
  pub fn is_loading(&self) -> bool {
    self.state.is_loading()
  }

  /// Check if a background refresh of shown data is running.
  pub fn is_revalidating(&self) -> bool {
    self.revalidating
  }

  /// Get the error message if the last fetch failed.
  pub fn error(&self) -> Option<&str> {
    self.state.error()
  }

  pub fn key(&self) -> &CacheKey {
    &self.key
  }

  pub fn options(&self) -> QueryOptions {
    self.options
  }

  /// Check if the shown data is older than the TTL.
  pub fn is_stale(&self) -> bool {
    match (&self.state.data, self.state.timestamp) {
      (Some(_), Some(at)) => is_expired(at, self.options.ttl),
      (Some(_), None) => true,
      _ => false,
    }
  }

  /// Run the fetch sequence for the current key and options.
  ///
  /// Fresh cached data is adopted immediately unless `force_refresh` is set;
  /// with `stale_while_revalidate` a background refetch follows. Otherwise
  /// the query goes into loading and fetches.
  pub fn mount(&mut self) {
    self.receiver = None;
    self.revalidating = false;

    if !self.options.force_refresh {
      if let Some(CacheEntry {
        data: Some(data),
        timestamp,
        error: None,
        ..
      }) = self.client.cached::<T>(&self.key, Some(self.options.ttl))
      {
        debug!(key = %self.key, "serving cached data");
        self.state = QueryState {
          data: Some(data),
          timestamp: Some(timestamp),
          loading: false,
          error: None,
        };
        if self.options.stale_while_revalidate {
          self.revalidating = true;
          self.start_fetch();
        }
        return;
      }
    }

    self.state.loading = true;
    self.client.store().set_loading(&self.key, true);
    self.start_fetch();
  }

  /// Point the query at another key, re-running the fetch sequence if it changed.
  pub fn set_key(&mut self, key: impl Into<CacheKey>) {
    let key = key.into();
    if key == self.key {
      return;
    }
    self.key = key;
    self.state = QueryState::default();
    self.mount();
  }

  /// Replace the options, re-running the fetch sequence if they changed.
  pub fn set_options(&mut self, options: QueryOptions) {
    if options == self.options {
      return;
    }
    self.options = options;
    self.mount();
  }

  /// Fetch bypassing the cache and wait for the result.
  ///
  /// A fetch of the same key already running elsewhere is joined rather than
  /// duplicated. The outcome lands in the state and is also returned, so a
  /// failure can be handled by the caller.
  ///
  /// State is only touched once the fetch completes. Dropping the returned
  /// future leaves any pending fetch in place for `poll`/`wait`.
  pub async fn refetch(&mut self) -> Result<Arc<T>, QueryError> {
    let fetcher = Arc::clone(&self.fetcher);
    let result = self
      .client
      .fetch(&self.key, move || fetcher(), self.options.ttl)
      .await;

    // A pending fetch is older than this one and must not overwrite it
    self.receiver = None;
    self.apply(result.clone());
    result
  }

  /// Remove this query's cache entry without refetching.
  pub fn invalidate(&self) {
    self.client.invalidate(&self.key);
  }

  /// Poll for results from a pending fetch.
  ///
  /// Returns `true` if the state changed (data arrived or error occurred).
  /// Call this in your event loop tick handler.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    // Try to receive without blocking
    match receiver.try_recv() {
      Ok(result) => {
        self.receiver = None;
        self.apply(result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        // Sender dropped without sending - treat as error
        self.receiver = None;
        self.apply(Err(cancelled()));
        true
      }
    }
  }

  /// Wait for a pending fetch and apply it.
  ///
  /// Returns `false` immediately if nothing is pending.
  pub async fn wait(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    let result = receiver.recv().await.unwrap_or_else(|| Err(cancelled()));
    self.receiver = None;
    self.apply(result);
    true
  }

  fn apply(&mut self, result: Outcome<T>) {
    self.revalidating = false;
    match result {
      Ok(data) => {
        self.state = QueryState {
          data: Some(data),
          timestamp: Some(Utc::now()),
          loading: false,
          error: None,
        };
      }
      Err(error) => {
        self.state.loading = false;
        self.state.error = Some(error.message());
      }
    }
  }

  /// Internal: start the fetch operation
  fn start_fetch(&mut self) {
    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);

    let client = self.client.clone();
    let key = self.key.clone();
    let ttl = self.options.ttl;
    let fetcher = Arc::clone(&self.fetcher);
    tokio::spawn(async move {
      let result = client.fetch(&key, move || fetcher(), ttl).await;
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send(result);
    });
  }
}

fn cancelled() -> QueryError {
  QueryError::Fetch("Query was cancelled".to_string())
}

// Query is not Clone because the receiver is owned.
// If you need to share a query, wrap it in Arc<Mutex<Query<T>>>.

impl<T: std::fmt::Debug> std::fmt::Debug for Query<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Query")
      .field("key", &self.key)
      .field("state", &self.state)
      .field("options", &self.options)
      .field("revalidating", &self.revalidating)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicU32, Ordering};

  fn counting_query(
    client: &QueryClient,
    key: &str,
    counter: &Arc<AtomicU32>,
  ) -> Query<u32> {
    let counter = Arc::clone(counter);
    Query::new(client, key, move || {
      let counter = Arc::clone(&counter);
      async move { Ok::<_, String>(counter.fetch_add(1, Ordering::SeqCst)) }
    })
  }

  #[tokio::test]
  async fn test_query_success() {
    let client = QueryClient::default();
    let mut query = Query::new(&client, "greeting", || async { Ok::<_, String>("hello") })
      .with_ttl(Duration::from_millis(5000));

    assert!(query.state().is_idle());

    query.mount();
    assert!(query.is_loading());
    assert!(query.data().is_none());

    assert!(query.wait().await);
    assert!(!query.is_loading());
    assert_eq!(query.data(), Some(&"hello"));
    assert!(query.error().is_none());
  }

  #[tokio::test]
  async fn test_query_error() {
    let client = QueryClient::default();
    let mut query: Query<i32> =
      Query::new(&client, "broken", || async { Err("Something went wrong".to_string()) });

    query.mount();
    query.wait().await;

    assert!(query.state().is_error());
    assert!(!query.is_loading());
    assert_eq!(query.error(), Some("Something went wrong"));

    let entry = client.cached::<i32>(query.key(), None).unwrap();
    assert_eq!(entry.error.as_deref(), Some("Something went wrong"));
  }

  #[tokio::test]
  async fn test_cached_without_revalidate_skips_fetcher() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));

    let mut first = counting_query(&client, "orders", &counter);
    first.mount();
    first.wait().await;
    assert_eq!(first.data(), Some(&0));

    let mut second = counting_query(&client, "orders", &counter).with_stale_while_revalidate(false);
    second.mount();

    assert!(!second.is_loading());
    assert_eq!(second.data(), Some(&0));
    assert!(!second.wait().await);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_cached_with_revalidate_refreshes_in_background() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));

    let mut first = counting_query(&client, "orders", &counter);
    first.mount();
    first.wait().await;

    let mut second = counting_query(&client, "orders", &counter);
    second.mount();
    assert_eq!(second.data(), Some(&0));
    assert!(!second.is_loading());
    assert!(second.is_revalidating());

    assert!(second.wait().await);
    assert_eq!(second.data(), Some(&1));
    assert!(!second.is_revalidating());
    assert_eq!(
      client.cached::<u32>(second.key(), None).unwrap().data.as_deref(),
      Some(&1)
    );
  }

  #[tokio::test]
  async fn test_force_refresh_ignores_cache() {
    let client = QueryClient::default();
    client.store().set(&CacheKey::from("orders"), 99u32, None);
    let counter = Arc::new(AtomicU32::new(0));

    let mut query = counting_query(&client, "orders", &counter).with_force_refresh(true);
    query.mount();
    assert!(query.is_loading());

    query.wait().await;
    assert_eq!(query.data(), Some(&0));
  }

  #[tokio::test]
  async fn test_expired_cache_fetches() {
    let client = QueryClient::default();
    client.store().set(&CacheKey::from("orders"), 99u32, None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let counter = Arc::new(AtomicU32::new(0));

    let mut query = counting_query(&client, "orders", &counter)
      .with_ttl(Duration::from_millis(10))
      .with_stale_while_revalidate(false);
    query.mount();
    assert!(query.is_loading());

    query.wait().await;
    assert_eq!(query.data(), Some(&0));
  }

  #[tokio::test]
  async fn test_refetch_bypasses_cache() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));

    let mut query = counting_query(&client, "orders", &counter);
    query.mount();
    query.wait().await;

    let value = query.refetch().await.unwrap();
    assert_eq!(*value, 1);
    assert_eq!(query.data(), Some(&1));
    assert_eq!(counter.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_refetch_returns_error_and_keeps_data() {
    let client = QueryClient::default();
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fail_clone = Arc::clone(&fail);

    let mut query = Query::new(&client, "orders", move || {
      let fail = Arc::clone(&fail_clone);
      async move {
        if fail.load(Ordering::SeqCst) {
          Err("permission denied".to_string())
        } else {
          Ok(7)
        }
      }
    });
    query.mount();
    query.wait().await;

    fail.store(true, Ordering::SeqCst);
    let result = query.refetch().await;

    assert_eq!(result, Err(QueryError::Fetch("permission denied".to_string())));
    assert_eq!(query.error(), Some("permission denied"));
    assert_eq!(query.data(), Some(&7));
    assert!(!query.is_loading());
  }

  #[tokio::test]
  async fn test_abandoned_refetch_leaves_state_usable() {
    let client = QueryClient::default();
    let mut query = Query::new(&client, "user:u1:chats", || async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok::<_, String>(7u32)
    });

    let timed_out = tokio::time::timeout(Duration::from_millis(10), query.refetch()).await;
    assert!(timed_out.is_err());
    assert!(!query.is_loading());
    assert!(query.state().is_idle());

    // A fetch started by mount survives an abandoned refetch
    query.mount();
    let timed_out = tokio::time::timeout(Duration::from_millis(10), query.refetch()).await;
    assert!(timed_out.is_err());
    assert!(query.is_loading());
    assert!(query.wait().await);
    assert!(!query.is_loading());
    assert_eq!(query.data(), Some(&7));
  }

  #[tokio::test]
  async fn test_set_key_reruns_only_on_change() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));

    let mut query = counting_query(&client, "user:a:orders", &counter)
      .with_stale_while_revalidate(false);
    query.mount();
    query.wait().await;

    query.set_key("user:a:orders");
    assert!(!query.wait().await);

    query.set_key("user:b:orders");
    assert!(query.is_loading());
    assert!(query.data().is_none());
    query.wait().await;
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_set_options_reruns_on_change() {
    let client = QueryClient::default();
    let counter = Arc::new(AtomicU32::new(0));

    let mut query = counting_query(&client, "orders", &counter);
    query.mount();
    query.wait().await;

    let options = query.options();
    query.set_options(options);
    assert!(!query.wait().await);

    query.set_options(QueryOptions {
      force_refresh: true,
      ..options
    });
    assert!(query.wait().await);
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_superseded_fetch_is_discarded() {
    let client = QueryClient::default();
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = Arc::clone(&calls);
    let mut query = Query::new(&client, "user:slow", move || {
      let call = calls_clone.fetch_add(1, Ordering::SeqCst);
      async move {
        if call == 0 {
          tokio::time::sleep(Duration::from_millis(50)).await;
          Ok::<_, String>("first")
        } else {
          Ok("second")
        }
      }
    });
    query.mount();

    // Switching keys leaves the slow fetch to finish into the store only
    query.set_key("user:fast");
    query.wait().await;
    assert_eq!(query.data(), Some(&"second"));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!query.poll());
    assert_eq!(query.data(), Some(&"second"));
    let slow = client.cached::<&str>(&CacheKey::from("user:slow"), None).unwrap();
    assert_eq!(slow.data.as_deref(), Some(&"first"));
  }

  #[tokio::test]
  async fn test_dropped_query_still_fills_cache() {
    let client = QueryClient::default();
    let mut query = Query::new(&client, "orders", || async {
      tokio::time::sleep(Duration::from_millis(20)).await;
      Ok::<_, String>(5)
    });
    query.mount();
    drop(query);

    tokio::time::sleep(Duration::from_millis(60)).await;
    let entry = client.cached::<i32>(&CacheKey::from("orders"), None).unwrap();
    assert_eq!(entry.data.as_deref(), Some(&5));
  }

  #[tokio::test]
  async fn test_invalidate_removes_entry() {
    let client = QueryClient::default();
    let mut query = Query::new(&client, "orders", || async { Ok::<_, String>(1) });
    query.mount();
    query.wait().await;

    query.invalidate();
    assert!(client.cached::<i32>(query.key(), None).is_none());
    assert_eq!(query.data(), Some(&1));
  }

  #[tokio::test]
  async fn test_query_stale() {
    let client = QueryClient::default();
    let mut query =
      Query::new(&client, "answer", || async { Ok::<_, String>(42) }).with_ttl(Duration::ZERO);

    query.mount();
    query.wait().await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert!(query.is_stale());
  }

  #[tokio::test]
  async fn test_poll_without_fetch_is_noop() {
    let client = QueryClient::default();
    let mut query = Query::new(&client, "k", || async { Ok::<_, String>(1) });
    assert!(!query.poll());
  }
}
