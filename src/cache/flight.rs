//! Single-flight fetch deduplication.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::entry::AnyValue;
use super::error::QueryError;
use super::key::CacheKey;

type SharedFetch = Shared<BoxFuture<'static, Result<AnyValue, String>>>;

struct Flight {
  id: u64,
  fetch: SharedFetch,
}

/// Table of in-progress fetches, at most one per key.
///
/// Callers arriving while a fetch for their key is running await that fetch
/// instead of starting their own. The table slot is released by whichever
/// caller first observes completion.
#[derive(Default)]
pub struct FlightGroup {
  flights: Mutex<HashMap<CacheKey, Flight>>,
  next_id: AtomicU64,
}

impl FlightGroup {
  pub fn new() -> Self {
    Self::default()
  }

  fn flights(&self) -> MutexGuard<'_, HashMap<CacheKey, Flight>> {
    match self.flights.lock() {
      Ok(guard) => guard,
      Err(poisoned) => {
        warn!("Recovered from poisoned flight table lock");
        poisoned.into_inner()
      }
    }
  }

  /// Run `fetch` for `key`, or join the fetch already running for it.
  ///
  /// `fetch` is only invoked when this call starts a new flight.
  pub async fn run<T, F, Fut>(&self, key: &CacheKey, fetch: F) -> Result<Arc<T>, QueryError>
  where
    T: Send + Sync + 'static,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, String>> + Send + 'static,
  {
    let (id, shared) = {
      let mut flights = self.flights();
      match flights.get(key) {
        Some(flight) => {
          debug!(%key, "joining in-flight fetch");
          (flight.id, flight.fetch.clone())
        }
        None => {
          let id = self.next_id.fetch_add(1, Ordering::Relaxed);
          let future = fetch();
          let shared = async move { future.await.map(|value| Arc::new(value) as AnyValue) }
            .boxed()
            .shared();
          flights.insert(
            key.clone(),
            Flight {
              id,
              fetch: shared.clone(),
            },
          );
          (id, shared)
        }
      }
    };

    let result = shared.await;

    {
      let mut flights = self.flights();
      if flights.get(key).is_some_and(|flight| flight.id == id) {
        flights.remove(key);
      }
    }

    match result {
      Ok(value) => value
        .downcast::<T>()
        .map_err(|_| QueryError::TypeMismatch { key: key.clone() }),
      Err(message) => Err(QueryError::Fetch(message)),
    }
  }

  /// Whether a fetch for `key` is currently running.
  pub fn is_in_flight(&self, key: &CacheKey) -> bool {
    self.flights().contains_key(key)
  }
}
