//! Cached document reads over any document source.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{CacheKey, QueryClient, QueryError};
use crate::pagination::{PaginationConfig, Paginator};
use crate::query::Query;

use super::filter::QuerySpec;
use super::keys::SellahKey;
use super::source::DocumentSource;
use super::types::Document;

/// Result from a cached read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: Arc<T>,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: Arc<T>) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: Arc<T>, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fetched from the document source
  Network,
  /// Served from the cache while fresh
  Cache,
}

/// Document source with transparent caching.
///
/// This is the context dashboards receive: it pairs one source with one
/// shared `QueryClient`, and builds queries and paginators bound to both.
#[derive(Clone)]
pub struct CachedDocuments {
  source: Arc<dyn DocumentSource>,
  client: QueryClient,
}

impl CachedDocuments {
  pub fn new(source: Arc<dyn DocumentSource>, client: QueryClient) -> Self {
    Self { source, client }
  }

  pub fn client(&self) -> &QueryClient {
    &self.client
  }

  pub fn source(&self) -> Arc<dyn DocumentSource> {
    Arc::clone(&self.source)
  }

  /// Run a collection query with a cache-first strategy.
  pub async fn list(&self, spec: &QuerySpec) -> Result<CacheResult<Vec<Document>>, QueryError> {
    let key = SellahKey::Collection(spec.clone()).cache_key();
    self.list_keyed(&key, spec).await
  }

  /// Like [`list`](Self::list), caching under a caller-chosen key
  /// (e.g. `SellahKey::Orders`) so scope invalidation reaches it.
  pub async fn list_keyed(
    &self,
    key: &CacheKey,
    spec: &QuerySpec,
  ) -> Result<CacheResult<Vec<Document>>, QueryError> {
    let ttl = self.client.default_options().ttl;
    if let Some(entry) = self.client.cached::<Vec<Document>>(key, Some(ttl)) {
      if let (Some(data), None) = (entry.data, entry.error) {
        debug!(%key, "list served from cache");
        return Ok(CacheResult::from_cache(data, entry.timestamp));
      }
    }

    let fetch = list_fetcher(Arc::clone(&self.source), spec.clone());
    let data = self.client.fetch(key, fetch, ttl).await?;
    Ok(CacheResult::from_network(data))
  }

  /// Get a single document by id with caching. Misses are cached too.
  pub async fn get(
    &self,
    collection: &str,
    id: &str,
  ) -> Result<CacheResult<Option<Document>>, QueryError> {
    let key = SellahKey::Document {
      collection: collection.to_string(),
      id: id.to_string(),
    }
    .cache_key();
    let ttl = self.client.default_options().ttl;

    if let Some(entry) = self.client.cached::<Option<Document>>(&key, Some(ttl)) {
      if let (Some(data), None) = (entry.data, entry.error) {
        debug!(%key, "document served from cache");
        return Ok(CacheResult::from_cache(data, entry.timestamp));
      }
    }

    let source = Arc::clone(&self.source);
    let collection = collection.to_string();
    let id = id.to_string();
    let data = self
      .client
      .fetch(
        &key,
        move || async move {
          source
            .get(&collection, &id)
            .await
            .map_err(|e| e.to_string())
        },
        ttl,
      )
      .await?;
    Ok(CacheResult::from_network(data))
  }

  /// Build a query that lists `spec` under `key`.
  pub fn list_query(&self, key: impl Into<CacheKey>, spec: QuerySpec) -> Query<Vec<Document>> {
    let source = Arc::clone(&self.source);
    Query::new(&self.client, key, move || {
      list_fetcher(Arc::clone(&source), spec.clone())()
    })
  }

  /// Build a paginator over `spec`.
  pub fn paginate<T, F>(&self, spec: QuerySpec, transform: F, config: PaginationConfig) -> Paginator<T>
  where
    T: Send + 'static,
    F: Fn(&Document) -> T + Send + Sync + 'static,
  {
    Paginator::new(Arc::clone(&self.source), spec, transform, config)
  }

  /// Drop everything cached for a user and, optionally, their company.
  ///
  /// Returns the number of entries removed.
  pub fn sign_out(&self, user_id: &str, company_id: Option<&str>) -> usize {
    let mut removed = self.client.invalidate_prefix(&SellahKey::user_scope(user_id));
    if let Some(company_id) = company_id {
      removed += self
        .client
        .invalidate_prefix(&SellahKey::company_scope(company_id));
    }
    info!(user_id, ?company_id, removed, "signed out, cache scopes dropped");
    removed
  }
}

fn list_fetcher(
  source: Arc<dyn DocumentSource>,
  spec: QuerySpec,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, Result<Vec<Document>, String>> {
  use futures::FutureExt;

  move || {
    async move {
      source
        .query(&spec)
        .await
        .map(|snapshots| snapshots.into_iter().map(|s| s.document).collect::<Vec<_>>())
        .map_err(|e| e.to_string())
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::QueryOptions;
  use crate::docstore::{Direction, SqliteSource};
  use serde_json::json;

  fn documents() -> (CachedDocuments, Arc<SqliteSource>) {
    let source = Arc::new(SqliteSource::open_in_memory().unwrap());
    source
      .put("orders", "o1", &json!({ "userId": "u1", "total": 10 }))
      .unwrap();
    source
      .put("orders", "o2", &json!({ "userId": "u1", "total": 25 }))
      .unwrap();
    source
      .put("products", "p1", &json!({ "companyId": "c1", "name": "Desk" }))
      .unwrap();
    let docs = CachedDocuments::new(source.clone(), QueryClient::new(QueryOptions::default()));
    (docs, source)
  }

  #[tokio::test]
  async fn test_list_serves_second_read_from_cache() {
    let (docs, source) = documents();
    let spec = QuerySpec::new("orders").where_eq("userId", "u1");

    let first = docs.list(&spec).await.unwrap();
    assert_eq!(first.source, CacheSource::Network);
    assert_eq!(first.data.len(), 2);

    // Writes bypass the cache until it is invalidated
    source
      .put("orders", "o3", &json!({ "userId": "u1", "total": 5 }))
      .unwrap();

    let second = docs.list(&spec).await.unwrap();
    assert_eq!(second.source, CacheSource::Cache);
    assert!(Arc::ptr_eq(&first.data, &second.data));

    docs
      .client()
      .invalidate(&SellahKey::Collection(spec.clone()).cache_key());
    let third = docs.list(&spec).await.unwrap();
    assert_eq!(third.source, CacheSource::Network);
    assert_eq!(third.data.len(), 3);
  }

  #[tokio::test]
  async fn test_get_caches_hits_and_misses() {
    let (docs, _source) = documents();

    let hit = docs.get("products", "p1").await.unwrap();
    assert_eq!(hit.source, CacheSource::Network);
    assert_eq!((*hit.data).as_ref().unwrap().str_field("name"), Some("Desk"));
    assert_eq!(docs.get("products", "p1").await.unwrap().source, CacheSource::Cache);

    let miss = docs.get("products", "nope").await.unwrap();
    assert!(miss.data.is_none());
    assert_eq!(docs.get("products", "nope").await.unwrap().source, CacheSource::Cache);
  }

  #[tokio::test]
  async fn test_sign_out_drops_user_and_company_scopes() {
    let (docs, _source) = documents();
    let orders = QuerySpec::new("orders").where_eq("userId", "u1");
    let products = QuerySpec::new("products").where_eq("companyId", "c1");

    docs
      .list_keyed(&SellahKey::Orders { user_id: "u1".into() }.cache_key(), &orders)
      .await
      .unwrap();
    docs
      .list_keyed(&SellahKey::Products { company_id: "c1".into() }.cache_key(), &products)
      .await
      .unwrap();
    docs
      .list_keyed(&SellahKey::Orders { user_id: "u2".into() }.cache_key(), &orders)
      .await
      .unwrap();

    assert_eq!(docs.sign_out("u1", Some("c1")), 2);
    assert_eq!(docs.client().store().len(), 1);
  }

  #[tokio::test]
  async fn test_list_query_shares_cache_with_list_keyed() {
    let (docs, _source) = documents();
    let spec = QuerySpec::new("orders").order_by("total", Direction::Desc);
    let key = SellahKey::Orders {
      user_id: "u1".into(),
    };

    docs.list_keyed(&key.cache_key(), &spec).await.unwrap();

    let mut query = docs
      .list_query(&key, spec)
      .with_stale_while_revalidate(false);
    query.mount();
    assert!(!query.is_loading());
    let ids: Vec<_> = query.data().unwrap().iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["o2", "o1"]);
  }

  #[tokio::test]
  async fn test_paginate_uses_source() {
    let (docs, _source) = documents();
    let mut pages = docs.paginate(
      QuerySpec::new("orders").order_by("total", Direction::Asc),
      |doc: &Document| doc.id.clone(),
      PaginationConfig {
        page_size: 1,
        initial_load: true,
      },
    );
    pages.mount();
    pages.wait().await;
    pages.load_more();
    pages.wait().await;
    assert_eq!(pages.data(), &["o1", "o2"]);
  }
}
