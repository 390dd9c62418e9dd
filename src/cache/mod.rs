//! In-memory query cache.
//!
//! This module provides the caching layer the dashboards read through:
//! - A keyed store of query results with read-time TTL checks and lazy eviction
//! - Structured keys with prefix invalidation (e.g. everything for a user on sign-out)
//! - Single-flight deduplication so concurrent fetches of one key share a result
//! - A cheap-to-clone `QueryClient` context that ties the pieces together

mod client;
mod entry;
mod error;
mod flight;
mod key;
mod store;

pub use client::{QueryClient, QueryOptions};
pub use entry::{is_expired, CacheEntry, DEFAULT_TTL};
pub use error::QueryError;
pub use flight::FlightGroup;
pub use key::{CacheKey, KeyPrefix};
pub use store::CacheStore;
