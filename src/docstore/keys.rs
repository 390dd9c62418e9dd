//! Cache key families used by the dashboards.

use crate::cache::{CacheKey, KeyPrefix};

use super::filter::QuerySpec;

/// Query key types for dashboard reads.
///
/// Per-user and per-company families live under `user:<id>` and
/// `company:<id>` so a sign-out can drop them with one prefix each.
#[derive(Clone, Debug)]
pub enum SellahKey {
  /// Orders placed by a user
  Orders { user_id: String },
  /// Chat threads of a user
  Chats { user_id: String },
  /// Product catalogue of a company
  Products { company_id: String },
  /// Activity history of a company
  Activity { company_id: String },
  /// A single document by id
  Document { collection: String, id: String },
  /// Any filtered, ordered collection query
  Collection(QuerySpec),
}

impl SellahKey {
  /// Prefix covering every key scoped to a user.
  pub fn user_scope(user_id: &str) -> KeyPrefix {
    KeyPrefix::new(["user", user_id])
  }

  /// Prefix covering every key scoped to a company.
  pub fn company_scope(company_id: &str) -> KeyPrefix {
    KeyPrefix::new(["company", company_id])
  }

  pub fn cache_key(&self) -> CacheKey {
    match self {
      Self::Orders { user_id } => CacheKey::new(["user", user_id.as_str(), "orders"]),
      Self::Chats { user_id } => CacheKey::new(["user", user_id.as_str(), "chats"]),
      Self::Products { company_id } => CacheKey::new(["company", company_id.as_str(), "products"]),
      Self::Activity { company_id } => CacheKey::new(["company", company_id.as_str(), "activity"]),
      Self::Document { collection, id } => CacheKey::new(["doc", collection.as_str(), id.as_str()]),
      // Hashed for stable, fixed-length keys
      Self::Collection(spec) => {
        CacheKey::new(["collection".to_string(), spec.collection.clone(), spec.fingerprint()])
      }
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Orders { user_id } => format!("orders of user {}", user_id),
      Self::Chats { user_id } => format!("chats of user {}", user_id),
      Self::Products { company_id } => format!("products of company {}", company_id),
      Self::Activity { company_id } => format!("activity of company {}", company_id),
      Self::Document { collection, id } => format!("{} {}", collection, id),
      Self::Collection(spec) => {
        if spec.filters.is_empty() {
          format!("all {}", spec.collection)
        } else {
          format!("{} ({} filters)", spec.collection, spec.filters.len())
        }
      }
    }
  }
}

impl From<SellahKey> for CacheKey {
  fn from(key: SellahKey) -> Self {
    key.cache_key()
  }
}

impl From<&SellahKey> for CacheKey {
  fn from(key: &SellahKey) -> Self {
    key.cache_key()
  }
}
