//! Query specifications understood by document sources.

use color_eyre::{eyre::eyre, Report};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use super::types::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
  Eq,
  NotEq,
  Lt,
  Le,
  Gt,
  Ge,
}

impl FilterOp {
  pub(crate) fn sql(self) -> &'static str {
    match self {
      FilterOp::Eq => "IS",
      FilterOp::NotEq => "IS NOT",
      FilterOp::Lt => "<",
      FilterOp::Le => "<=",
      FilterOp::Gt => ">",
      FilterOp::Ge => ">=",
    }
  }
}

/// A single field condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
  pub field: String,
  pub op: FilterOp,
  pub value: Value,
}

/// Parse `field<op>value`, e.g. `status=paid`, `total>=100`.
///
/// The value is read as JSON when it parses as JSON, otherwise as a string.
impl FromStr for Filter {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // Two-character operators first so ">=" isn't read as ">"
    const OPS: &[(&str, FilterOp)] = &[
      ("!=", FilterOp::NotEq),
      ("<=", FilterOp::Le),
      (">=", FilterOp::Ge),
      ("=", FilterOp::Eq),
      ("<", FilterOp::Lt),
      (">", FilterOp::Gt),
    ];

    for (token, op) in OPS {
      if let Some((field, raw)) = s.split_once(token) {
        let field = field.trim();
        if field.is_empty() {
          return Err(eyre!("Filter '{}' has no field name", s));
        }
        let raw = raw.trim();
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        return Ok(Filter {
          field: field.to_string(),
          op: *op,
          value,
        });
      }
    }

    Err(eyre!(
      "Invalid filter '{}': expected field=value (or !=, <, <=, >, >=)",
      s
    ))
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Asc,
  Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
  pub field: String,
  pub direction: Direction,
}

/// Parse `field` or `field:asc` / `field:desc`.
impl FromStr for OrderBy {
  type Err = Report;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (field, direction) = match s.rsplit_once(':') {
      Some((field, "asc")) => (field, Direction::Asc),
      Some((field, "desc")) => (field, Direction::Desc),
      Some((_, other)) => return Err(eyre!("Unknown sort direction '{}'", other)),
      None => (s, Direction::Asc),
    };
    if field.is_empty() {
      return Err(eyre!("Order '{}' has no field name", s));
    }
    Ok(OrderBy {
      field: field.to_string(),
      direction,
    })
  }
}

/// Filter + sort over one collection, with optional pagination clauses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySpec {
  pub collection: String,
  #[serde(default)]
  pub filters: Vec<Filter>,
  #[serde(default)]
  pub order_by: Vec<OrderBy>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub limit: Option<usize>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub start_after: Option<Cursor>,
}

impl QuerySpec {
  pub fn new(collection: impl Into<String>) -> Self {
    Self {
      collection: collection.into(),
      filters: Vec::new(),
      order_by: Vec::new(),
      limit: None,
      start_after: None,
    }
  }

  pub fn filter(mut self, field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
    self.filters.push(Filter {
      field: field.into(),
      op,
      value: value.into(),
    });
    self
  }

  pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
    self.filter(field, FilterOp::Eq, value)
  }

  pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
    self.order_by.push(OrderBy {
      field: field.into(),
      direction,
    });
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn start_after(mut self, cursor: Cursor) -> Self {
    self.start_after = Some(cursor);
    self
  }

  pub fn has_pagination(&self) -> bool {
    self.limit.is_some() || self.start_after.is_some()
  }

  /// This query with limit and cursor removed.
  pub fn without_pagination(&self) -> Self {
    Self {
      limit: None,
      start_after: None,
      ..self.clone()
    }
  }

  /// Stable hex digest of collection, filters and ordering.
  ///
  /// Pagination clauses don't contribute, so every page of one query shares
  /// a fingerprint.
  pub fn fingerprint(&self) -> String {
    let canonical = serde_json::json!({
      "collection": self.collection,
      "filters": self.filters,
      "order_by": self.order_by,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_eq_filter_reads_json() {
    let filter: Filter = "total=100".parse().unwrap();
    assert_eq!(filter.field, "total");
    assert_eq!(filter.op, FilterOp::Eq);
    assert_eq!(filter.value, json!(100));
  }

  #[test]
  fn test_parse_filter_falls_back_to_string() {
    let filter: Filter = "status=paid".parse().unwrap();
    assert_eq!(filter.value, json!("paid"));
  }

  #[test]
  fn test_parse_two_char_operators() {
    let filter: Filter = "total>=10".parse().unwrap();
    assert_eq!(filter.op, FilterOp::Ge);
    assert_eq!(filter.value, json!(10));

    let filter: Filter = "status!=draft".parse().unwrap();
    assert_eq!(filter.op, FilterOp::NotEq);
    assert_eq!(filter.field, "status");
  }

  #[test]
  fn test_parse_filter_rejects_missing_operator() {
    assert!("status".parse::<Filter>().is_err());
    assert!("=paid".parse::<Filter>().is_err());
  }

  #[test]
  fn test_parse_order_by() {
    let order: OrderBy = "createdAt:desc".parse().unwrap();
    assert_eq!(order.field, "createdAt");
    assert_eq!(order.direction, Direction::Desc);

    let order: OrderBy = "name".parse().unwrap();
    assert_eq!(order.direction, Direction::Asc);

    assert!("name:sideways".parse::<OrderBy>().is_err());
  }

  #[test]
  fn test_fingerprint_ignores_pagination() {
    let base = QuerySpec::new("orders")
      .where_eq("userId", "u1")
      .order_by("createdAt", Direction::Desc);
    let paged = base.clone().limit(10).start_after(Cursor::new("abc"));

    assert_eq!(base.fingerprint(), paged.fingerprint());
    assert_eq!(base.fingerprint().len(), 64);
  }

  #[test]
  fn test_fingerprint_differs_by_filter() {
    let a = QuerySpec::new("orders").where_eq("userId", "u1");
    let b = QuerySpec::new("orders").where_eq("userId", "u2");
    assert_ne!(a.fingerprint(), b.fingerprint());
  }

  #[test]
  fn test_without_pagination() {
    let spec = QuerySpec::new("orders").limit(5).start_after(Cursor::new("x"));
    assert!(spec.has_pagination());
    let stripped = spec.without_pagination();
    assert!(!stripped.has_pagination());
    assert_eq!(stripped.collection, "orders");
  }
}
