use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A raw record as returned by a document source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub id: String,
  pub fields: Value,
}

impl Document {
  pub fn new(id: impl Into<String>, fields: Value) -> Self {
    Self {
      id: id.into(),
      fields,
    }
  }

  /// Look up a field by dotted path (e.g. "customer.name").
  pub fn field(&self, path: &str) -> Option<&Value> {
    lookup(&self.fields, path)
  }

  pub fn str_field(&self, path: &str) -> Option<&str> {
    self.field(path).and_then(Value::as_str)
  }
}

/// Resolve a dotted path inside a JSON value.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
  path.split('.').try_fold(value, |current, part| current.get(part))
}

/// Opaque position marker in an ordered result set.
///
/// Only the source that produced a cursor can interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
  pub fn new(token: impl Into<String>) -> Self {
    Self(token.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for Cursor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// A document together with the cursor positioned at it
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
  pub document: Document,
  pub cursor: Cursor,
}
