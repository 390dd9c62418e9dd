//! SQLite-backed document source.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::filter::{Direction, QuerySpec};
use super::source::DocumentSource;
use super::types::{lookup, Cursor, Document, Snapshot};

/// Document store kept in a single SQLite table, one JSON blob per document.
pub struct SqliteSource {
  conn: Mutex<Connection>,
}

impl SqliteSource {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let source = Self {
      conn: Mutex::new(conn),
    };
    source.run_migrations()?;
    Ok(source)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sellah").join("documents.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for the document table.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
    Ok(())
  }

  /// Create or replace a document.
  pub fn put(&self, collection: &str, id: &str, fields: &Value) -> Result<()> {
    let data = serde_json::to_string(fields)
      .map_err(|e| eyre!("Failed to serialize document {}/{}: {}", collection, id, e))?;

    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO documents (collection, id, data, updated_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![collection, id, data],
      )
      .map_err(|e| eyre!("Failed to store document {}/{}: {}", collection, id, e))?;

    Ok(())
  }

  /// Delete a document, returning whether it existed.
  pub fn delete(&self, collection: &str, id: &str) -> Result<bool> {
    let deleted = self
      .conn()?
      .execute(
        "DELETE FROM documents WHERE collection = ? AND id = ?",
        params![collection, id],
      )
      .map_err(|e| eyre!("Failed to delete document {}/{}: {}", collection, id, e))?;
    Ok(deleted > 0)
  }

  /// Number of documents in a collection.
  pub fn count(&self, collection: &str) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?",
        params![collection],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count {}: {}", collection, e))?;
    Ok(count as usize)
  }

  fn run_query(&self, query: &QuerySpec) -> Result<Vec<Snapshot>> {
    let (sql, args) = build_select(query)?;
    debug!(collection = %query.collection, %sql, "running query");

    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(&sql)
      .map_err(|e| eyre!("Failed to prepare query on {}: {}", query.collection, e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params_from_iter(args.iter()), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to query {}: {}", query.collection, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read {} rows: {}", query.collection, e))?;

    rows
      .into_iter()
      .map(|(id, data)| -> Result<Snapshot> {
        let fields: Value = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to parse document {}/{}: {}", query.collection, id, e))?;
        let values = query
          .order_by
          .iter()
          .map(|order| lookup(&fields, &order.field).cloned().unwrap_or(Value::Null))
          .collect();
        let cursor = CursorPosition {
          values,
          id: id.clone(),
        }
        .encode()?;
        Ok(Snapshot {
          document: Document { id, fields },
          cursor,
        })
      })
      .collect()
  }

  fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
    let data: Option<String> = self
      .conn()?
      .query_row(
        "SELECT data FROM documents WHERE collection = ? AND id = ?",
        params![collection, id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to get document {}/{}: {}", collection, id, e))?;

    match data {
      Some(data) => {
        let fields = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to parse document {}/{}: {}", collection, id, e))?;
        Ok(Some(Document {
          id: id.to_string(),
          fields,
        }))
      }
      None => Ok(None),
    }
  }
}

#[async_trait]
impl DocumentSource for SqliteSource {
  async fn query(&self, query: &QuerySpec) -> Result<Vec<Snapshot>> {
    self.run_query(query)
  }

  async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
    self.get_document(collection, id)
  }
}

/// Schema for the document table.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_updated
    ON documents(collection, updated_at);
"#;

/// Ordering values and id of the document a cursor points at.
#[derive(Debug, Serialize, Deserialize)]
struct CursorPosition {
  values: Vec<Value>,
  id: String,
}

impl CursorPosition {
  fn encode(&self) -> Result<Cursor> {
    let bytes = serde_json::to_vec(self).map_err(|e| eyre!("Failed to encode cursor: {}", e))?;
    Ok(Cursor::new(hex::encode(bytes)))
  }

  fn decode(cursor: &Cursor) -> Result<Self> {
    let bytes = hex::decode(cursor.as_str()).map_err(|e| eyre!("Malformed cursor: {}", e))?;
    serde_json::from_slice(&bytes).map_err(|e| eyre!("Malformed cursor: {}", e))
  }
}

fn json_path(field: &str) -> SqlValue {
  SqlValue::Text(format!("$.{}", field))
}

/// Bind a JSON value the way `json_extract` reports it.
fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
    Value::Number(n) => match n.as_i64() {
      Some(i) => SqlValue::Integer(i),
      None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
    },
    Value::String(s) => SqlValue::Text(s.clone()),
    other => SqlValue::Text(other.to_string()),
  }
}

/// Build the SELECT for a query. Arguments are pushed in textual order.
fn build_select(query: &QuerySpec) -> Result<(String, Vec<SqlValue>)> {
  let mut sql = String::from("SELECT id, data FROM documents WHERE collection = ?");
  let mut args = vec![SqlValue::Text(query.collection.clone())];

  for filter in &query.filters {
    sql.push_str(&format!(" AND json_extract(data, ?) {} ?", filter.op.sql()));
    args.push(json_path(&filter.field));
    args.push(to_sql(&filter.value));
  }

  // Documents without a value for an ordered field are not part of the result
  for order in &query.order_by {
    sql.push_str(" AND json_extract(data, ?) IS NOT NULL");
    args.push(json_path(&order.field));
  }

  if let Some(cursor) = &query.start_after {
    let position = CursorPosition::decode(cursor)?;
    if position.values.len() != query.order_by.len() {
      return Err(eyre!(
        "Cursor has {} ordering values but query orders by {} fields",
        position.values.len(),
        query.order_by.len()
      ));
    }

    // Keyset condition: strictly after the cursor in (order fields..., id) order
    let mut branches = Vec::with_capacity(query.order_by.len() + 1);
    for depth in 0..=query.order_by.len() {
      let mut parts = Vec::with_capacity(depth + 1);
      for (order, value) in query.order_by.iter().zip(&position.values).take(depth) {
        parts.push("json_extract(data, ?) IS ?".to_string());
        args.push(json_path(&order.field));
        args.push(to_sql(value));
      }
      match query.order_by.get(depth) {
        Some(order) => {
          let cmp = match order.direction {
            Direction::Asc => ">",
            Direction::Desc => "<",
          };
          parts.push(format!("json_extract(data, ?) {} ?", cmp));
          args.push(json_path(&order.field));
          args.push(to_sql(&position.values[depth]));
        }
        None => {
          parts.push("id > ?".to_string());
          args.push(SqlValue::Text(position.id.clone()));
        }
      }
      branches.push(format!("({})", parts.join(" AND ")));
    }
    sql.push_str(&format!(" AND ({})", branches.join(" OR ")));
  }

  sql.push_str(" ORDER BY ");
  for order in &query.order_by {
    let dir = match order.direction {
      Direction::Asc => "ASC",
      Direction::Desc => "DESC",
    };
    sql.push_str(&format!("json_extract(data, ?) {}, ", dir));
    args.push(json_path(&order.field));
  }
  sql.push_str("id ASC");

  if let Some(limit) = query.limit {
    sql.push_str(" LIMIT ?");
    args.push(SqlValue::Integer(limit as i64));
  }

  Ok((sql, args))
}
