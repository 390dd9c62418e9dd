use async_trait::async_trait;
use color_eyre::Result;

use super::filter::QuerySpec;
use super::types::{Document, Snapshot};

/// Read side of a remote document database.
#[async_trait]
pub trait DocumentSource: Send + Sync {
  /// Run a filtered, ordered query.
  ///
  /// All filters must hold. Results follow `order_by`, with the document id
  /// as final ascending tiebreaker, then resume after `start_after` and stop
  /// at `limit`.
  async fn query(&self, query: &QuerySpec) -> Result<Vec<Snapshot>>;

  /// Fetch a single document by id.
  async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;
}
