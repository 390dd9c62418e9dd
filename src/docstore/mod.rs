//! Document database access for the dashboards.
//!
//! A `DocumentSource` answers filtered, ordered, cursor-paginated queries.
//! `SqliteSource` is the local backend; `CachedDocuments` puts a
//! `QueryClient` in front of any source.

mod cached;
mod filter;
mod keys;
pub mod seed;
mod source;
mod sqlite;
mod types;

pub use cached::{CacheResult, CacheSource, CachedDocuments};
pub use filter::{Direction, Filter, FilterOp, OrderBy, QuerySpec};
pub use keys::SellahKey;
pub use source::DocumentSource;
pub use sqlite::SqliteSource;
pub use types::{Cursor, Document, Snapshot};
