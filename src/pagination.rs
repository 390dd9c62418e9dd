//! Cursor-based pagination over a document source.
//!
//! A `Paginator<T>` runs a base query one page at a time, appending each
//! page to its accumulated data in source order. Like `Query`, loads run on
//! a background task and are applied with `poll()` or `wait()`.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::docstore::{Cursor, Document, DocumentSource, QuerySpec};

/// Page size and loading behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationConfig {
  pub page_size: usize,
  /// Load the first page on `mount()`
  pub initial_load: bool,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      page_size: 20,
      initial_load: true,
    }
  }
}

/// Accumulated pages and load status
#[derive(Debug, Clone)]
pub struct PaginationState<T> {
  pub data: Vec<T>,
  pub loading: bool,
  pub error: Option<String>,
  /// False once a page came back shorter than the page size
  pub has_more: bool,
  /// Number of pages successfully loaded
  pub current_page: u32,
  /// Position after the last loaded item
  pub cursor: Option<Cursor>,
}

impl<T> Default for PaginationState<T> {
  fn default() -> Self {
    Self {
      data: Vec::new(),
      loading: false,
      error: None,
      has_more: true,
      current_page: 0,
      cursor: None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadMode {
  Append,
  Replace,
}

struct Page<T> {
  items: Vec<T>,
  last_cursor: Option<Cursor>,
}

type Transform<T> = Arc<dyn Fn(&Document) -> T + Send + Sync>;

type PageOutcome<T> = (LoadMode, Result<Page<T>, String>);

/// Incrementally loaded, ordered view of a query.
pub struct Paginator<T> {
  source: Arc<dyn DocumentSource>,
  base: QuerySpec,
  transform: Transform<T>,
  config: PaginationConfig,
  state: PaginationState<T>,
  receiver: Option<mpsc::UnboundedReceiver<PageOutcome<T>>>,
}

impl<T: Send + 'static> Paginator<T> {
  /// Create a paginator over `base`.
  ///
  /// `base` must carry a deterministic ordering; any limit or cursor on it is
  /// dropped, since the paginator manages those itself.
  pub fn new<F>(
    source: Arc<dyn DocumentSource>,
    base: QuerySpec,
    transform: F,
    config: PaginationConfig,
  ) -> Self
  where
    F: Fn(&Document) -> T + Send + Sync + 'static,
  {
    let base = if base.has_pagination() {
      warn!(collection = %base.collection, "ignoring pagination clauses on base query");
      base.without_pagination()
    } else {
      base
    };

    Self {
      source,
      base,
      transform: Arc::new(transform),
      config: PaginationConfig {
        page_size: config.page_size.max(1),
        ..config
      },
      state: PaginationState::default(),
      receiver: None,
    }
  }

  pub fn state(&self) -> &PaginationState<T> {
    &self.state
  }

  pub fn data(&self) -> &[T] {
    &self.state.data
  }

  pub fn is_loading(&self) -> bool {
    self.state.loading
  }

  pub fn error(&self) -> Option<&str> {
    self.state.error.as_deref()
  }

  pub fn has_more(&self) -> bool {
    self.state.has_more
  }

  pub fn current_page(&self) -> u32 {
    self.state.current_page
  }

  pub fn config(&self) -> PaginationConfig {
    self.config
  }

  /// Load the first page if configured to.
  pub fn mount(&mut self) {
    if self.config.initial_load {
      self.load_more();
    }
  }

  /// Start loading the next page.
  ///
  /// Returns `false` without touching the source while a load is in flight
  /// or once the results are exhausted.
  pub fn load_more(&mut self) -> bool {
    if self.state.loading {
      debug!(collection = %self.base.collection, "page load already in flight");
      return false;
    }
    if !self.state.has_more {
      debug!(collection = %self.base.collection, "no more pages");
      return false;
    }
    self.start_load(LoadMode::Append);
    true
  }

  /// Reload from the first page, replacing the accumulated data on success.
  ///
  /// Cursor and `has_more` keep their values until the first page arrives, so
  /// a failed refresh leaves the paginator where it was.
  pub fn refresh(&mut self) -> bool {
    self.receiver = None;
    self.start_load(LoadMode::Replace);
    true
  }

  /// Return to the initial state without fetching.
  pub fn reset(&mut self) {
    self.receiver = None;
    self.state = PaginationState::default();
  }

  /// Poll for a finished page load.
  ///
  /// Returns `true` if the state changed.
  pub fn poll(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.try_recv() {
      Ok((mode, result)) => {
        self.receiver = None;
        self.apply(mode, result);
        true
      }
      Err(mpsc::error::TryRecvError::Empty) => false,
      Err(mpsc::error::TryRecvError::Disconnected) => {
        self.receiver = None;
        self.state.loading = false;
        self.state.error = Some("Page load was cancelled".to_string());
        true
      }
    }
  }

  /// Wait for the pending page load and apply it.
  ///
  /// Returns `false` immediately if nothing is pending.
  pub async fn wait(&mut self) -> bool {
    let receiver = match &mut self.receiver {
      Some(rx) => rx,
      None => return false,
    };

    match receiver.recv().await {
      Some((mode, result)) => {
        self.receiver = None;
        self.apply(mode, result);
      }
      None => {
        self.receiver = None;
        self.state.loading = false;
        self.state.error = Some("Page load was cancelled".to_string());
      }
    }
    true
  }

  fn apply(&mut self, mode: LoadMode, result: Result<Page<T>, String>) {
    self.state.loading = false;
    match result {
      Ok(page) => {
        let fetched = page.items.len();
        match mode {
          LoadMode::Append => {
            self.state.data.extend(page.items);
            self.state.current_page += 1;
          }
          LoadMode::Replace => {
            self.state.data = page.items;
            self.state.current_page = 1;
          }
        }
        self.state.cursor = page.last_cursor;
        self.state.has_more = fetched == self.config.page_size;
        self.state.error = None;
        debug!(
          collection = %self.base.collection,
          page = self.state.current_page,
          fetched,
          has_more = self.state.has_more,
          "page loaded"
        );
      }
      Err(error) => {
        debug!(collection = %self.base.collection, %error, "page load failed");
        self.state.error = Some(error);
      }
    }
  }

  /// Internal: start the page load
  fn start_load(&mut self, mode: LoadMode) {
    let mut query = self.base.clone().limit(self.config.page_size);
    if let (LoadMode::Append, Some(cursor)) = (mode, &self.state.cursor) {
      query = query.start_after(cursor.clone());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    self.receiver = Some(rx);
    self.state.loading = true;

    let source = Arc::clone(&self.source);
    let transform = Arc::clone(&self.transform);
    tokio::spawn(async move {
      let result = source
        .query(&query)
        .await
        .map(|snapshots| Page {
          last_cursor: snapshots.last().map(|s| s.cursor.clone()),
          items: snapshots.iter().map(|s| transform(&s.document)).collect(),
        })
        .map_err(|e| e.to_string());
      // Ignore send errors - receiver may have been dropped
      let _ = tx.send((mode, result));
    });
  }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Paginator<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Paginator")
      .field("base", &self.base)
      .field("config", &self.config)
      .field("state", &self.state)
      .finish_non_exhaustive()
  }
}
