use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use sellah::cache::QueryClient;
use sellah::config::Config;
use sellah::docstore::{
  seed, CacheSource, CachedDocuments, Document, Filter, OrderBy, QuerySpec, SellahKey, SqliteSource,
};
use sellah::pagination::PaginationConfig;

#[derive(Parser, Debug)]
#[command(name = "sellah")]
#[command(about = "Cached, paginated reads over a local document store")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sellah/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Document database file (default: <data_dir>/sellah/documents.db)
  #[arg(short, long, global = true)]
  database: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Write demo companies, products, users and orders
  Seed {
    #[arg(long, default_value_t = 3)]
    companies: usize,
    #[arg(long, default_value_t = 50)]
    orders: usize,
  },
  /// Fetch a document twice through the cache
  Get { collection: String, id: String },
  /// Print a collection as JSON lines, page by page
  List {
    collection: String,
    /// Condition such as status=paid or total>=100 (repeatable)
    #[arg(short, long = "where")]
    filters: Vec<Filter>,
    /// Sort field, optionally suffixed with :asc or :desc
    #[arg(short, long)]
    order_by: Option<OrderBy>,
    /// Documents per page (default: pagination.page_size from config)
    #[arg(long)]
    page_size: Option<usize>,
    /// Stop after this many pages
    #[arg(long)]
    pages: Option<u32>,
  },
  /// Warm a user's caches, then drop them
  SignOut {
    user: String,
    #[arg(long)]
    company: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _guard = init_logging(&config)?;

  let path = config.database_path(args.database.as_deref())?;
  info!(path = %path.display(), "opening document store");
  let store = Arc::new(SqliteSource::open(&path)?);
  let docs = CachedDocuments::new(store.clone(), QueryClient::new(config.query_options()));

  match args.command {
    Command::Seed { companies, orders } => {
      let summary = seed::seed_demo(&store, companies, orders)?;
      println!(
        "seeded {} companies, {} products, {} users, {} orders into {}",
        summary.companies,
        summary.products,
        summary.users,
        summary.orders,
        path.display()
      );
    }
    Command::Get { collection, id } => {
      for attempt in 1..=2 {
        let result = docs.get(&collection, &id).await?;
        let source = match result.source {
          CacheSource::Network => "miss",
          CacheSource::Cache => "hit",
        };
        info!(attempt, %collection, %id, source, "cache {}", source);
        if attempt == 1 {
          match result.data.as_ref() {
            Some(doc) => println!("{}", document_json(doc)),
            None => return Err(eyre!("{}/{} not found", collection, id)),
          }
        }
      }
    }
    Command::List {
      collection,
      filters,
      order_by,
      page_size,
      pages,
    } => {
      let mut spec = QuerySpec::new(collection);
      for f in filters {
        spec = spec.filter(f.field, f.op, f.value);
      }
      if let Some(order) = order_by {
        spec = spec.order_by(order.field, order.direction);
      }
      let page_config = PaginationConfig {
        page_size: page_size.unwrap_or(config.pagination.page_size),
        initial_load: true,
      };

      let mut paginator = docs.paginate(spec, document_json, page_config);
      paginator.mount();
      let mut printed = 0;
      loop {
        paginator.wait().await;
        if let Some(err) = paginator.error() {
          return Err(eyre!("Failed to load page {}: {}", paginator.current_page() + 1, err));
        }
        for doc in &paginator.data()[printed..] {
          println!("{}", doc);
        }
        printed = paginator.data().len();

        let limit_reached = pages.is_some_and(|max| paginator.current_page() >= max);
        if limit_reached || !paginator.load_more() {
          break;
        }
      }
      info!(
        pages = paginator.current_page(),
        documents = printed,
        has_more = paginator.has_more(),
        "listing done"
      );
    }
    Command::SignOut { user, company } => {
      let orders = QuerySpec::new("orders").where_eq("userId", user.as_str());
      docs
        .list_keyed(&SellahKey::Orders { user_id: user.clone() }.cache_key(), &orders)
        .await?;
      if let Some(company_id) = &company {
        let products = QuerySpec::new("products").where_eq("companyId", company_id.as_str());
        docs
          .list_keyed(
            &SellahKey::Products {
              company_id: company_id.clone(),
            }
            .cache_key(),
            &products,
          )
          .await?;
      }

      let removed = docs.sign_out(&user, company.as_deref());
      println!(
        "removed {} cache entries, {} left",
        removed,
        docs.client().store().len()
      );
    }
  }

  Ok(())
}

fn document_json(doc: &Document) -> Value {
  json!({ "id": doc.id, "fields": doc.fields })
}

/// Set up tracing. RUST_LOG wins over the configured level.
///
/// The returned guard flushes the file writer and must be held until exit.
fn init_logging(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.log.level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", config.log.level, e))?;

  if config.log.file {
    let dir = Config::log_dir()?;
    std::fs::create_dir_all(&dir)
      .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
    let appender = tracing_appender::rolling::daily(&dir, "sellah.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();
    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    Ok(None)
  }
}
