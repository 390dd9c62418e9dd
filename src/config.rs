use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::QueryOptions;
use crate::docstore::SqliteSource;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  pub cache: CacheConfig,
  pub pagination: PaginationSection,
  /// Document database file (defaults to <data_dir>/sellah/documents.db)
  pub database: Option<PathBuf>,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
  /// How long an entry counts as fresh, in milliseconds
  pub default_ttl_ms: u64,
  /// Serve cached data immediately and refetch in the background
  pub stale_while_revalidate: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      default_ttl_ms: 5 * 60 * 1000,
      stale_while_revalidate: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PaginationSection {
  pub page_size: usize,
}

impl Default for PaginationSection {
  fn default() -> Self {
    Self { page_size: 20 }
  }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive used when RUST_LOG is unset (e.g. "info", "sellah=debug")
  pub level: String,
  /// Write logs to a daily file instead of stderr
  pub file: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: false,
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sellah.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sellah/config.yaml
  ///
  /// Falls back to defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("sellah.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("sellah").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Default options for every query built from this config.
  pub fn query_options(&self) -> QueryOptions {
    QueryOptions {
      ttl: Duration::from_millis(self.cache.default_ttl_ms),
      stale_while_revalidate: self.cache.stale_while_revalidate,
      force_refresh: false,
    }
  }

  /// Database path: explicit override, then config, then the data dir default.
  pub fn database_path(&self, override_path: Option<&Path>) -> Result<PathBuf> {
    match override_path.or(self.database.as_deref()) {
      Some(p) => Ok(p.to_path_buf()),
      None => SqliteSource::default_path(),
    }
  }

  /// Directory for daily log files.
  pub fn log_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("sellah").join("logs"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults() {
    let config = Config::default();
    assert_eq!(config.cache.default_ttl_ms, 300_000);
    assert!(config.cache.stale_while_revalidate);
    assert_eq!(config.pagination.page_size, 20);
    assert_eq!(config.log.level, "info");
    assert_eq!(config.query_options(), QueryOptions::default());
  }

  #[test]
  fn test_partial_file_keeps_other_defaults() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
      file,
      "cache:\n  default_ttl_ms: 1500\npagination:\n  page_size: 5\ndatabase: /tmp/docs.db"
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.cache.default_ttl_ms, 1500);
    assert!(config.cache.stale_while_revalidate);
    assert_eq!(config.pagination.page_size, 5);
    assert_eq!(config.log, LogConfig::default());
    assert_eq!(config.query_options().ttl, Duration::from_millis(1500));
    assert_eq!(
      config.database_path(None).unwrap(),
      PathBuf::from("/tmp/docs.db")
    );
    assert_eq!(
      config.database_path(Some(Path::new("other.db"))).unwrap(),
      PathBuf::from("other.db")
    );
  }

  #[test]
  fn test_empty_file_is_defaults() {
    let file = tempfile::NamedTempFile::new().unwrap();
    assert_eq!(Config::load(Some(file.path())).unwrap(), Config::default());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.yaml");
    assert!(Config::load(Some(&missing)).is_err());
  }

  #[test]
  fn test_invalid_yaml_is_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "cache: [not, a, map]").unwrap();
    let err = Config::load(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
  }
}
