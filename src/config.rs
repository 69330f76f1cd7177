use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::strategy::{Strategy, StrategyRule};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Product identifier prefixed to every partition name
  pub product: String,
  /// Semantic version of the cache layout, e.g. "2.0.1"
  pub version: String,
  /// Site the proxy sits in front of
  pub origin: Url,
  /// SQLite database path (defaults to $XDG_DATA_HOME/swc/cache.db)
  pub database: Option<PathBuf>,
  pub server: ServerConfig,
  pub network: NetworkConfig,
  pub log: LogConfig,
  /// Assets stored in the static partition at install time, all or nothing
  pub static_assets: Vec<String>,
  /// Optional URLs preloaded into the dynamic partition at install time
  pub preload_urls: Vec<String>,
  /// Ordered strategy table, first matching pattern wins
  pub strategies: Vec<StrategyRule>,
  /// Requests whose URL contains one of these are never intercepted
  pub excluded_patterns: Vec<String>,
  /// Path prefix that marks API requests for offline fallbacks
  pub api_prefix: String,
  /// Cached page served to documents while offline
  pub offline_page: String,
  pub sync: SyncConfig,
  pub notification: NotificationConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
  pub listen: SocketAddr,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Upper bound on any single network fetch
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter when RUST_LOG is unset
  pub level: String,
  /// Also write daily-rotated log files here
  pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  pub analytics_endpoint: String,
  pub preferences_endpoint: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      product: "ruantech".to_string(),
      version: "2.0.1".to_string(),
      origin: Url::parse("http://localhost:8080/").expect("static URL is valid"),
      database: None,
      server: ServerConfig::default(),
      network: NetworkConfig::default(),
      log: LogConfig::default(),
      static_assets: [
        "/",
        "/index.html",
        "/assets/css/advanced.css",
        "/manifest.json",
        "https://cdn.tailwindcss.com",
        "https://fonts.googleapis.com/css2?family=Inter:wght@300;400;500;600;700&display=swap",
      ]
      .map(String::from)
      .to_vec(),
      preload_urls: ["/api/services/summary", "/api/user/preferences"]
        .map(String::from)
        .to_vec(),
      strategies: vec![
        StrategyRule::new(Strategy::StaleWhileRevalidate, &["/api/", "/data/"]),
        StrategyRule::new(
          Strategy::CacheFirst,
          &[
            "/assets/",
            "/images/",
            "https://cdn.tailwindcss.com",
            "https://fonts.googleapis.com",
            "https://fonts.gstatic.com",
          ],
        ),
        StrategyRule::new(Strategy::NetworkFirst, &["/demos/", "/services/"]),
      ],
      excluded_patterns: ["chrome-extension", "webpack", "hot-update"]
        .map(String::from)
        .to_vec(),
      api_prefix: "/api/".to_string(),
      offline_page: "/offline.html".to_string(),
      sync: SyncConfig::default(),
      notification: NotificationConfig::default(),
    }
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: SocketAddr::from(([127, 0, 0, 1], 8787)),
    }
  }
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      analytics_endpoint: "/api/analytics/batch".to_string(),
      preferences_endpoint: "/api/user/preferences".to_string(),
    }
  }
}

impl Default for NotificationConfig {
  fn default() -> Self {
    Self {
      title: "RUANTECH V2.0".to_string(),
      body: "New update available on RUANTECH!".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./swc.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/swc/config.yaml
  ///
  /// Without any file the built-in defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };
    config.validate()?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("swc.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("swc").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.product.is_empty() || self.product.contains(char::is_whitespace) {
      return Err(eyre!(
        "Invalid product identifier '{}': must be non-empty without whitespace",
        self.product
      ));
    }
    if self.origin.host_str().is_none() {
      return Err(eyre!("Origin {} has no host", self.origin));
    }
    Ok(())
  }

  /// Resolve a configured path or absolute URL against the origin.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    self
      .origin
      .join(path_or_url)
      .map_err(|e| eyre!("Invalid URL '{}': {}", path_or_url, e))
  }

  /// Database path, configured or default.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::db::Database::default_path(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_match_partition_layout() {
    let config = Config::default();
    assert_eq!(config.product, "ruantech");
    assert_eq!(config.strategies.len(), 3);
    assert_eq!(config.strategies[0].strategy, Strategy::StaleWhileRevalidate);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
product: acme
origin: "https://acme.example/"
strategies:
  - strategy: cache-first
    patterns: ["/static/"]
"#,
    )
    .unwrap();

    assert_eq!(config.product, "acme");
    assert_eq!(config.origin.as_str(), "https://acme.example/");
    assert_eq!(config.strategies.len(), 1);
    assert_eq!(config.strategies[0].strategy, Strategy::CacheFirst);
    assert_eq!(config.api_prefix, "/api/");
    assert_eq!(config.network.timeout_secs, 30);
  }

  #[test]
  fn test_rejects_blank_product() {
    let config = Config::from_yaml("product: \"my app\"").unwrap();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_resolve_relative_and_absolute() {
    let config = Config::default();
    assert_eq!(
      config.resolve("/index.html").unwrap().as_str(),
      "http://localhost:8080/index.html"
    );
    assert_eq!(
      config.resolve("https://fonts.gstatic.com/x.woff2").unwrap().host_str(),
      Some("fonts.gstatic.com")
    );
  }
}
