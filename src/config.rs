use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::DEFAULT_RACE_TIMEOUT;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// The application's own origin; everything else is cross-origin
  pub origin: Url,
  /// Generation tag of the build being served
  #[serde(default = "default_version")]
  pub version: String,
  /// Mandatory seed keys, relative to the origin
  #[serde(default = "default_seed")]
  pub seed: Vec<String>,
  /// Document served offline when nothing better is cached
  #[serde(default = "default_root_document")]
  pub root_document: String,
  #[serde(default)]
  pub data_feed: DataFeedConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub lifecycle: LifecycleConfig,
  #[serde(default)]
  pub cross_origin: CrossOriginConfig,
  #[serde(default)]
  pub push: PushConfig,
  #[serde(default)]
  pub analytics: AnalyticsConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

fn default_version() -> String {
  "v1".to_string()
}

fn default_seed() -> Vec<String> {
  ["/", "/index.html", "/styles.css", "/app.js", "/manifest.json"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_root_document() -> String {
  "/".to_string()
}

/// The slow upstream feed served with the race strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataFeedConfig {
  pub host: String,
  pub path_prefix: String,
  pub timeout_ms: u64,
}

impl Default for DataFeedConfig {
  fn default() -> Self {
    Self {
      host: "docs.google.com".to_string(),
      path_prefix: "/spreadsheets/".to_string(),
      timeout_ms: DEFAULT_RACE_TIMEOUT.as_millis() as u64,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
  /// Hard ceiling for any single upstream request
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self { timeout_secs: 30 }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
  /// Activate a freshly installed generation without waiting for clients
  pub skip_waiting: bool,
  /// Take control of open clients on activation
  pub claim_clients: bool,
}

impl Default for LifecycleConfig {
  fn default() -> Self {
    Self {
      skip_waiting: false,
      claim_clients: true,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CrossOriginConfig {
  /// Refetch cross-origin cache hits in the background
  pub background_refresh: bool,
}

/// Defaults for push notifications whose payload omits a field.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub tag: String,
  pub vibrate: Vec<u32>,
  pub require_interaction: bool,
}

impl Default for PushConfig {
  fn default() -> Self {
    Self {
      title: "New update".to_string(),
      body: "Something new is available.".to_string(),
      icon: "/icons/icon-192.png".to_string(),
      badge: "/icons/badge-72.png".to_string(),
      tag: "update".to_string(),
      vibrate: vec![200, 100, 200],
      require_interaction: false,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
  /// Where install/activation events are posted; disabled when unset
  pub endpoint: Option<Url>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// SQLite file (default: $XDG_DATA_HOME/cachegate/cache.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./cachegate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cachegate/config.yaml
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
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/cachegate/config.yaml\n\
                 At minimum it needs an `origin:` entry."
        ))
      }
    };

    let config = config.with_env_overrides();
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cachegate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cachegate").join("config.yaml");
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
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    if self.version.trim().is_empty() {
      return Err(eyre!("`version` must not be empty"));
    }
    if self.version.contains(':') {
      return Err(eyre!("`version` must not contain ':' ({})", self.version));
    }
    self.root_document_url()?;
    Ok(())
  }

  /// CACHEGATE_VERSION overrides the configured generation tag, so a deploy can
  /// stamp the build without editing the file.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(version) = std::env::var("CACHEGATE_VERSION") {
      if !version.trim().is_empty() {
        self.version = version;
      }
    }
    self
  }

  pub fn root_document_url(&self) -> Result<Url> {
    self
      .origin
      .join(&self.root_document)
      .map_err(|e| eyre!("Invalid root_document '{}': {}", self.root_document, e))
  }

  pub fn race_timeout(&self) -> Duration {
    Duration::from_millis(self.data_feed.timeout_ms)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.network.timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("origin: https://app.example.com").unwrap();
    assert_eq!(config.version, "v1");
    assert_eq!(config.seed.len(), 5);
    assert_eq!(config.race_timeout(), Duration::from_millis(8000));
    assert_eq!(config.data_feed.host, "docs.google.com");
    assert!(config.lifecycle.claim_clients);
    assert!(!config.lifecycle.skip_waiting);
    assert!(config.analytics.endpoint.is_none());
    assert_eq!(config.push.vibrate, vec![200, 100, 200]);
    assert_eq!(
      config.root_document_url().unwrap().as_str(),
      "https://app.example.com/"
    );
  }

  #[test]
  fn test_nested_overrides() {
    let yaml = r#"
origin: https://app.example.com
version: build-42
seed: ["/", "/app.js"]
data_feed:
  timeout_ms: 2500
lifecycle:
  skip_waiting: true
push:
  title: Hello
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.version, "build-42");
    assert_eq!(config.seed, vec!["/", "/app.js"]);
    assert_eq!(config.race_timeout(), Duration::from_millis(2500));
    assert_eq!(config.data_feed.path_prefix, "/spreadsheets/");
    assert!(config.lifecycle.skip_waiting);
    assert!(config.lifecycle.claim_clients);
    assert_eq!(config.push.title, "Hello");
    assert_eq!(config.push.icon, "/icons/icon-192.png");
  }

  #[test]
  fn test_missing_origin_is_rejected() {
    assert!(Config::from_yaml("version: v2").is_err());
  }

  #[test]
  fn test_version_with_separator_is_rejected() {
    assert!(Config::from_yaml("origin: https://a.example\nversion: 'a:b'").is_err());
  }
}
