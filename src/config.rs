use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::DEFAULT_PRESERVE_KEYS;
use crate::worker::WorkerConfig;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub worker: WorkerSettings,
  pub connectivity: ConnectivityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Origin of the app and its `/api` routes
  pub base_url: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:5000".into(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Maximum age of key-value entries, in seconds
  pub max_age_secs: u64,
  /// Keys kept when the whole cache is cleared
  pub preserve_keys: BTreeSet<String>,
  /// Database file (defaults to the data directory)
  pub database: Option<PathBuf>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_age_secs: 60 * 60,
      preserve_keys: DEFAULT_PRESERVE_KEYS.iter().map(|k| k.to_string()).collect(),
      database: None,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
  pub cache_name: String,
  pub precache: Vec<String>,
  pub offline_page: String,
}

impl Default for WorkerSettings {
  fn default() -> Self {
    Self {
      cache_name: "indalo-cache-v1".into(),
      precache: ["/", "/index.html", "/manifest.json", "/favicon.ico", "/offline.html"]
        .iter()
        .map(|p| p.to_string())
        .collect(),
      offline_page: "/offline.html".into(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
  pub probe_path: String,
  pub interval_secs: u64,
}

impl Default for ConnectivityConfig {
  fn default() -> Self {
    Self {
      probe_path: "/api/health".into(),
      interval_secs: 15,
    }
  }
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./indalo.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/indalo/config.yaml
  ///
  /// `INDALO_API_URL` overrides `api.base_url`.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(url) = std::env::var("INDALO_API_URL") {
      config.api.base_url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("indalo.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("indalo").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  pub fn base_url(&self) -> Result<Url> {
    Url::parse(&self.api.base_url)
      .map_err(|e| eyre!("Invalid API base URL {}: {}", self.api.base_url, e))
  }

  /// Resolve `path` against the API base URL.
  pub fn api_url(&self, path: &str) -> Result<Url> {
    self
      .base_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))
  }

  pub fn max_age(&self) -> Duration {
    Duration::from_secs(self.cache.max_age_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.connectivity.interval_secs)
  }

  pub fn worker_config(&self) -> Result<WorkerConfig> {
    Ok(WorkerConfig {
      cache_name: self.worker.cache_name.clone(),
      precache: self.worker.precache.clone(),
      offline_page: self.worker.offline_page.clone(),
      app_url: self.base_url()?,
    })
  }
}
