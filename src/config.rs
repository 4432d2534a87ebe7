use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Prefix shared by every managed cache bucket and store namespace.
  #[serde(default = "default_namespace")]
  pub app_namespace: String,
  /// Version of the asset set currently being served.
  pub version_tag: String,
  /// Origin this worker serves; cross-origin traffic is never intercepted.
  pub origin: String,
  pub server: ServerConfig,
  /// Path prefixes treated as API requests.
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// Critical assets precached at install time, as origin-relative paths.
  #[serde(default)]
  pub precache_manifest: Vec<String>,
  /// Background-sync tag that triggers a replay.
  #[serde(default = "default_sync_tag")]
  pub sync_tag: String,
  /// Override for the store database location (defaults to the data dir).
  pub database_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub base_url: String,
}

fn default_namespace() -> String {
  "fieldsync".to_string()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_sync_tag() -> String {
  "fieldsync-replay".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fieldsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fieldsync/config.yaml
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
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/fieldsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fieldsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fieldsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  pub fn server_url(&self) -> Result<Url> {
    Url::parse(&self.server.base_url)
      .map_err(|e| eyre!("Invalid server base URL {}: {}", self.server.base_url, e))
  }

  #[cfg(test)]
  pub fn for_tests() -> Self {
    Self {
      app_namespace: "fieldsync".to_string(),
      version_tag: "vtest".to_string(),
      origin: "https://app.fieldsync.test".to_string(),
      server: ServerConfig {
        base_url: "https://api.fieldsync.test".to_string(),
      },
      api_prefixes: default_api_prefixes(),
      precache_manifest: Vec::new(),
      sync_tag: default_sync_tag(),
      database_path: None,
    }
  }
}
