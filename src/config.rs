use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub flickr: FlickrConfig,
  /// Override for the directory holding the store, image cache and logs
  /// (defaults to the platform data dir).
  pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlickrConfig {
  /// Search endpoint; overridable for tests and proxies.
  #[serde(default = "default_endpoint")]
  pub url: String,
}

impl Default for FlickrConfig {
  fn default() -> Self {
    Self {
      url: default_endpoint(),
    }
  }
}

fn default_endpoint() -> String {
  "https://api.flickr.com/services/rest/".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./vtour.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/vtour/config.yaml
  /// 4. ~/.config/vtour/config.yaml
  ///
  /// No file at all is fine: everything has a default except the API key,
  /// which comes from the environment.
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
    let local = PathBuf::from("vtour.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("vtour").join("config.yaml");
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

  /// Get the Flickr API key from environment variables.
  ///
  /// Checks VTOUR_FLICKR_KEY first, then FLICKR_API_KEY as fallback.
  pub fn get_api_key() -> Result<String> {
    std::env::var("VTOUR_FLICKR_KEY")
      .or_else(|_| std::env::var("FLICKR_API_KEY"))
      .map_err(|_| {
        eyre!(
          "Flickr API key not found. Set VTOUR_FLICKR_KEY or FLICKR_API_KEY environment variable."
        )
      })
  }

  /// Directory holding the store, image cache and logs.
  pub fn data_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.data_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("vtour"))
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("store.db"))
  }

  pub fn image_cache_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("images"))
  }

  pub fn log_dir(&self) -> Result<PathBuf> {
    Ok(self.data_dir()?.join("logs"))
  }
}
