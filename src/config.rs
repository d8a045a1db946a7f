use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::RetryPolicy;

const DEFAULT_API_URL: &str = "https://api.noghresod.ir/v1/";
/// One day; a longer buffer would treat every token as expired.
const MAX_REFRESH_BUFFER_MINUTES: i64 = 24 * 60;
/// One year.
const MAX_CATEGORY_TTL_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub timeout_secs: u64,
  pub connect_timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_API_URL.to_string(),
      timeout_secs: 30,
      connect_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub initial_delay_ms: u64,
  pub backoff_multiplier: f64,
  pub max_delay_ms: u64,
  pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      initial_delay_ms: 1000,
      backoff_multiplier: 2.0,
      max_delay_ms: 30_000,
      max_jitter_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
  /// Tokens are treated as expired this many minutes before their hard expiry
  pub refresh_buffer_minutes: i64,
}

impl Default for AuthConfig {
  fn default() -> Self {
    Self {
      refresh_buffer_minutes: 5,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// SQLite database path (defaults to the data directory)
  pub path: Option<PathBuf>,
  /// Cached categories older than this are purged before being served
  pub category_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      category_ttl_secs: 300,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Filter used when RUST_LOG is not set
  pub level: String,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./noghre.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/noghre/config.yaml
  ///
  /// Falls back to defaults when no file exists. `NOGHRE_API_URL` overrides
  /// the API base URL in every case.
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

    if let Ok(url) = std::env::var("NOGHRE_API_URL") {
      config.api.base_url = url;
    }

    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("noghre.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("noghre").join("config.yaml");
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
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.base_url()?;
    if self.retry.backoff_multiplier < 1.0 {
      return Err(eyre!(
        "retry.backoff_multiplier must be >= 1.0, got {}",
        self.retry.backoff_multiplier
      ));
    }
    if !(0..=MAX_REFRESH_BUFFER_MINUTES).contains(&self.auth.refresh_buffer_minutes) {
      return Err(eyre!(
        "auth.refresh_buffer_minutes must be between 0 and {}, got {}",
        MAX_REFRESH_BUFFER_MINUTES,
        self.auth.refresh_buffer_minutes
      ));
    }
    if self.cache.category_ttl_secs > MAX_CATEGORY_TTL_SECS {
      return Err(eyre!(
        "cache.category_ttl_secs must be at most {}, got {}",
        MAX_CATEGORY_TTL_SECS,
        self.cache.category_ttl_secs
      ));
    }
    Ok(())
  }

  /// Parsed API base URL, always ending in `/` so relative joins keep the path prefix.
  pub fn base_url(&self) -> Result<url::Url> {
    let mut raw = self.api.base_url.trim().to_string();
    if !raw.ends_with('/') {
      raw.push('/');
    }
    url::Url::parse(&raw).map_err(|e| eyre!("Invalid api.base_url '{}': {}", raw, e))
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn connect_timeout(&self) -> Duration {
    Duration::from_secs(self.api.connect_timeout_secs)
  }

  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.retry.max_retries,
      initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
      backoff_multiplier: self.retry.backoff_multiplier,
      max_delay: Duration::from_millis(self.retry.max_delay_ms),
      max_jitter: Duration::from_millis(self.retry.max_jitter_ms),
    }
  }

  pub fn refresh_buffer(&self) -> chrono::Duration {
    let minutes = self
      .auth
      .refresh_buffer_minutes
      .clamp(0, MAX_REFRESH_BUFFER_MINUTES);
    chrono::Duration::minutes(minutes)
  }

  pub fn category_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(self.cache.category_ttl_secs.min(MAX_CATEGORY_TTL_SECS) as i64)
  }

  /// Directory holding the cache database, secure store and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("noghre"))
  }

  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => Ok(Self::data_dir()?.join("cache.db")),
    }
  }

  /// Encrypted credential file and the key that seals it.
  pub fn secure_store_paths() -> Result<(PathBuf, PathBuf)> {
    let dir = Self::data_dir()?;
    Ok((dir.join("secure.json"), dir.join("secure.key")))
  }

  /// Get the login password from the environment.
  pub fn get_password() -> Result<String> {
    std::env::var("NOGHRE_PASSWORD")
      .map_err(|_| eyre!("Password not found. Set the NOGHRE_PASSWORD environment variable."))
  }
}
