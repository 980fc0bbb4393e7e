use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::client::{ClientDefaults, RetryConfig};

/// Environment variables checked, in order, for the API base URL.
pub const BASE_URL_ENV: [&str; 2] = ["FETCHKIT_BASE_URL", "API_BASE_URL"];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub retry: RetrySettings,
  #[serde(default)]
  pub cache: CacheSettings,
  /// Directory for rolling log files. Logs go to stderr when unset.
  pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Prefix for relative endpoints. Overridden by the environment.
  #[serde(default)]
  pub base_url: String,
  /// Per-attempt timeout
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Extra headers sent with every request
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: String::new(),
      timeout_ms: default_timeout_ms(),
      headers: BTreeMap::new(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
  #[serde(default = "default_attempts")]
  pub attempts: u32,
  #[serde(default = "default_delay_ms")]
  pub delay_ms: u64,
  #[serde(default)]
  pub backoff: bool,
}

impl Default for RetrySettings {
  fn default() -> Self {
    Self {
      attempts: default_attempts(),
      delay_ms: default_delay_ms(),
      backoff: false,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
  #[serde(default = "default_ttl_secs")]
  pub default_ttl_secs: u64,
  /// Set to 0 to disable the background sweep
  #[serde(default = "default_sweep_secs")]
  pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
  fn default() -> Self {
    Self {
      default_ttl_secs: default_ttl_secs(),
      sweep_interval_secs: default_sweep_secs(),
    }
  }
}

impl CacheSettings {
  pub fn sweep_interval(&self) -> Option<Duration> {
    (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
  }
}

fn default_timeout_ms() -> u64 {
  30_000
}

fn default_attempts() -> u32 {
  3
}

fn default_delay_ms() -> u64 {
  1_000
}

fn default_ttl_secs() -> u64 {
  300
}

fn default_sweep_secs() -> u64 {
  60
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./fetchkit.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/fetchkit/config.yaml
  ///
  /// With no file found, defaults are used and the base URL must come from
  /// the environment.
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

    Ok(config.with_env_overrides())
  }

  /// Defaults plus environment overrides, ignoring any config file.
  pub fn from_env() -> Self {
    Self::default().with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("fetchkit.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("fetchkit").join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid config
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  fn with_env_overrides(mut self) -> Self {
    if let Some(url) = Self::base_url_from_env() {
      self.api.base_url = url;
    }
    self
  }

  /// Base URL from the environment.
  ///
  /// Checks FETCHKIT_BASE_URL first, then API_BASE_URL as fallback.
  pub fn base_url_from_env() -> Option<String> {
    BASE_URL_ENV
      .iter()
      .filter_map(|name| std::env::var(name).ok())
      .find(|v| !v.trim().is_empty())
  }

  /// Client-wide request defaults derived from this config.
  pub fn client_defaults(&self) -> ClientDefaults {
    ClientDefaults {
      timeout: Duration::from_millis(self.api.timeout_ms),
      retry: RetryConfig {
        attempts: self.retry.attempts.max(1),
        delay: Duration::from_millis(self.retry.delay_ms),
        backoff: self.retry.backoff,
      },
      cache_ttl: Duration::from_secs(self.cache.default_ttl_secs),
      headers: self
        .api
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_defaults_match_documented_values() {
    let defaults = Config::default().client_defaults();
    assert_eq!(defaults.timeout, Duration::from_secs(30));
    assert_eq!(defaults.retry.attempts, 3);
    assert_eq!(defaults.retry.delay, Duration::from_secs(1));
    assert!(!defaults.retry.backoff);
    assert_eq!(defaults.cache_ttl, Duration::from_secs(300));
    assert_eq!(Config::default().cache.sweep_interval(), Some(Duration::from_secs(60)));
  }

  #[test]
  fn test_parse_partial_file() {
    let config = Config::parse(
      r#"
api:
  base_url: https://api.example.com
  headers:
    Accept: application/json
retry:
  attempts: 5
  backoff: true
cache:
  sweep_interval_secs: 0
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url, "https://api.example.com");
    assert_eq!(config.api.timeout_ms, 30_000);
    assert_eq!(config.retry.attempts, 5);
    assert_eq!(config.retry.delay_ms, 1_000);
    assert!(config.retry.backoff);
    assert_eq!(config.cache.sweep_interval(), None);

    let defaults = config.client_defaults();
    assert_eq!(
      defaults.headers,
      vec![("Accept".to_string(), "application/json".to_string())]
    );
  }

  #[test]
  fn test_parse_empty_file() {
    let config = Config::parse("").unwrap();
    assert!(config.log_dir.is_none());
    assert_eq!(config.retry.attempts, 3);
  }

  #[test]
  fn test_zero_attempts_clamped() {
    let config = Config::parse("retry:\n  attempts: 0\n").unwrap();
    assert_eq!(config.client_defaults().retry.attempts, 1);
  }

  #[test]
  fn test_load_explicit_path() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "api:\n  timeout_ms: 500").unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.api.timeout_ms, 500);
  }

  #[test]
  fn test_load_missing_explicit_path_fails() {
    let err = Config::load(Some(Path::new("/nonexistent/fetchkit.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
