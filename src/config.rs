use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Platform root, e.g. "https://qa.example.com"
  pub base_url: Option<String>,
  /// Per-attempt network timeout in seconds
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
  /// Serve canned responses instead of calling the network
  #[serde(default)]
  pub mock_mode: bool,
  #[serde(default = "default_tenant_id")]
  pub tenant_id: String,
  #[serde(default)]
  pub security: SecurityConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
  /// Cookie holding the forgery-protection token
  pub csrf_cookie: String,
  /// Header the token is echoed in
  pub csrf_header: String,
  pub tenant_header: String,
}

impl Default for SecurityConfig {
  fn default() -> Self {
    Self {
      csrf_cookie: "XSRF-TOKEN".to_string(),
      csrf_header: "X-XSRF-TOKEN".to_string(),
      tenant_header: "X-Tenant-Id".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_attempts: u32,
  pub base_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 1000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub ttl_secs: u64,
  pub max_entries: usize,
  /// Share of entries dropped when the cache is full
  pub evict_fraction: f64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_secs: 300,
      max_entries: 100,
      evict_fraction: 0.2,
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_tenant_id() -> String {
  "default".to_string()
}

impl Default for Config {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_secs: default_timeout_secs(),
      mock_mode: false,
      tenant_id: default_tenant_id(),
      security: SecurityConfig::default(),
      retry: RetryConfig::default(),
      cache: CacheConfig::default(),
    }
  }
}

impl Config {
  /// Build a configuration pointing at `base_url` with every other field defaulted.
  pub fn for_base_url(base_url: impl Into<String>) -> Self {
    Self {
      base_url: Some(base_url.into()),
      ..Self::default()
    }
  }

  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./qna.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/qna/config.yaml
  ///
  /// Without a file, defaults are used and the base URL must come from the environment.
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
    config.apply_env(|name| std::env::var(name).ok())?;

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("qna.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("qna").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Apply `QNA_*` overrides using the given variable lookup.
  pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(url) = lookup("QNA_BASE_URL") {
      self.base_url = Some(url);
    }
    if let Some(timeout) = lookup("QNA_TIMEOUT_SECS") {
      self.timeout_secs = timeout
        .trim()
        .parse()
        .map_err(|_| eyre!("QNA_TIMEOUT_SECS must be a whole number of seconds, got {:?}", timeout))?;
    }
    if let Some(mock) = lookup("QNA_MOCK_MODE") {
      self.mock_mode = matches!(
        mock.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
      );
    }
    if let Some(tenant) = lookup("QNA_TENANT_ID") {
      self.tenant_id = tenant;
    }
    Ok(())
  }

  /// Parsed base URL. Mock mode falls back to a placeholder host.
  pub fn base_url(&self) -> Result<Url, crate::error::ApiError> {
    use crate::error::ApiError;

    let raw = match (&self.base_url, self.mock_mode) {
      (Some(url), _) => url.as_str(),
      (None, true) => "http://mock.invalid",
      (None, false) => {
        return Err(ApiError::Config(
          "no base URL configured; set base_url or QNA_BASE_URL".to_string(),
        ))
      }
    };

    Url::parse(raw).map_err(|e| ApiError::Config(format!("invalid base URL {:?}: {}", raw, e)))
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;

  #[test]
  fn test_defaults_from_minimal_yaml() {
    let config = Config::from_yaml("base_url: https://qa.example.com\n").unwrap();
    assert_eq!(config.timeout_secs, 30);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.base_delay_ms, 1000);
    assert_eq!(config.cache.ttl_secs, 300);
    assert_eq!(config.cache.max_entries, 100);
    assert_eq!(config.security.csrf_cookie, "XSRF-TOKEN");
    assert!(!config.mock_mode);
  }

  #[test]
  fn test_nested_overrides() {
    let yaml = "base_url: http://localhost:8080\nretry:\n  max_attempts: 5\ncache:\n  ttl_secs: 60\n";
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 1000);
    assert_eq!(config.cache.ttl_secs, 60);
    assert_eq!(config.cache.max_entries, 100);
  }

  #[test]
  fn test_env_overrides() {
    let env: HashMap<&str, &str> = [
      ("QNA_BASE_URL", "http://override:9000"),
      ("QNA_TIMEOUT_SECS", "5"),
      ("QNA_MOCK_MODE", "true"),
      ("QNA_TENANT_ID", "acme"),
    ]
    .into_iter()
    .collect();

    let mut config = Config::default();
    config
      .apply_env(|name| env.get(name).map(|v| v.to_string()))
      .unwrap();

    assert_eq!(config.base_url.as_deref(), Some("http://override:9000"));
    assert_eq!(config.timeout(), Duration::from_secs(5));
    assert!(config.mock_mode);
    assert_eq!(config.tenant_id, "acme");
  }

  #[test]
  fn test_bad_timeout_rejected() {
    let mut config = Config::default();
    let result = config.apply_env(|name| (name == "QNA_TIMEOUT_SECS").then(|| "soon".to_string()));
    assert!(result.is_err());
  }

  #[test]
  fn test_missing_base_url() {
    assert!(Config::default().base_url().is_err());

    let mock = Config {
      mock_mode: true,
      ..Config::default()
    };
    assert!(mock.base_url().is_ok());
  }
}
