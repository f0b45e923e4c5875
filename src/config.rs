use std::collections::HashMap;
use std::env;
use std::fs;
use std::time::Duration;
use dotenv::dotenv;
use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
  #[serde(default = "default_log_level")]
  pub log_level: String,
  #[serde(default = "default_log_file")]
  pub log_file: String,
  #[serde(default = "default_pool_id")]
  pub pool_id: String,
  /// Base of the pool's REST API, e.g. `http://host/api/pools/ErgoSigmanauts`.
  pub pool_api_url: String,
  /// Base of the aggregated stats API the dashboards read from.
  pub stats_api_url: String,
  pub node_url: String,
  pub token_api_url: String,
  pub price_api_url: Option<String>,
  pub collection_id: String,
  #[serde(default = "default_credential_token_name")]
  pub credential_token_name: String,
  #[serde(default = "default_update_interval_hours")]
  pub update_interval_hours: f64,
  pub cache_url: Option<String>,
  #[serde(default = "default_page_size")]
  pub block_page_size: u32,
  #[serde(default = "default_page_size")]
  pub miner_page_size: u32,
  #[serde(default = "default_miner_fetch_workers")]
  pub miner_fetch_workers: usize,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
  #[serde(default = "default_retry_attempts")]
  pub retry_attempts: u32,
  #[serde(default = "default_retry_base_secs")]
  pub retry_base_secs: f64,
  /// Per-resource overrides of the cache time-to-live, in seconds, keyed by resource name.
  #[serde(default)]
  pub cache_ttl: HashMap<String, u64>,
  /// From `DATABASE_URL`.  Only the commands that touch the store need it.
  #[serde(skip)]
  pub database_url: Option<String>,
}

fn default_log_level() -> String { "info".to_owned() }
fn default_log_file() -> String { "poolwatch.log".to_owned() }
fn default_pool_id() -> String { "ErgoSigmanauts".to_owned() }
fn default_credential_token_name() -> String { "Sigma BYTES".to_owned() }
fn default_update_interval_hours() -> f64 { 3.0 }
fn default_page_size() -> u32 { 5000 }
fn default_miner_fetch_workers() -> usize { 1 }
fn default_request_timeout_secs() -> u64 { 30 }
fn default_retry_attempts() -> u32 { 3 }
fn default_retry_base_secs() -> f64 { 1.0 }

impl Config {
  pub fn update_interval(&self) -> Duration {
    Duration::try_from_secs_f64(self.update_interval_hours * 60.0 * 60.0).unwrap_or(Duration::MAX)
  }

  pub fn retry_base(&self) -> Duration {
    Duration::try_from_secs_f64(self.retry_base_secs).unwrap_or(Duration::MAX)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if !(self.update_interval_hours > 0.0) {
      return Err(ConfigError::Invalid {
        field: "update_interval_hours",
        reason: format!("must be positive, got {}", self.update_interval_hours),
      });
    }
    if Duration::try_from_secs_f64(self.update_interval_hours * 60.0 * 60.0).is_err() {
      return Err(ConfigError::Invalid {
        field: "update_interval_hours",
        reason: format!("{} hours is not a usable interval", self.update_interval_hours),
      });
    }
    if self.retry_attempts == 0 {
      return Err(ConfigError::Invalid {
        field: "retry_attempts",
        reason: "at least one attempt is required".to_owned(),
      });
    }
    if !(self.retry_base_secs >= 0.0) {
      return Err(ConfigError::Invalid {
        field: "retry_base_secs",
        reason: format!("must not be negative, got {}", self.retry_base_secs),
      });
    }
    if Duration::try_from_secs_f64(self.retry_base_secs).is_err() {
      return Err(ConfigError::Invalid {
        field: "retry_base_secs",
        reason: format!("{} seconds is not a usable delay", self.retry_base_secs),
      });
    }
    if self.miner_fetch_workers == 0 {
      return Err(ConfigError::Invalid {
        field: "miner_fetch_workers",
        reason: "at least one worker is required".to_owned(),
      });
    }
    Ok(())
  }
}

pub fn parse_config(contents: &str) -> Result<Config, ConfigError> {
  let config: Config = toml::from_str(contents)?;
  config.validate()?;
  Ok(config)
}

pub fn read_config(path: &str) -> Result<Config, ConfigError> {
  let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
    path: path.to_owned(),
    source,
  })?;
  let mut config = parse_config(&contents)?;
  dotenv().ok();
  config.database_url = env::var("DATABASE_URL").ok();
  Ok(config)
}

#[cfg(test)]
pub fn test_config() -> Config {
  Config {
    log_level: "debug".to_owned(),
    log_file: "test.log".to_owned(),
    pool_id: "ErgoSigmanauts".to_owned(),
    pool_api_url: "http://pool".to_owned(),
    stats_api_url: "http://stats".to_owned(),
    node_url: "http://node".to_owned(),
    token_api_url: "http://tokens".to_owned(),
    price_api_url: None,
    collection_id: "collection".to_owned(),
    credential_token_name: "Sigma BYTES".to_owned(),
    update_interval_hours: 3.0,
    cache_url: None,
    block_page_size: 5000,
    miner_page_size: 5000,
    miner_fetch_workers: 1,
    request_timeout_secs: 1,
    retry_attempts: 3,
    retry_base_secs: 0.0,
    cache_ttl: HashMap::new(),
    database_url: None,
  }
}
