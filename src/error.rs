use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("could not read config file {path}: {source}")]
  Read { path: String, source: io::Error },
  #[error("invalid config file: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("DATABASE_URL must be set")]
  MissingDatabaseUrl,
  #[error("invalid config value for {field}: {reason}")]
  Invalid { field: &'static str, reason: String },
}

/// Failures seen by a single request attempt.  These never leave the remote client, callers only
/// see the absence of a value once retries are exhausted.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("transport error: {0}")]
  Transport(#[from] reqwest::Error),
  #[error("unexpected status {0}")]
  Status(u16),
  #[error("invalid json: {0}")]
  Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("query failed: {0}")]
  Query(#[from] diesel::result::Error),
  #[error("could not connect: {0}")]
  Connection(#[from] diesel::ConnectionError),
  #[error("no available database connection: {0}")]
  Pool(#[from] r2d2::Error),
}

#[derive(Debug, Error)]
pub enum StartupError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("could not build http client: {0}")]
  Client(#[from] FetchError),
  #[error("could not set up logging: {0}")]
  Logger(String),
  #[error("could not register signal handler: {0}")]
  Signal(io::Error),
}

/// Why a whole pass or cycle of a job was abandoned.  Failures of a single unit (one block, one
/// miner) are logged where they happen and never become a `JobError`.
#[derive(Debug, Error)]
pub enum JobError {
  #[error("{0} unavailable")]
  Unavailable(&'static str),
  #[error(transparent)]
  Store(#[from] StoreError),
}
