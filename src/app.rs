use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use crate::cache::{CacheLayer, RedisCache, SharedCache};
use crate::chain_client::ChainClient;
use crate::config::Config;
use crate::db::DbAccess;
use crate::error::{ConfigError, StartupError};
use crate::reconciler::ThresholdReconciler;
use crate::remote_client::RemoteDataClient;
use crate::synchronizer::Synchronizer;

/// Everything a command needs, built once at startup and shared by the jobs.
pub struct App {
  pub config: Config,
  db: Option<DbAccess>,
  pub cache: CacheLayer,
  pub synchronizer: Synchronizer,
  pub reconciler: ThresholdReconciler,
}

impl App {
  pub fn new(config: Config, shutdown: Arc<AtomicBool>) -> Result<App, StartupError> {
    let db = config.database_url.as_deref().map(DbAccess::new);
    let remote = Arc::new(RemoteDataClient::new(&config)?);
    let chain = Arc::new(ChainClient::new(remote.clone(), &config));
    let cache = CacheLayer::new(remote.clone(), &config.stats_api_url, shared_cache(&config),
                                &config.cache_ttl);
    Ok(App {
      synchronizer: Synchronizer::new(remote.clone(), &config, shutdown.clone()),
      reconciler: ThresholdReconciler::new(remote, chain, &config, shutdown),
      config,
      db,
      cache,
    })
  }

  pub fn db(&self) -> Result<&DbAccess, ConfigError> {
    self.db.as_ref().ok_or(ConfigError::MissingDatabaseUrl)
  }
}

/// `None` when no `cache_url` is configured or the client cannot be built.
fn shared_cache(config: &Config) -> Option<Box<dyn SharedCache>> {
  let url = config.cache_url.as_deref()?;
  match RedisCache::new(url) {
    Ok(cache) => {
      info!("Using shared cache at {}", url);
      Some(Box::new(cache))
    },
    Err(err) => {
      warn!("Ignoring shared cache {}: {}", url, err);
      None
    },
  }
}
