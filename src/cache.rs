//! Read-through cache in front of the aggregated stats API.
//!
//! A resource is looked up in the shared cache first (when one is configured), then in the local
//! time-expiring cache, and only fetched from upstream when both miss.  When upstream is down the
//! last value ever seen locally is served, however old it is.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use lru_time_cache::LruCache;
use serde_json::Value;
use crate::normalize::is_valid_address;
use crate::participation::{calculate_pplns_participation, ShareRecord};
use crate::remote_client::JsonSource;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
  TotalHashStats,
  PaymentStats,
  PoolStats,
  BlockStats,
  LiveMinerData,
  Shares,
  MinerStats,
  MinerBlocks,
  MinerPayments,
  MinerWorkers,
}

impl Resource {
  pub const ALL: [Resource; 10] = [
    Resource::TotalHashStats,
    Resource::PaymentStats,
    Resource::PoolStats,
    Resource::BlockStats,
    Resource::LiveMinerData,
    Resource::Shares,
    Resource::MinerStats,
    Resource::MinerBlocks,
    Resource::MinerPayments,
    Resource::MinerWorkers,
  ];

  pub fn name(&self) -> &'static str {
    match *self {
      Resource::TotalHashStats => "total_hash_stats",
      Resource::PaymentStats => "payment_stats",
      Resource::PoolStats => "pool_stats",
      Resource::BlockStats => "block_stats",
      Resource::LiveMinerData => "live_miner_data",
      Resource::Shares => "shares",
      Resource::MinerStats => "miner_stats",
      Resource::MinerBlocks => "miner_blocks",
      Resource::MinerPayments => "miner_payments",
      Resource::MinerWorkers => "miner_workers",
    }
  }

  /// Whether the resource is read for one miner address.
  pub fn per_miner(&self) -> bool {
    match *self {
      Resource::MinerStats | Resource::MinerBlocks | Resource::MinerPayments | Resource::MinerWorkers => true,
      _ => false,
    }
  }

  pub fn from_name(name: &str) -> Option<Resource> {
    let name = name.replace('-', "_");
    Resource::ALL.iter().cloned().find(|resource| resource.name() == name)
  }

  /// Upstream path.  `address` is only used by the per-miner resources.
  pub fn path(&self, address: &str) -> String {
    match *self {
      Resource::TotalHashStats => "/sigscore/history".to_owned(),
      Resource::PaymentStats => "/miningcore/payments".to_owned(),
      Resource::PoolStats => "/miningcore/poolstats".to_owned(),
      Resource::BlockStats => "/miningcore/blocks".to_owned(),
      Resource::LiveMinerData => "/sigscore/miners".to_owned(),
      Resource::Shares => "/miningcore/shares".to_owned(),
      Resource::MinerStats => format!("/sigscore/miners/{}", address),
      Resource::MinerBlocks => format!("/miningcore/blocks/{}", address),
      Resource::MinerPayments => format!("/miningcore/payments/{}", address),
      Resource::MinerWorkers => format!("/sigscore/miners/{}/workers", address),
    }
  }

  /// Aggregates move slowly, shares change with every submission.
  pub fn default_ttl(&self) -> Duration {
    match *self {
      Resource::TotalHashStats | Resource::PaymentStats | Resource::MinerPayments => Duration::from_secs(30 * 60),
      Resource::PoolStats | Resource::BlockStats | Resource::LiveMinerData => Duration::from_secs(60),
      Resource::MinerStats | Resource::MinerBlocks | Resource::MinerWorkers => Duration::from_secs(60),
      Resource::Shares => Duration::from_secs(30),
    }
  }

  fn capacity(&self) -> usize {
    if self.per_miner() {
      return 1000;
    }
    match *self {
      Resource::LiveMinerData => 1000,
      _ => 100,
    }
  }
}

/// A cache shared between processes.  Failures are reported as misses.
pub trait SharedCache: Send + Sync {
  fn get(&self, key: &str) -> Option<String>;
  fn set(&self, key: &str, value: &str, ttl: Duration);
}

pub struct RedisCache {
  client: redis::Client,
  connection: Mutex<Option<redis::Connection>>,
}

impl RedisCache {
  pub fn new(url: &str) -> redis::RedisResult<RedisCache> {
    Ok(RedisCache {
      client: redis::Client::open(url)?,
      connection: Mutex::new(None),
    })
  }

  fn with_connection<T, F>(&self, command: F) -> Option<T>
    where F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T> {
    let mut guard = match self.connection.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    };
    if guard.is_none() {
      match self.client.get_connection_with_timeout(Duration::from_secs(2)) {
        Ok(connection) => *guard = Some(connection),
        Err(err) => {
          debug!("Shared cache unreachable: {}", err);
          return None;
        },
      }
    }
    let result = guard.as_mut().map(command)?;
    match result {
      Ok(value) => Some(value),
      Err(err) => {
        warn!("Shared cache command failed, reconnecting next time: {}", err);
        *guard = None;
        None
      },
    }
  }
}

impl SharedCache for RedisCache {
  fn get(&self, key: &str) -> Option<String> {
    self.with_connection(|conn| redis::cmd("GET").arg(key).query::<Option<String>>(conn))?
  }

  fn set(&self, key: &str, value: &str, ttl: Duration) {
    let seconds = ttl.as_secs().max(1);
    self.with_connection(|conn| redis::cmd("SETEX").arg(key).arg(seconds).arg(value).query::<()>(conn));
  }
}

struct LocalTier {
  ttl: Duration,
  fresh: Mutex<LruCache<String, Value>>,
  last_known: Mutex<LruCache<String, Value>>,
}

impl LocalTier {
  fn new(ttl: Duration, capacity: usize) -> LocalTier {
    LocalTier {
      ttl,
      fresh: Mutex::new(LruCache::with_expiry_duration_and_capacity(ttl, capacity)),
      last_known: Mutex::new(LruCache::with_capacity(capacity)),
    }
  }

  fn fresh(&self, key: &str) -> Option<Value> {
    self.fresh.lock().ok()?.peek(key).cloned()
  }

  fn stale(&self, key: &str) -> Option<Value> {
    self.last_known.lock().ok()?.peek(key).cloned()
  }

  fn store(&self, key: &str, value: &Value) {
    if let Ok(mut fresh) = self.fresh.lock() {
      fresh.insert(key.to_owned(), value.clone());
    }
    if let Ok(mut last_known) = self.last_known.lock() {
      last_known.insert(key.to_owned(), value.clone());
    }
  }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HashHistory {
  pub timestamp: Vec<String>,
  pub total_hashrate: Vec<f64>,
}

pub struct CacheLayer {
  source: Arc<dyn JsonSource>,
  base_url: String,
  shared: Option<Box<dyn SharedCache>>,
  tiers: BTreeMap<Resource, LocalTier>,
}

impl CacheLayer {
  pub fn new(source: Arc<dyn JsonSource>, base_url: &str, shared: Option<Box<dyn SharedCache>>,
             ttl_overrides: &HashMap<String, u64>) -> CacheLayer {
    let tiers = Resource::ALL.iter().map(|resource| {
      let ttl = ttl_overrides.get(resource.name())
        .map(|secs| Duration::from_secs(*secs))
        .unwrap_or_else(|| resource.default_ttl());
      (*resource, LocalTier::new(ttl, resource.capacity()))
    }).collect();
    CacheLayer {
      source,
      base_url: base_url.trim_end_matches('/').to_owned(),
      shared,
      tiers,
    }
  }

  #[cfg(test)]
  fn with_ttls(source: Arc<dyn JsonSource>, shared: Option<Box<dyn SharedCache>>,
               ttl: Duration) -> CacheLayer {
    let mut cache = CacheLayer::new(source, "http://stats", shared, &HashMap::new());
    for resource in Resource::ALL.iter() {
      cache.tiers.insert(*resource, LocalTier::new(ttl, resource.capacity()));
    }
    cache
  }

  pub fn url(&self, resource: Resource, address: &str) -> String {
    format!("{}{}", self.base_url, resource.path(address))
  }

  /// A pool-wide resource.  Per-miner resources go through `get_for_miner`.
  pub fn get(&self, resource: Resource) -> Option<Value> {
    if resource.per_miner() {
      error!("{} needs a miner address", resource.name());
      return None;
    }
    self.lookup(resource, resource.name().to_owned(), "")
  }

  pub fn get_for_miner(&self, resource: Resource, address: &str) -> Option<Value> {
    if !resource.per_miner() {
      return self.get(resource);
    }
    if !is_valid_address(address) {
      warn!("Not looking up {} for malformed address {:?}", resource.name(), address);
      return None;
    }
    self.lookup(resource, format!("{}:{}", resource.name(), address), address)
  }

  fn lookup(&self, resource: Resource, key: String, address: &str) -> Option<Value> {
    let key = key.as_str();
    let shared_key = format!("poolwatch:{}", key);
    let tier = &self.tiers[&resource];

    if let Some(shared) = &self.shared {
      let cached = shared.get(&shared_key)
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
      if let Some(value) = cached {
        tier.store(key, &value);
        return Some(value);
      }
    }

    if let Some(value) = tier.fresh(key) {
      return Some(value);
    }

    match self.source.fetch_json(&self.url(resource, address)) {
      Some(value) => {
        tier.store(key, &value);
        if let Some(shared) = &self.shared {
          shared.set(&shared_key, &value.to_string(), tier.ttl);
        }
        Some(value)
      },
      None => {
        let stale = tier.stale(key);
        if stale.is_some() {
          warn!("Serving stale {} after failed refresh", key);
        } else {
          warn!("No data available for {}", key);
        }
        stale
      },
    }
  }

  pub fn total_hash_stats(&self) -> HashHistory {
    let records = match self.get(Resource::TotalHashStats) {
      Some(Value::Array(records)) => records,
      Some(other) => {
        error!("Unexpected total hash stats format: {}", other);
        return HashHistory::default();
      },
      None => return HashHistory::default(),
    };
    HashHistory {
      timestamp: records.iter()
        .map(|record| record.get("timestamp").and_then(Value::as_str).unwrap_or_default().to_owned())
        .collect(),
      total_hashrate: records.iter()
        .map(|record| record.get("total_hashrate").and_then(Value::as_f64).unwrap_or(0.0))
        .collect(),
    }
  }

  /// Sum of every payment the pool has made.
  pub fn payment_stats(&self) -> f64 {
    match self.get(Resource::PaymentStats) {
      Some(Value::Array(payments)) => payments.iter()
        .filter_map(|payment| payment.get("amount"))
        .filter_map(|amount| amount.as_f64().or_else(|| amount.as_str()?.parse().ok()))
        .sum(),
      _ => 0.0,
    }
  }

  /// The most recent pool stats record.
  pub fn pool_stats(&self) -> Option<Value> {
    match self.get(Resource::PoolStats)? {
      Value::Array(mut records) => records.pop(),
      Value::Null => None,
      record => Some(record),
    }
  }

  pub fn block_stats(&self) -> Vec<Value> {
    match self.get(Resource::BlockStats) {
      Some(Value::Array(blocks)) => blocks,
      _ => vec![],
    }
  }

  pub fn live_miner_data(&self) -> Value {
    self.get(Resource::LiveMinerData).unwrap_or(Value::Null)
  }

  pub fn shares(&self) -> Vec<ShareRecord> {
    match self.get(Resource::Shares) {
      Some(Value::Array(shares)) => shares.iter().filter_map(ShareRecord::from_value).collect(),
      _ => vec![],
    }
  }

  pub fn participation(&self, n_factor: f64) -> (HashMap<String, f64>, f64) {
    let shares = match self.get(Resource::Shares) {
      Some(Value::Array(shares)) => shares,
      _ => vec![],
    };
    let pool = self.pool_stats().unwrap_or(Value::Null);
    calculate_pplns_participation(&shares, &pool, n_factor)
  }

  pub fn miner_stats(&self, address: &str) -> Value {
    self.get_for_miner(Resource::MinerStats, address).unwrap_or(Value::Null)
  }

  /// Blocks found by `address`.
  pub fn miner_blocks(&self, address: &str) -> Vec<Value> {
    match self.get_for_miner(Resource::MinerBlocks, address) {
      Some(Value::Array(blocks)) => blocks,
      _ => vec![],
    }
  }

  /// Payments made to `address`.
  pub fn miner_payments(&self, address: &str) -> Vec<Value> {
    match self.get_for_miner(Resource::MinerPayments, address) {
      Some(Value::Array(payments)) => payments,
      _ => vec![],
    }
  }

  pub fn miner_workers(&self, address: &str) -> Value {
    self.get_for_miner(Resource::MinerWorkers, address).unwrap_or(Value::Null)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::thread;
  use crate::remote_client::fake::FakeSource;

  #[derive(Default)]
  struct MemoryShared {
    values: Mutex<HashMap<String, String>>,
  }

  impl SharedCache for Arc<MemoryShared> {
    fn get(&self, key: &str) -> Option<String> {
      self.values.lock().unwrap().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str, _ttl: Duration) {
      self.values.lock().unwrap().insert(key.to_owned(), value.to_owned());
    }
  }

  #[test]
  fn test_second_read_within_ttl_is_cached() {
    let source = Arc::new(FakeSource::new()
      .with("http://stats/miningcore/shares", json!([{"miner": "9fAAA", "shares": 10}])));
    let cache = CacheLayer::new(source.clone(), "http://stats", None, &HashMap::new());
    let first = cache.get(Resource::Shares);
    let second = cache.get(Resource::Shares);
    assert_eq!(first, second);
    assert!(first.is_some());
    assert_eq!(source.calls("http://stats/miningcore/shares"), 1);
  }

  #[test]
  fn test_stale_value_served_when_upstream_down() {
    let url = "http://stats/miningcore/poolstats";
    let source = Arc::new(FakeSource::new().with(url, json!([{"poolhashrate": 5e10}])));
    let cache = CacheLayer::with_ttls(source.clone(), None, Duration::from_millis(50));
    assert!(cache.get(Resource::PoolStats).is_some());

    source.remove(url);
    thread::sleep(Duration::from_millis(120));
    let stale = cache.get(Resource::PoolStats);
    assert_eq!(stale, Some(json!([{"poolhashrate": 5e10}])));
    assert_eq!(source.calls(url), 2);
  }

  #[test]
  fn test_refetches_after_expiry() {
    let url = "http://stats/miningcore/blocks";
    let source = Arc::new(FakeSource::new().with(url, json!([{"blockHeight": 1}])));
    let cache = CacheLayer::with_ttls(source.clone(), None, Duration::from_millis(50));
    assert_eq!(cache.block_stats().len(), 1);
    source.set(url, json!([{"blockHeight": 1}, {"blockHeight": 2}]));
    thread::sleep(Duration::from_millis(120));
    assert_eq!(cache.block_stats().len(), 2);
    assert_eq!(source.calls(url), 2);
  }

  #[test]
  fn test_miss_everywhere_is_absent() {
    let cache = CacheLayer::new(Arc::new(FakeSource::new()), "http://stats", None, &HashMap::new());
    assert!(cache.get(Resource::LiveMinerData).is_none());
    assert_eq!(cache.payment_stats(), 0.0);
    assert!(cache.shares().is_empty());
    assert_eq!(cache.total_hash_stats(), HashHistory::default());
  }

  #[test]
  fn test_shared_tier_is_consulted_first() {
    let shared = Arc::new(MemoryShared::default());
    shared.set("poolwatch:payment_stats", "[{\"amount\": 2.5}, {\"amount\": \"1.5\"}]", Duration::from_secs(1));
    let source = Arc::new(FakeSource::new());
    let cache = CacheLayer::new(source.clone(), "http://stats", Some(Box::new(shared.clone())),
                                &HashMap::new());
    assert_eq!(cache.payment_stats(), 4.0);
    assert_eq!(source.calls("http://stats/miningcore/payments"), 0);
  }

  #[test]
  fn test_fetch_populates_shared_tier() {
    let shared = Arc::new(MemoryShared::default());
    let source = Arc::new(FakeSource::new()
      .with("http://stats/sigscore/history", json!([{"timestamp": "2024-06-01 10:00:00", "total_hashrate": 5.5}])));
    let cache = CacheLayer::new(source, "http://stats", Some(Box::new(shared.clone())), &HashMap::new());
    let history = cache.total_hash_stats();
    assert_eq!(history.timestamp, vec!["2024-06-01 10:00:00".to_owned()]);
    assert_eq!(history.total_hashrate, vec![5.5]);
    assert!(shared.get("poolwatch:total_hash_stats").is_some());
  }

  #[test]
  fn test_participation_from_cached_shares() {
    let source = Arc::new(FakeSource::new()
      .with("http://stats/miningcore/shares", json!([
        {"miner": "9fAAA", "shares": 30, "last_share": "2024-06-01T10:00:00Z"},
        {"miner": "9fBBB", "sharecount": 10},
      ])));
    let cache = CacheLayer::new(source, "http://stats", None, &HashMap::new());
    let (participation, total) = cache.participation(1.0);
    assert_eq!(total, 40.0);
    assert_eq!(participation["9fAAA"], 0.75);
    assert_eq!(cache.shares().len(), 2);
  }

  const MINER: &str = "9fAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

  #[test]
  fn test_per_miner_entries_are_cached_separately() {
    let other = "9fBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB";
    let source = Arc::new(FakeSource::new()
      .with(&format!("http://stats/miningcore/blocks/{}", MINER), json!([{"blockHeight": 1}]))
      .with(&format!("http://stats/miningcore/blocks/{}", other), json!([{"blockHeight": 2}, {"blockHeight": 3}])));
    let cache = CacheLayer::new(source.clone(), "http://stats", None, &HashMap::new());
    assert_eq!(cache.miner_blocks(MINER).len(), 1);
    assert_eq!(cache.miner_blocks(other).len(), 2);
    assert_eq!(cache.miner_blocks(MINER).len(), 1);
    assert_eq!(source.calls(&format!("http://stats/miningcore/blocks/{}", MINER)), 1);
  }

  #[test]
  fn test_per_miner_paths() {
    let source = Arc::new(FakeSource::new()
      .with(&format!("http://stats/sigscore/miners/{}", MINER), json!({"address": MINER}))
      .with(&format!("http://stats/sigscore/miners/{}/workers", MINER), json!({"rig1": {"hashrate": 5.0}}))
      .with(&format!("http://stats/miningcore/payments/{}", MINER), json!([{"amount": 1.5}])));
    let cache = CacheLayer::new(source, "http://stats", None, &HashMap::new());
    assert_eq!(cache.miner_stats(MINER)["address"], json!(MINER));
    assert_eq!(cache.miner_workers(MINER)["rig1"]["hashrate"], json!(5.0));
    assert_eq!(cache.miner_payments(MINER), vec![json!({"amount": 1.5})]);
  }

  #[test]
  fn test_malformed_address_is_not_fetched() {
    let source = Arc::new(FakeSource::new());
    let cache = CacheLayer::new(source.clone(), "http://stats", None, &HashMap::new());
    assert!(cache.miner_blocks("../poolstats").is_empty());
    assert_eq!(source.calls("http://stats/miningcore/blocks/../poolstats"), 0);
    assert!(cache.get(Resource::MinerStats).is_none());
  }

  #[test]
  fn test_resource_names() {
    assert_eq!(Resource::from_name("live-miner-data"), Some(Resource::LiveMinerData));
    assert_eq!(Resource::from_name("shares"), Some(Resource::Shares));
    assert_eq!(Resource::from_name("nope"), None);
    assert_eq!(Resource::Shares.default_ttl(), Duration::from_secs(30));
    assert_eq!(Resource::from_name("miner-workers"), Some(Resource::MinerWorkers));
    assert!(Resource::MinerWorkers.per_miner());
    assert!(!Resource::PoolStats.per_miner());
  }
}
