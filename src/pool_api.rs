//! Typed view of the pool's REST API.  Every payload is validated here, missing values become
//! `None` instead of failing the whole document.

use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Deserializer};
use serde::de::DeserializeOwned;
use serde_json::Value;
use crate::remote_client::JsonSource;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatsEnvelope {
  pub pool: PoolInfo,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolInfo {
  pub id: Option<String>,
  pub pool_fee_percent: Option<f64>,
  pub total_paid: Option<f64>,
  pub total_blocks: Option<i64>,
  pub last_pool_block_time: Option<String>,
  pub pool_effort: Option<f64>,
  pub payment_processing: PaymentProcessing,
  pub pool_stats: PoolCounters,
  pub network_stats: NetworkStats,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaymentProcessing {
  pub enabled: Option<bool>,
  pub minimum_payment: Option<f64>,
  pub payout_scheme: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolCounters {
  pub connected_miners: Option<i64>,
  /// Raw hashes per second.
  pub pool_hashrate: Option<f64>,
  pub shares_per_second: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkStats {
  pub network_type: Option<String>,
  /// Raw hashes per second.
  pub network_hashrate: Option<f64>,
  /// Raw difficulty.
  pub network_difficulty: Option<f64>,
  pub last_network_block_time: Option<String>,
  pub block_height: Option<i64>,
  pub connected_peers: Option<i64>,
  pub reward_type: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiBlock {
  pub block_height: i64,
  pub miner: String,
  pub created: String,
  #[serde(default)]
  pub pool_id: Option<String>,
  #[serde(default)]
  pub network_difficulty: Option<f64>,
  #[serde(default)]
  pub status: Option<String>,
  /// Fraction between 0 and 1.
  #[serde(default)]
  pub confirmation_progress: Option<f64>,
  /// Fraction, 1.0 being the statistically expected work.
  #[serde(default)]
  pub effort: Option<f64>,
  #[serde(default)]
  pub reward: Option<f64>,
  #[serde(default)]
  pub hash: Option<String>,
  #[serde(default)]
  pub info_link: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMinerSummary {
  pub miner: String,
  #[serde(default)]
  pub hashrate: Option<f64>,
  #[serde(default)]
  pub shares_per_second: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiMinerDetail {
  pub pending_shares: Option<f64>,
  pub pending_balance: Option<f64>,
  pub total_paid: Option<f64>,
  pub today_paid: Option<f64>,
  pub last_payment: Option<String>,
  pub last_payment_link: Option<String>,
  pub performance: Option<ApiPerformanceSample>,
  pub performance_samples: Vec<ApiPerformanceSample>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPerformanceSample {
  pub created: String,
  #[serde(default)]
  pub workers: BTreeMap<String, ApiWorkerStats>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiWorkerStats {
  /// Raw hashes per second.
  #[serde(deserialize_with = "number_or_zero")]
  pub hashrate: f64,
  #[serde(deserialize_with = "number_or_zero")]
  pub shares_per_second: f64,
}

/// Idle workers are reported with `null` rates.
fn number_or_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
  where D: Deserializer<'de> {
  let value = Value::deserialize(deserializer)?;
  Ok(match value {
    Value::Number(number) => number.as_f64().unwrap_or(0.0),
    Value::String(text) => text.trim().parse().unwrap_or(0.0),
    _ => 0.0,
  })
}

pub fn decode<T: DeserializeOwned>(what: &str, value: Value) -> Option<T> {
  match serde_json::from_value(value) {
    Ok(decoded) => Some(decoded),
    Err(err) => {
      warn!("Malformed {} payload: {}", what, err);
      None
    },
  }
}

/// Decodes each element separately, dropping the ones that don't match the expected shape.
pub fn decode_list<T: DeserializeOwned>(what: &str, value: Value) -> Option<Vec<T>> {
  match value {
    Value::Array(items) => Some(items.into_iter()
      .filter_map(|item| decode(what, item))
      .collect()),
    other => {
      warn!("Expected a list of {}, got {}", what, other);
      None
    },
  }
}

pub struct PoolApi {
  source: Arc<dyn JsonSource>,
  base_url: String,
}

impl PoolApi {
  pub fn new(source: Arc<dyn JsonSource>, base_url: &str) -> PoolApi {
    PoolApi {
      source,
      base_url: base_url.trim_end_matches('/').to_owned(),
    }
  }

  pub fn pool_stats_url(&self) -> String {
    self.base_url.clone()
  }

  pub fn blocks_url(&self, page_size: u32) -> String {
    format!("{}/blocks?pageSize={}", self.base_url, page_size)
  }

  pub fn miners_url(&self, page_size: u32) -> String {
    format!("{}/miners?pageSize={}", self.base_url, page_size)
  }

  pub fn miner_url(&self, address: &str) -> String {
    format!("{}/miners/{}", self.base_url, address)
  }

  pub fn pool_stats(&self) -> Option<PoolInfo> {
    let value = self.source.fetch_json(&self.pool_stats_url())?;
    decode::<PoolStatsEnvelope>("pool stats", value).map(|envelope| envelope.pool)
  }

  pub fn blocks(&self, page_size: u32) -> Option<Vec<ApiBlock>> {
    let value = self.source.fetch_json(&self.blocks_url(page_size))?;
    decode_list("block", value)
  }

  pub fn miners(&self, page_size: u32) -> Option<Vec<ApiMinerSummary>> {
    let value = self.source.fetch_json(&self.miners_url(page_size))?;
    decode_list("miner", value)
  }

  pub fn miner_detail(&self, address: &str) -> Option<ApiMinerDetail> {
    let value = self.source.fetch_json(&self.miner_url(address))?;
    decode("miner detail", value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote_client::fake::FakeSource;

  #[test]
  fn test_pool_stats_with_missing_sections() {
    let source = Arc::new(FakeSource::new().with("http://pool", json!({
      "pool": {
        "poolFeePercent": 0.9,
        "totalBlocks": 711,
        "lastPoolBlockTime": "2024-06-01T10:00:00.123456Z",
        "poolStats": {"poolHashrate": 50e9, "connectedMiners": 50},
        "networkStats": {"networkHashrate": 500e12, "networkDifficulty": 63e15, "blockHeight": 1250000},
      }
    })));
    let api = PoolApi::new(source, "http://pool/");
    let pool = api.pool_stats().unwrap();
    assert_eq!(pool.pool_fee_percent, Some(0.9));
    assert_eq!(pool.total_paid, None);
    assert_eq!(pool.pool_stats.pool_hashrate, Some(50e9));
    assert_eq!(pool.network_stats.block_height, Some(1250000));
    assert!(pool.payment_processing.payout_scheme.is_none());
  }

  #[test]
  fn test_blocks_skip_malformed_entries() {
    let url = "http://pool/blocks?pageSize=10";
    let source = Arc::new(FakeSource::new().with(url, json!([
      {"blockHeight": 100, "miner": "9fAAA", "created": "2024-06-01T10:00:00Z", "status": "pending",
       "confirmationProgress": 0.4},
      {"miner": "9fBBB", "created": "2024-06-01T11:00:00Z"},
    ])));
    let api = PoolApi::new(source, "http://pool");
    let blocks = api.blocks(10).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].block_height, 100);
    assert_eq!(blocks[0].confirmation_progress, Some(0.4));
  }

  #[test]
  fn test_miner_detail_without_payments() {
    let source = Arc::new(FakeSource::new().with("http://pool/miners/9fAAA", json!({
      "pendingShares": 12.5,
      "performance": {"created": "2024-06-01T10:00:00Z", "workers": {"rig1": {"hashrate": 2.5e6}}},
      "performanceSamples": [],
    })));
    let api = PoolApi::new(source, "http://pool");
    let detail = api.miner_detail("9fAAA").unwrap();
    assert_eq!(detail.pending_shares, Some(12.5));
    assert!(detail.last_payment.is_none());
    let live = detail.performance.unwrap();
    assert_eq!(live.workers["rig1"].hashrate, 2.5e6);
    assert_eq!(live.workers["rig1"].shares_per_second, 0.0);
  }

  #[test]
  fn test_null_worker_rates_read_as_zero() {
    let detail: ApiMinerDetail = serde_json::from_value(json!({
      "performance": {"created": "2024-06-01T10:00:00Z", "workers": {
        "rig1": {"hashrate": null, "sharesPerSecond": null},
        "rig2": {"hashrate": "125.5", "sharesPerSecond": 0.25},
      }},
    })).unwrap();
    let workers = detail.performance.unwrap().workers;
    assert_eq!(workers["rig1"].hashrate, 0.0);
    assert_eq!(workers["rig1"].shares_per_second, 0.0);
    assert_eq!(workers["rig2"].hashrate, 125.5);
    assert_eq!(workers["rig2"].shares_per_second, 0.25);
  }

  #[test]
  fn test_absent_on_fetch_failure() {
    let api = PoolApi::new(Arc::new(FakeSource::new()), "http://pool");
    assert!(api.pool_stats().is_none());
    assert!(api.miners(5000).is_none());
  }
}
