use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use serde_json::Value;
use crate::chain_client::{TokenDescription, TokenLookup};
use crate::config::Config;
use crate::db::PoolStore;
use crate::error::{JobError, StoreError};
use crate::remote_client::JsonSource;
use crate::schedule;

pub const MINER_PAGE_SIZE: usize = 100;
const MAX_MINER_PAGES: usize = 1000;
/// Thresholds closer than this are considered equal.
pub const THRESHOLD_EPSILON: f64 = 1e-6;
const CREDENTIAL_TYPE: &str = "Pool Config";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MinerOutcome {
  Updated { from: f64, to: f64 },
  Unchanged,
  NoCredential,
  NotInStore,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
  pub checked: usize,
  pub updated: usize,
  pub unchanged: usize,
  pub no_credential: usize,
  pub not_in_store: usize,
  pub failed: usize,
  pub interrupted: bool,
}

/// Keeps each miner's payout threshold in line with the configuration token they hold.
pub struct ThresholdReconciler {
  source: Arc<dyn JsonSource>,
  tokens: Arc<dyn TokenLookup>,
  stats_api_url: String,
  pool_id: String,
  collection_id: String,
  token_name: String,
  shutdown: Arc<AtomicBool>,
}

impl ThresholdReconciler {
  pub fn new(source: Arc<dyn JsonSource>, tokens: Arc<dyn TokenLookup>, config: &Config,
             shutdown: Arc<AtomicBool>) -> ThresholdReconciler {
    ThresholdReconciler {
      source,
      tokens,
      stats_api_url: config.stats_api_url.trim_end_matches('/').to_owned(),
      pool_id: config.pool_id.clone(),
      collection_id: config.collection_id.clone(),
      token_name: config.credential_token_name.clone(),
      shutdown,
    }
  }

  fn stopping(&self) -> bool {
    self.shutdown.load(Ordering::SeqCst)
  }

  pub fn miners_url(&self, offset: usize) -> String {
    format!("{}/sigscore/miners?limit={}&offset={}", self.stats_api_url, MINER_PAGE_SIZE, offset)
  }

  /// Every miner address, read a page at a time until a short page or a page with nothing new.
  /// `None` if not even the first page could be read.
  pub fn fetch_miners(&self) -> Option<Vec<String>> {
    let mut addresses = vec![];
    let mut seen = HashSet::new();
    let mut offset = 0;
    for page_number in 0..MAX_MINER_PAGES {
      if self.stopping() {
        info!("Shutdown requested, miner list stopped at offset {}", offset);
        break;
      }
      let page = match self.source.fetch_json(&self.miners_url(offset)) {
        Some(Value::Array(page)) => page,
        other => {
          if page_number == 0 {
            return None;
          }
          warn!("Miner list ended early at offset {}: {:?}", offset, other);
          break;
        },
      };
      let count = page.len();
      let before = addresses.len();
      for address in page.iter().filter_map(|miner| miner.get("address").and_then(Value::as_str)) {
        if !address.is_empty() && seen.insert(address.to_owned()) {
          addresses.push(address.to_owned());
        }
      }
      if count < MINER_PAGE_SIZE {
        break;
      }
      if addresses.len() == before {
        warn!("Miner list page at offset {} repeats earlier miners, stopping", offset);
        break;
      }
      offset += count;
    }
    info!("Retrieved {} miners", addresses.len());
    Some(addresses)
  }

  /// A credential only counts when it was minted by this pool's collection, as a pool configuration,
  /// for this very address.
  pub fn verify_ownership(&self, description: &TokenDescription, address: &str) -> bool {
    if description.collection_id.as_deref() != Some(self.collection_id.as_str()) {
      warn!("Token has wrong collection id: {:?}", description.collection_id);
      return false;
    }
    if description.token_type.as_deref() != Some(CREDENTIAL_TYPE) {
      warn!("Token has wrong type: {:?}", description.token_type);
      return false;
    }
    if description.address.as_deref() != Some(address) {
      warn!("Token was minted for a different address: {:?}", description.address);
      return false;
    }
    true
  }

  /// The minimum payout declared by the first verified credential `address` holds.
  pub fn credential_threshold(&self, address: &str) -> Option<f64> {
    let tokens = self.tokens.find_tokens_by_name(address, &self.token_name)?;
    if tokens.is_empty() {
      debug!("No {} token found for {}", self.token_name, address);
      return None;
    }
    for token in &tokens {
      let description = match self.tokens.token_description(&token.token_id) {
        Some(description) => description,
        None => continue,
      };
      if !self.verify_ownership(&description, address) {
        continue;
      }
      match description.minimum_payout {
        Some(payout) if payout.is_finite() && payout >= 0.0 => {
          info!("Found valid {} token for {} with minimum payout {} ERG", self.token_name, address, payout);
          return Some(payout);
        },
        other => debug!("Token {} declares no usable minimum payout: {:?}", token.token_id, other),
      }
    }
    None
  }

  pub fn process_miner(&self, store: &mut dyn PoolStore, address: &str) -> Result<MinerOutcome, StoreError> {
    let current = match store.payout_threshold(&self.pool_id, address)? {
      Some(current) => current,
      None => {
        warn!("Miner {} not found in miner settings", address);
        return Ok(MinerOutcome::NotInStore);
      },
    };
    let declared = match self.credential_threshold(address) {
      Some(declared) => declared,
      None => return Ok(MinerOutcome::NoCredential),
    };
    if (declared - current).abs() <= THRESHOLD_EPSILON {
      return Ok(MinerOutcome::Unchanged);
    }
    store.set_payout_threshold(&self.pool_id, address, declared)?;
    info!("Updated payout threshold of {}: {} -> {}", address, current, declared);
    Ok(MinerOutcome::Updated { from: current, to: declared })
  }

  pub fn run_cycle(&self, store: &mut dyn PoolStore) -> Result<CycleReport, JobError> {
    let miners = self.fetch_miners().ok_or(JobError::Unavailable("miner list"))?;
    let mut report = CycleReport::default();
    if self.stopping() {
      report.interrupted = true;
      return Ok(report);
    }
    for address in &miners {
      if self.stopping() {
        info!("Shutdown requested, reconciliation stopped after {} miners", report.checked);
        report.interrupted = true;
        break;
      }
      report.checked += 1;
      match self.process_miner(store, address) {
        Ok(MinerOutcome::Updated { .. }) => report.updated += 1,
        Ok(MinerOutcome::Unchanged) => report.unchanged += 1,
        Ok(MinerOutcome::NoCredential) => report.no_credential += 1,
        Ok(MinerOutcome::NotInStore) => report.not_in_store += 1,
        Err(err) => {
          warn!("Could not reconcile threshold of {}: {}", address, err);
          report.failed += 1;
        },
      }
    }
    Ok(report)
  }

  /// Reconciles now and then every `interval` until shutdown.  A store session is opened per cycle,
  /// and a failure of any kind only ends that cycle.
  pub fn run_forever<S, F>(&self, interval: Duration, tick_ms: u32, mut open_store: F)
    where S: PoolStore, F: FnMut() -> Result<S, StoreError> {
    schedule::run_every("threshold reconciler", interval, tick_ms, &self.shutdown, || {
      let result = open_store()
        .map_err(JobError::from)
        .and_then(|mut store| self.run_cycle(&mut store));
      match result {
        Ok(report) => info!("Threshold reconciliation finished: {:?}", report),
        Err(err) => error!("Threshold reconciliation failed: {}", err),
      }
    });
  }
}
