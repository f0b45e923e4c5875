use std::collections::{BTreeMap, HashSet};
use chrono::NaiveDateTime;
use crate::db::models::*;
use crate::db::PoolStore;
use crate::error::StoreError;

/// In-process store for exercising the jobs.  Every mutating call is counted in `writes`.
#[derive(Default)]
pub struct MemoryStore {
  pub snapshots: Vec<NewPoolSnapshot>,
  pub blocks: BTreeMap<i64, BlockRecord>,
  pub performance: Vec<NewWorkerSample>,
  pub live_workers: Vec<NewLiveWorker>,
  pub payments: Vec<NewPaymentRecord>,
  pub thresholds: BTreeMap<(String, String), f64>,
  pub block_writes: usize,
  pub threshold_writes: usize,
  pub fail_blocks: HashSet<i64>,
  /// Miners whose payment write fails, taking the rest of their rows down with it.
  pub fail_payments: HashSet<String>,
}

impl MemoryStore {
  pub fn new() -> MemoryStore {
    MemoryStore::default()
  }

  pub fn writes(&self) -> usize {
    self.block_writes + self.threshold_writes + self.snapshots.len() + self.performance.len()
      + self.live_workers.len() + self.payments.len()
  }

  fn check_block(&self, height: i64) -> Result<(), StoreError> {
    if self.fail_blocks.contains(&height) {
      return Err(StoreError::Query(diesel::result::Error::RollbackTransaction));
    }
    Ok(())
  }
}

impl PoolStore for MemoryStore {
  fn insert_pool_snapshot(&mut self, snapshot: &NewPoolSnapshot) -> Result<(), StoreError> {
    self.snapshots.push(snapshot.clone());
    Ok(())
  }

  fn latest_pool_snapshot(&mut self) -> Result<Option<PoolSnapshot>, StoreError> {
    let latest = self.snapshots.iter().enumerate()
      .max_by_key(|&(_, snapshot)| snapshot.insert_time_stamp)
      .map(|(index, s)| PoolSnapshot {
        id: index as i32 + 1,
        pool_id: s.pool_id.clone(),
        fee: s.fee,
        paid: s.paid,
        blocks: s.blocks,
        last_block_found: s.last_block_found,
        pool_hashrate: s.pool_hashrate,
        network_hashrate: s.network_hashrate,
        network_difficulty: s.network_difficulty,
        block_height: s.block_height,
        connected_miners: s.connected_miners,
        shares_per_second: s.shares_per_second,
        minimum_payment: s.minimum_payment,
        payout_scheme: s.payout_scheme.clone(),
        pool_effort: s.pool_effort,
        pool_ttf: s.pool_ttf,
        insert_time_stamp: s.insert_time_stamp,
      });
    Ok(latest)
  }

  fn find_block(&mut self, height: i64) -> Result<Option<BlockRecord>, StoreError> {
    Ok(self.blocks.get(&height).cloned())
  }

  fn insert_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
    self.check_block(block.block_height)?;
    if self.blocks.contains_key(&block.block_height) {
      return Err(StoreError::Query(diesel::result::Error::NotFound));
    }
    self.blocks.insert(block.block_height, block.clone());
    self.block_writes += 1;
    Ok(())
  }

  fn update_block(&mut self, block: &BlockRecord) -> Result<(), StoreError> {
    self.check_block(block.block_height)?;
    self.blocks.insert(block.block_height, block.clone());
    self.block_writes += 1;
    Ok(())
  }

  fn latest_block_time(&mut self, miner: Option<&str>) -> Result<Option<NaiveDateTime>, StoreError> {
    Ok(self.blocks.values()
      .filter(|block| miner.map_or(true, |miner| block.miner == miner))
      .map(|block| block.time_found)
      .max())
  }

  fn store_miner_rows(&mut self, samples: &[NewWorkerSample], live_workers: &[NewLiveWorker],
                      payment: &NewPaymentRecord) -> Result<(usize, usize), StoreError> {
    if self.fail_payments.contains(&payment.miner) {
      return Err(StoreError::Query(diesel::result::Error::RollbackTransaction));
    }
    let mut new_samples = 0;
    for sample in samples {
      let exists = self.performance.iter().any(|stored| {
        stored.miner == sample.miner && stored.worker == sample.worker && stored.created == sample.created
      });
      if !exists {
        self.performance.push(sample.clone());
        new_samples += 1;
      }
    }
    self.live_workers.extend(live_workers.iter().cloned());
    self.payments.retain(|stored| !(stored.miner == payment.miner && stored.pool_id == payment.pool_id));
    self.payments.push(payment.clone());
    Ok((new_samples, live_workers.len()))
  }

  fn payout_threshold(&mut self, pool_id: &str, address: &str) -> Result<Option<f64>, StoreError> {
    Ok(self.thresholds.get(&(pool_id.to_owned(), address.to_owned())).cloned())
  }

  fn set_payout_threshold(&mut self, pool_id: &str, address: &str, threshold: f64) -> Result<(), StoreError> {
    if let Some(stored) = self.thresholds.get_mut(&(pool_id.to_owned(), address.to_owned())) {
      *stored = threshold;
    }
    self.threshold_writes += 1;
    Ok(())
  }
}
