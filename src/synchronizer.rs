use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use crate::config::Config;
use crate::db::models::*;
use crate::db::PoolStore;
use crate::error::{JobError, StoreError};
use crate::estimator::*;
use crate::normalize::*;
use crate::pool_api::*;
use crate::price::{PriceReader, Prices};
use crate::remote_client::JsonSource;

const PAYOUT_SCHEMA: &str = "PPLNS";
const NO_PAYMENT: &str = "N/A";
const NO_PAYMENT_LINK: &str = "Keep Mining!";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpsertOutcome {
  Inserted, Updated, Unchanged
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockPassReport {
  pub inserted: usize,
  pub updated: usize,
  pub unchanged: usize,
  pub failed: usize,
  pub interrupted: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MinerPassReport {
  pub synced: usize,
  pub failed: usize,
  pub samples: usize,
  pub live_workers: usize,
  pub interrupted: bool,
}

/// Difficulty in peta, hashrate in TH/s.
#[derive(Clone, Copy, Debug)]
struct NetworkConditions {
  difficulty: f64,
  hashrate: f64,
}

/// What every miner of one pass is measured against.
struct MinerPassContext {
  network: NetworkConditions,
  pool_last_block: Option<NaiveDateTime>,
  prices: Prices,
  now: DateTime<Utc>,
}

/// Combines a stored block with a newer observation of it.  Confirmation progress never goes
/// backwards and a settled status stays settled.
pub fn merge_block(stored: &BlockRecord, observed: &BlockRecord) -> BlockRecord {
  let mut merged = observed.clone();
  merged.confirmation_progress = stored.confirmation_progress.max(observed.confirmation_progress);
  if stored.block_status().is_final() {
    merged.status = stored.status;
  }
  if merged.hash.is_none() {
    merged.hash = stored.hash.clone();
  }
  if merged.info_link.is_none() {
    merged.info_link = stored.info_link.clone();
  }
  merged
}

pub fn upsert_block(store: &mut dyn PoolStore, observed: &BlockRecord) -> Result<UpsertOutcome, StoreError> {
  match store.find_block(observed.block_height)? {
    None => {
      store.insert_block(observed)?;
      Ok(UpsertOutcome::Inserted)
    },
    Some(stored) => {
      let merged = merge_block(&stored, observed);
      if merged == stored {
        return Ok(UpsertOutcome::Unchanged);
      }
      store.update_block(&merged)?;
      Ok(UpsertOutcome::Updated)
    },
  }
}

fn utc(time: NaiveDateTime) -> DateTime<Utc> {
  Utc.from_utc_datetime(&time)
}

/// Effort and TTF for `hashrate` (MH/s), with effort counted from `baseline` up to `at`.
fn estimate(network: NetworkConditions, hashrate: f64, baseline: Option<NaiveDateTime>,
            at: DateTime<Utc>) -> (f64, f64) {
  let effort = baseline
    .map(|last| mining_effort_at(network.difficulty, network.hashrate, hashrate, utc(last), at))
    .unwrap_or(0.0);
  (round_places(effort, DEFAULT_PRECISION),
   calculate_time_to_find_block(network.difficulty, network.hashrate, hashrate))
}

pub struct Synchronizer {
  pool_api: PoolApi,
  prices: PriceReader,
  pool_id: String,
  block_page_size: u32,
  miner_page_size: u32,
  fetch_workers: usize,
  shutdown: Arc<AtomicBool>,
}

impl Synchronizer {
  pub fn new(source: Arc<dyn JsonSource>, config: &Config, shutdown: Arc<AtomicBool>) -> Synchronizer {
    Synchronizer {
      pool_api: PoolApi::new(source.clone(), &config.pool_api_url),
      prices: PriceReader::new(source, config.price_api_url.as_deref()),
      pool_id: config.pool_id.clone(),
      block_page_size: config.block_page_size,
      miner_page_size: config.miner_page_size,
      fetch_workers: config.miner_fetch_workers.max(1),
      shutdown,
    }
  }

  fn stopping(&self) -> bool {
    self.shutdown.load(Ordering::SeqCst)
  }

  /// Runs the three passes in order.  Each one stands on its own, a failed pass is logged and the
  /// next one still runs.
  pub fn run_all(&self, store: &mut dyn PoolStore, now: DateTime<Utc>) {
    match self.sync_pool_stats(store, now) {
      Ok(snapshot) => info!("Pool snapshot stored: effort {}%, ttf {} days",
                            snapshot.pool_effort, snapshot.pool_ttf),
      Err(err) => error!("Pool stats pass failed: {}", err),
    }
    if self.stopping() {
      return;
    }
    match self.sync_blocks(store) {
      Ok(report) => info!("Block pass finished: {:?}", report),
      Err(err) => error!("Block pass failed: {}", err),
    }
    if self.stopping() {
      return;
    }
    match self.sync_miners(store, now) {
      Ok(report) => info!("Miner pass finished: {:?}", report),
      Err(err) => error!("Miner pass failed: {}", err),
    }
  }

  pub fn sync_pool_stats(&self, store: &mut dyn PoolStore, now: DateTime<Utc>)
                         -> Result<NewPoolSnapshot, JobError> {
    let pool = self.pool_api.pool_stats().ok_or(JobError::Unavailable("pool stats"))?;
    let snapshot = self.pool_snapshot(store, &pool, now)?;
    store.insert_pool_snapshot(&snapshot)?;
    Ok(snapshot)
  }

  fn pool_snapshot(&self, store: &mut dyn PoolStore, pool: &PoolInfo, now: DateTime<Utc>)
                   -> Result<NewPoolSnapshot, StoreError> {
    let network = &pool.network_stats;
    let pool_hashrate = to_giga(pool.pool_stats.pool_hashrate.unwrap_or(0.0));
    let conditions = NetworkConditions {
      difficulty: to_peta(network.network_difficulty.unwrap_or(0.0)),
      hashrate: to_tera(network.network_hashrate.unwrap_or(0.0)),
    };
    let last_block_found = match pool.last_pool_block_time.as_deref().and_then(parse_naive) {
      Some(time) => Some(time),
      None => {
        debug!("No last pool block time from the API, using the latest stored block");
        store.latest_block_time(None)?
      },
    };
    let (pool_effort, pool_ttf) = estimate(conditions, giga_to_mega(pool_hashrate), last_block_found, now);
    Ok(NewPoolSnapshot {
      pool_id: pool.id.clone().unwrap_or_else(|| self.pool_id.clone()),
      fee: pool.pool_fee_percent,
      paid: pool.total_paid,
      blocks: pool.total_blocks,
      last_block_found: last_block_found.map(truncate_seconds),
      pool_hashrate,
      network_hashrate: conditions.hashrate,
      network_difficulty: conditions.difficulty,
      block_height: network.block_height,
      connected_miners: pool.pool_stats.connected_miners,
      shares_per_second: pool.pool_stats.shares_per_second,
      minimum_payment: pool.payment_processing.minimum_payment,
      payout_scheme: pool.payment_processing.payout_scheme.clone(),
      pool_effort,
      pool_ttf,
      insert_time_stamp: truncate_seconds(now.naive_utc()),
    })
  }

  pub fn block_record(&self, block: &ApiBlock) -> Option<BlockRecord> {
    let time_found = parse_naive(&block.created)?;
    Some(BlockRecord {
      block_height: block.block_height,
      pool_id: block.pool_id.clone().unwrap_or_else(|| self.pool_id.clone()),
      miner: block.miner.clone(),
      miner_short: abbreviate_address(&block.miner),
      time_found: truncate_seconds(time_found),
      effort: to_percent(block.effort.unwrap_or(0.0)),
      network_difficulty: to_peta(block.network_difficulty.unwrap_or(0.0)),
      reward: block.reward.unwrap_or(0.0),
      confirmation_progress: to_percent(block.confirmation_progress.unwrap_or(0.0)),
      status: BlockStatus::from_api(block.status.as_deref().unwrap_or("pending")).into(),
      hash: block.hash.clone(),
      info_link: block.info_link.clone(),
    })
  }

  pub fn sync_blocks(&self, store: &mut dyn PoolStore) -> Result<BlockPassReport, JobError> {
    let blocks = self.pool_api.blocks(self.block_page_size).ok_or(JobError::Unavailable("blocks"))?;
    let mut report = BlockPassReport::default();
    for block in &blocks {
      if self.stopping() {
        info!("Shutdown requested, block pass stopped before height {}", block.block_height);
        report.interrupted = true;
        break;
      }
      let record = match self.block_record(block) {
        Some(record) => record,
        None => {
          warn!("Skipping block {} with unreadable time {:?}", block.block_height, block.created);
          report.failed += 1;
          continue;
        },
      };
      match upsert_block(store, &record) {
        Ok(UpsertOutcome::Inserted) => report.inserted += 1,
        Ok(UpsertOutcome::Updated) => report.updated += 1,
        Ok(UpsertOutcome::Unchanged) => report.unchanged += 1,
        Err(err) => {
          warn!("Could not store block {}: {}", record.block_height, err);
          report.failed += 1;
        },
      }
    }
    Ok(report)
  }

  pub fn sync_miners(&self, store: &mut dyn PoolStore, now: DateTime<Utc>)
                     -> Result<MinerPassReport, JobError> {
    let miners = self.pool_api.miners(self.miner_page_size).ok_or(JobError::Unavailable("miner list"))?;
    let context = MinerPassContext {
      network: self.network_conditions(store)?,
      pool_last_block: store.latest_block_time(None)?,
      prices: self.prices.get().unwrap_or_default(),
      now,
    };
    let addresses: Vec<String> = miners.into_iter()
      .map(|miner| miner.miner)
      .filter(|address| {
        let valid = is_valid_address(address);
        if !valid {
          warn!("Ignoring miner with malformed address {:?}", address);
        }
        valid
      })
      .collect();

    let mut report = MinerPassReport::default();
    for batch in addresses.chunks(self.fetch_workers) {
      if self.stopping() {
        info!("Shutdown requested, miner pass stopped with {} miners synced", report.synced);
        report.interrupted = true;
        break;
      }
      for (address, detail) in batch.iter().zip(self.fetch_details(batch)) {
        let detail = match detail {
          Some(detail) => detail,
          None => {
            warn!("No data for miner {}, skipping", address);
            report.failed += 1;
            continue;
          },
        };
        match self.store_miner(store, address, &detail, &context) {
          Ok((samples, live_workers)) => {
            report.synced += 1;
            report.samples += samples;
            report.live_workers += live_workers;
          },
          Err(err) => {
            warn!("Could not store data for miner {}: {}", address, err);
            report.failed += 1;
          },
        }
      }
    }
    Ok(report)
  }

  /// Fetches the details for a batch of miners, one thread per miner when the batch has more than
  /// one.  Results come back in the order of `addresses`.
  fn fetch_details(&self, addresses: &[String]) -> Vec<Option<ApiMinerDetail>> {
    if addresses.len() == 1 {
      return vec![self.pool_api.miner_detail(&addresses[0])];
    }
    thread::scope(|scope| {
      let handles: Vec<_> = addresses.iter()
        .map(|address| scope.spawn(move || self.pool_api.miner_detail(address)))
        .collect();
      handles.into_iter()
        .map(|handle| handle.join().unwrap_or(None))
        .collect()
    })
  }

  fn network_conditions(&self, store: &mut dyn PoolStore) -> Result<NetworkConditions, JobError> {
    if let Some(pool) = self.pool_api.pool_stats() {
      let network = &pool.network_stats;
      if let (Some(difficulty), Some(hashrate)) = (network.network_difficulty, network.network_hashrate) {
        return Ok(NetworkConditions {
          difficulty: to_peta(difficulty),
          hashrate: to_tera(hashrate),
        });
      }
    }
    match store.latest_pool_snapshot()? {
      Some(snapshot) => {
        debug!("Using network stats from the snapshot taken at {}", snapshot.insert_time_stamp);
        Ok(NetworkConditions {
          difficulty: snapshot.network_difficulty,
          hashrate: snapshot.network_hashrate,
        })
      },
      None => Err(JobError::Unavailable("network stats")),
    }
  }

  /// Writes one miner's samples, live workers and payment status.  Returns the number of new samples
  /// and live worker rows.
  fn store_miner(&self, store: &mut dyn PoolStore, address: &str, detail: &ApiMinerDetail,
                 context: &MinerPassContext) -> Result<(usize, usize), StoreError> {
    // Effort counts from the miner's own last block, or from the pool's when it never found one.
    let baseline = match store.latest_block_time(Some(address))? {
      Some(time) => Some(time),
      None => context.pool_last_block,
    };
    let inserted_at = truncate_seconds(context.now.naive_utc());

    let samples = self.worker_samples(address, detail, context.network, baseline, inserted_at);
    let live_workers = self.live_workers(address, detail, context, baseline, inserted_at);
    let payment = self.payment_record(address, detail, context.prices, inserted_at);
    store.store_miner_rows(&samples, &live_workers, &payment)
  }

  /// Historical samples, each one's effort measured up to the time the sample was taken.
  fn worker_samples(&self, address: &str, detail: &ApiMinerDetail, network: NetworkConditions,
                    baseline: Option<NaiveDateTime>, inserted_at: NaiveDateTime) -> Vec<NewWorkerSample> {
    let mut samples = vec![];
    for sample in &detail.performance_samples {
      let created = match parse_naive(&sample.created) {
        Some(created) => truncate_seconds(created),
        None => {
          warn!("Skipping sample of {} with unreadable time {:?}", address, sample.created);
          continue;
        },
      };
      for (worker, stats) in &sample.workers {
        let hashrate = to_mega(stats.hashrate);
        let (effort, ttf) = estimate(network, hashrate, baseline, utc(created));
        samples.push(NewWorkerSample {
          miner: address.to_owned(),
          worker: worker.clone(),
          hashrate,
          shares_per_second: stats.shares_per_second,
          effort,
          ttf,
          created,
          inserted_at,
        });
      }
    }
    samples
  }

  fn live_workers(&self, address: &str, detail: &ApiMinerDetail, context: &MinerPassContext,
                  baseline: Option<NaiveDateTime>, inserted_at: NaiveDateTime) -> Vec<NewLiveWorker> {
    let performance = match &detail.performance {
      Some(performance) => performance,
      None => return vec![],
    };
    let created = parse_naive(&performance.created)
      .map(truncate_seconds)
      .unwrap_or(inserted_at);
    performance.workers.iter().map(|(worker, stats)| {
      let hashrate = to_mega(stats.hashrate);
      let (effort, ttf) = estimate(context.network, hashrate, baseline, context.now);
      NewLiveWorker {
        miner: address.to_owned(),
        worker: worker.clone(),
        hashrate,
        shares_per_second: stats.shares_per_second,
        effort,
        ttf,
        last_block_found: baseline,
        created,
        inserted_at,
      }
    }).collect()
  }

  fn payment_record(&self, address: &str, detail: &ApiMinerDetail, prices: Prices,
                    created_at: NaiveDateTime) -> NewPaymentRecord {
    let last_payment = match detail.last_payment.as_deref() {
      Some(raw) => format_timestamp(raw).unwrap_or_else(|| raw.to_owned()),
      None => NO_PAYMENT.to_owned(),
    };
    NewPaymentRecord {
      pool_id: self.pool_id.clone(),
      miner: address.to_owned(),
      pending_shares: detail.pending_shares.unwrap_or(0.0),
      pending_balance: detail.pending_balance.unwrap_or(0.0),
      total_paid: detail.total_paid.unwrap_or(0.0),
      today_paid: detail.today_paid.unwrap_or(0.0),
      last_payment,
      last_payment_link: detail.last_payment_link.clone().unwrap_or_else(|| NO_PAYMENT_LINK.to_owned()),
      payout_schema: PAYOUT_SCHEMA.to_owned(),
      price: prices.erg_usd,
      price_btc: prices.erg_btc(),
      created_at,
    }
  }
}
