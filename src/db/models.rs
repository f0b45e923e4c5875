use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sql_types::Double;
use crate::db::schema::*;

#[derive(Queryable, Clone, Debug, PartialEq)]
pub struct PoolSnapshot {
  pub id: i32,
  pub pool_id: String,
  pub fee: Option<f64>,
  pub paid: Option<f64>,
  pub blocks: Option<i64>,
  pub last_block_found: Option<NaiveDateTime>,
  pub pool_hashrate: f64,
  pub network_hashrate: f64,
  pub network_difficulty: f64,
  pub block_height: Option<i64>,
  pub connected_miners: Option<i64>,
  pub shares_per_second: Option<f64>,
  pub minimum_payment: Option<f64>,
  pub payout_scheme: Option<String>,
  pub pool_effort: f64,
  pub pool_ttf: f64,
  pub insert_time_stamp: NaiveDateTime,
}

/// Hashrates in GH/s (pool) and TH/s (network), difficulty in peta.
#[derive(Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = stats)]
pub struct NewPoolSnapshot {
  pub pool_id: String,
  pub fee: Option<f64>,
  pub paid: Option<f64>,
  pub blocks: Option<i64>,
  pub last_block_found: Option<NaiveDateTime>,
  pub pool_hashrate: f64,
  pub network_hashrate: f64,
  pub network_difficulty: f64,
  pub block_height: Option<i64>,
  pub connected_miners: Option<i64>,
  pub shares_per_second: Option<f64>,
  pub minimum_payment: Option<f64>,
  pub payout_scheme: Option<String>,
  pub pool_effort: f64,
  pub pool_ttf: f64,
  pub insert_time_stamp: NaiveDateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockStatus {
  Pending, Confirmed, Orphaned
}
impl Into<i32> for BlockStatus {
  fn into(self) -> i32 {
    match self {
      BlockStatus::Pending => 0,
      BlockStatus::Confirmed => 1,
      BlockStatus::Orphaned => 2,
    }
  }
}
impl From<i32> for BlockStatus {
  fn from(i: i32) -> BlockStatus {
    match i {
      1 => BlockStatus::Confirmed,
      2 => BlockStatus::Orphaned,
      _ => BlockStatus::Pending,
    }
  }
}
impl BlockStatus {
  pub fn from_api(status: &str) -> BlockStatus {
    match status.to_ascii_lowercase().as_str() {
      "confirmed" => BlockStatus::Confirmed,
      "orphaned" => BlockStatus::Orphaned,
      _ => BlockStatus::Pending,
    }
  }

  /// Confirmed and orphaned blocks are settled, a later observation can't move them.
  pub fn is_final(&self) -> bool {
    *self != BlockStatus::Pending
  }
}

/// `miner` is the full address and the only form used for matching, `miner_short` is for display.
/// Effort and confirmation progress are percentages, difficulty is in peta.
#[derive(Queryable, Insertable, AsChangeset, Clone, Debug, PartialEq)]
#[diesel(table_name = block)]
#[diesel(primary_key(block_height))]
pub struct BlockRecord {
  pub block_height: i64,
  pub pool_id: String,
  pub miner: String,
  pub miner_short: String,
  pub time_found: NaiveDateTime,
  pub effort: f64,
  pub network_difficulty: f64,
  pub reward: f64,
  pub confirmation_progress: f64,
  pub status: i32,
  pub hash: Option<String>,
  pub info_link: Option<String>,
}

impl BlockRecord {
  pub fn block_status(&self) -> BlockStatus {
    BlockStatus::from(self.status)
  }
}

#[derive(Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = payment)]
pub struct NewPaymentRecord {
  pub pool_id: String,
  pub miner: String,
  pub pending_shares: f64,
  pub pending_balance: f64,
  pub total_paid: f64,
  pub today_paid: f64,
  pub last_payment: String,
  pub last_payment_link: String,
  pub payout_schema: String,
  /// ERG in USD.
  pub price: f64,
  /// ERG in BTC.
  pub price_btc: f64,
  pub created_at: NaiveDateTime,
}

/// One worker at one point in time.  Hashrate in MH/s.
#[derive(Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = performance)]
pub struct NewWorkerSample {
  pub miner: String,
  pub worker: String,
  pub hashrate: f64,
  pub shares_per_second: f64,
  pub effort: f64,
  pub ttf: f64,
  pub created: NaiveDateTime,
  pub inserted_at: NaiveDateTime,
}

#[derive(Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = live_worker)]
pub struct NewLiveWorker {
  pub miner: String,
  pub worker: String,
  pub hashrate: f64,
  pub shares_per_second: f64,
  pub effort: f64,
  pub ttf: f64,
  pub last_block_found: Option<NaiveDateTime>,
  pub created: NaiveDateTime,
  pub inserted_at: NaiveDateTime,
}

#[derive(QueryableByName, Debug)]
pub struct PayoutThreshold {
  #[diesel(sql_type = Double)]
  pub paymentthreshold: f64,
}
