use chrono::NaiveDateTime;
use diesel::connection::SimpleConnection;
use diesel::dsl::max;
use diesel::prelude::*;
use diesel::r2d2::ConnectionManager;
use diesel::sql_types::{Double, Text};
use r2d2::{Pool, PooledConnection};
use crate::db::models::*;
use crate::db::schema::*;
use crate::error::StoreError;

mod schema;
pub mod models;
#[cfg(test)]
pub mod memory;

/// The writes and lookups the sync jobs need.  One value is one exclusive session, statements run
/// one after another.
pub trait PoolStore {
  fn insert_pool_snapshot(&mut self, snapshot: &NewPoolSnapshot) -> Result<(), StoreError>;
  fn latest_pool_snapshot(&mut self) -> Result<Option<PoolSnapshot>, StoreError>;
  fn find_block(&mut self, height: i64) -> Result<Option<BlockRecord>, StoreError>;
  fn insert_block(&mut self, block: &BlockRecord) -> Result<(), StoreError>;
  fn update_block(&mut self, block: &BlockRecord) -> Result<(), StoreError>;
  /// Time of the most recent block, found by `miner` when given, by anyone otherwise.
  fn latest_block_time(&mut self, miner: Option<&str>) -> Result<Option<NaiveDateTime>, StoreError>;
  /// Writes one miner's rows all together or not at all: samples not stored yet, live workers, and
  /// the payment row in place of the previous one.  Returns how many samples and live workers were
  /// new.
  fn store_miner_rows(&mut self, samples: &[NewWorkerSample], live_workers: &[NewLiveWorker],
                      payment: &NewPaymentRecord) -> Result<(usize, usize), StoreError>;
  fn payout_threshold(&mut self, pool_id: &str, address: &str) -> Result<Option<f64>, StoreError>;
  fn set_payout_threshold(&mut self, pool_id: &str, address: &str, threshold: f64) -> Result<(), StoreError>;
}

const CREATE_TABLES: &str = "
  CREATE TABLE IF NOT EXISTS stats (
    id SERIAL PRIMARY KEY,
    pool_id TEXT NOT NULL,
    fee DOUBLE PRECISION,
    paid DOUBLE PRECISION,
    blocks BIGINT,
    last_block_found TIMESTAMP,
    pool_hashrate DOUBLE PRECISION NOT NULL,
    network_hashrate DOUBLE PRECISION NOT NULL,
    network_difficulty DOUBLE PRECISION NOT NULL,
    block_height BIGINT,
    connected_miners BIGINT,
    shares_per_second DOUBLE PRECISION,
    minimum_payment DOUBLE PRECISION,
    payout_scheme TEXT,
    pool_effort DOUBLE PRECISION NOT NULL,
    pool_ttf DOUBLE PRECISION NOT NULL,
    insert_time_stamp TIMESTAMP NOT NULL
  );
  CREATE INDEX IF NOT EXISTS stats_insert_time_stamp ON stats (insert_time_stamp);
  CREATE TABLE IF NOT EXISTS block (
    block_height BIGINT PRIMARY KEY,
    pool_id TEXT NOT NULL,
    miner TEXT NOT NULL,
    miner_short TEXT NOT NULL,
    time_found TIMESTAMP NOT NULL,
    effort DOUBLE PRECISION NOT NULL,
    network_difficulty DOUBLE PRECISION NOT NULL,
    reward DOUBLE PRECISION NOT NULL,
    confirmation_progress DOUBLE PRECISION NOT NULL,
    status INTEGER NOT NULL,
    hash TEXT,
    info_link TEXT
  );
  CREATE INDEX IF NOT EXISTS block_miner_time_found ON block (miner, time_found);
  CREATE TABLE IF NOT EXISTS payment (
    id SERIAL PRIMARY KEY,
    pool_id TEXT NOT NULL,
    miner TEXT NOT NULL,
    pending_shares DOUBLE PRECISION NOT NULL,
    pending_balance DOUBLE PRECISION NOT NULL,
    total_paid DOUBLE PRECISION NOT NULL,
    today_paid DOUBLE PRECISION NOT NULL,
    last_payment TEXT NOT NULL,
    last_payment_link TEXT NOT NULL,
    payout_schema TEXT NOT NULL,
    price DOUBLE PRECISION NOT NULL,
    price_btc DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMP NOT NULL
  );
  CREATE INDEX IF NOT EXISTS payment_pool_miner ON payment (pool_id, miner);
  CREATE TABLE IF NOT EXISTS live_worker (
    id SERIAL PRIMARY KEY,
    miner TEXT NOT NULL,
    worker TEXT NOT NULL,
    hashrate DOUBLE PRECISION NOT NULL,
    shares_per_second DOUBLE PRECISION NOT NULL,
    effort DOUBLE PRECISION NOT NULL,
    ttf DOUBLE PRECISION NOT NULL,
    last_block_found TIMESTAMP,
    created TIMESTAMP NOT NULL,
    inserted_at TIMESTAMP NOT NULL
  );
  CREATE TABLE IF NOT EXISTS performance (
    id SERIAL PRIMARY KEY,
    miner TEXT NOT NULL,
    worker TEXT NOT NULL,
    hashrate DOUBLE PRECISION NOT NULL,
    shares_per_second DOUBLE PRECISION NOT NULL,
    effort DOUBLE PRECISION NOT NULL,
    ttf DOUBLE PRECISION NOT NULL,
    created TIMESTAMP NOT NULL,
    inserted_at TIMESTAMP NOT NULL,
    UNIQUE (miner, worker, created)
  );
";

pub struct DbAccess {
  conn_pool: Pool<ConnectionManager<PgConnection>>,
}

impl DbAccess {
  /// Connections are opened on first use, building the pool never blocks on the database.
  pub fn new(database_url: &str) -> DbAccess {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    DbAccess {
      conn_pool: Pool::builder().build_unchecked(manager),
    }
  }

  pub fn create_tables(&self) -> Result<(), StoreError> {
    let mut conn = self.conn_pool.get()?;
    conn.batch_execute(CREATE_TABLES)?;
    Ok(())
  }

  /// Checks out the connection a single job run uses for all of its statements.
  pub fn session(&self) -> Result<PgSession, StoreError> {
    Ok(PgSession {
      conn: self.conn_pool.get()?,
    })
  }
}

pub struct PgSession {
  conn: PooledConnection<ConnectionManager<PgConnection>>,
}

impl PoolStore for PgSession {
  fn insert_pool_snapshot(&mut self, snapshot: &NewPoolSnapshot) -> Result<(), StoreError> {
    diesel::insert_into(stats::table)
      .values(snapshot)
      .execute(&mut *self.conn)?;
    Ok(())
  }

  fn latest_pool_snapshot(&mut self) -> Result<Option<PoolSnapshot>, StoreError> {
    let snapshot = stats::table
      .order(stats::insert_time_stamp.desc())
      .first::<PoolSnapshot>(&mut *self.conn)
      .optional()?;
    Ok(snapshot)
  }

  fn find_block(&mut self, height: i64) -> Result<Option<BlockRecord>, StoreError> {
    let found = block::table
      .find(height)
      .first::<BlockRecord>(&mut *self.conn)
      .optional()?;
    Ok(found)
  }

  fn insert_block(&mut self, record: &BlockRecord) -> Result<(), StoreError> {
    diesel::insert_into(block::table)
      .values(record)
      .execute(&mut *self.conn)?;
    Ok(())
  }

  fn update_block(&mut self, record: &BlockRecord) -> Result<(), StoreError> {
    diesel::update(block::table.find(record.block_height))
      .set(record)
      .execute(&mut *self.conn)?;
    Ok(())
  }

  fn latest_block_time(&mut self, miner: Option<&str>) -> Result<Option<NaiveDateTime>, StoreError> {
    let latest = match miner {
      Some(miner) => block::table
        .filter(block::miner.eq(miner))
        .select(max(block::time_found))
        .first::<Option<NaiveDateTime>>(&mut *self.conn)?,
      None => block::table
        .select(max(block::time_found))
        .first::<Option<NaiveDateTime>>(&mut *self.conn)?,
    };
    Ok(latest)
  }

  fn store_miner_rows(&mut self, samples: &[NewWorkerSample], live_workers: &[NewLiveWorker],
                      payment: &NewPaymentRecord) -> Result<(usize, usize), StoreError> {
    let conn: &mut PgConnection = &mut self.conn;
    let inserted = conn.transaction::<_, diesel::result::Error, _>(|conn| {
      let new_samples = insert_performance(conn, samples)?;
      let new_live_workers = insert_live_workers(conn, live_workers)?;
      replace_payment(conn, payment)?;
      Ok((new_samples, new_live_workers))
    })?;
    Ok(inserted)
  }

  fn payout_threshold(&mut self, pool_id: &str, address: &str) -> Result<Option<f64>, StoreError> {
    // miner_settings belongs to the payment processor, its threshold column is NUMERIC.
    let rows: Vec<PayoutThreshold> = diesel::sql_query(
      "SELECT paymentthreshold::float8 AS paymentthreshold FROM miner_settings \
       WHERE poolid = $1 AND address = $2"
    )
      .bind::<Text, _>(pool_id)
      .bind::<Text, _>(address)
      .load(&mut *self.conn)?;
    Ok(rows.into_iter().next().map(|row| row.paymentthreshold))
  }

  fn set_payout_threshold(&mut self, pool_id: &str, address: &str, threshold: f64) -> Result<(), StoreError> {
    diesel::sql_query(
      "UPDATE miner_settings SET paymentthreshold = $1::float8, updated = now() \
       WHERE poolid = $2 AND address = $3"
    )
      .bind::<Double, _>(threshold)
      .bind::<Text, _>(pool_id)
      .bind::<Text, _>(address)
      .execute(&mut *self.conn)?;
    Ok(())
  }
}

fn insert_performance(conn: &mut PgConnection, samples: &[NewWorkerSample]) -> QueryResult<usize> {
  if samples.is_empty() {
    return Ok(0);
  }
  diesel::insert_into(performance::table)
    .values(samples)
    .on_conflict((performance::miner, performance::worker, performance::created))
    .do_nothing()
    .execute(conn)
}

fn insert_live_workers(conn: &mut PgConnection, workers: &[NewLiveWorker]) -> QueryResult<usize> {
  if workers.is_empty() {
    return Ok(0);
  }
  diesel::insert_into(live_worker::table)
    .values(workers)
    .execute(conn)
}

fn replace_payment(conn: &mut PgConnection, record: &NewPaymentRecord) -> QueryResult<()> {
  diesel::delete(payment::table
    .filter(payment::pool_id.eq(&record.pool_id))
    .filter(payment::miner.eq(&record.miner)))
    .execute(conn)?;
  diesel::insert_into(payment::table)
    .values(record)
    .execute(conn)?;
  Ok(())
}
