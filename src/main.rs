#[macro_use]
extern crate log;
extern crate fern;
extern crate chrono;
extern crate toml;
#[macro_use]
extern crate serde_derive;
extern crate serde;
#[macro_use]
extern crate serde_json;
extern crate clap;
extern crate thiserror;
extern crate lru_time_cache;
extern crate reqwest;
extern crate redis;
extern crate schedule_recv;
extern crate signal_hook;
extern crate regex;
#[macro_use]
extern crate diesel;
extern crate dotenv;
extern crate r2d2;

mod app;
mod cache;
mod chain_client;
mod config;
mod db;
mod error;
mod estimator;
mod normalize;
mod participation;
mod pool_api;
mod price;
mod reconciler;
mod remote_client;
mod schedule;
mod synchronizer;

use std::fmt::Debug;
use std::process;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use chrono::Utc;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap::error::ErrorKind;
use serde_json::Value;
use signal_hook::consts::{SIGINT, SIGTERM};
use app::App;
use cache::{CacheLayer, Resource};
use config::Config;
use error::{JobError, StartupError};

#[derive(Parser)]
#[command(name = "poolwatch", version, about = "Mining pool statistics sync and payout threshold jobs")]
struct Cli {
  #[arg(long, default_value = "config.toml")]
  config: String,
  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the tables the sync jobs write to
  InitDb,
  /// Run the synchronization passes once
  Sync {
    #[arg(long, value_enum)]
    pass: Option<Pass>,
  },
  /// Reconcile payout thresholds with the configuration tokens miners hold
  Reconcile {
    /// Run a single cycle instead of one every `update_interval_hours`
    #[arg(long)]
    once: bool,
  },
  /// Print a cached stats resource as JSON
  Show {
    #[arg(value_parser = parse_resource)]
    resource: Resource,
    /// Miner address, required by the `miner-*` resources
    #[arg(long)]
    address: Option<String>,
  },
  /// Print each miner's share of the current round
  Participation {
    #[arg(long, default_value_t = 1.0)]
    n_factor: f64,
  },
  /// Estimate effort and time to find a block without touching any service
  Estimate {
    /// Network difficulty in peta
    #[arg(long)]
    difficulty: f64,
    /// Network hashrate in TH/s
    #[arg(long)]
    network_hashrate: f64,
    /// Miner or pool hashrate in MH/s
    #[arg(long)]
    hashrate: f64,
    /// Time the last block was found
    #[arg(long)]
    last_block: String,
  },
}

#[derive(Clone, Copy, ValueEnum)]
enum Pass {
  Pool, Blocks, Miners
}

fn parse_resource(name: &str) -> Result<Resource, String> {
  Resource::from_name(name).ok_or_else(|| {
    let names: Vec<&str> = Resource::ALL.iter().map(|resource| resource.name()).collect();
    format!("expected one of {}", names.join(", "))
  })
}

fn setup_logging(config: &Config) -> Result<(), StartupError> {
  let level: log::LevelFilter = config.log_level.parse()
    .map_err(|_| StartupError::Logger(format!("invalid log level {:?}", config.log_level)))?;
  let log_file = fern::log_file(&config.log_file)
    .map_err(|err| StartupError::Logger(format!("{}: {}", config.log_file, err)))?;
  fern::Dispatch::new()
    .format(|out, message, record| {
      out.finish(format_args!(
        "{}[{}][{}] {}",
        chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
        record.target(),
        record.level(),
        message
      ))
    })
    .level(level)
    .chain(std::io::stdout())
    .chain(log_file)
    .apply()
    .map_err(|err| StartupError::Logger(err.to_string()))
}

/// Raises the returned flag on SIGINT or SIGTERM.  Jobs finish their current unit of work and stop.
fn register_shutdown() -> Result<Arc<AtomicBool>, StartupError> {
  let shutdown = Arc::new(AtomicBool::new(false));
  for signal in &[SIGINT, SIGTERM] {
    signal_hook::flag::register(*signal, shutdown.clone()).map_err(StartupError::Signal)?;
  }
  Ok(shutdown)
}

fn log_outcome<T: Debug>(what: &str, result: Result<T, JobError>) {
  match result {
    Ok(report) => info!("{} finished: {:?}", what, report),
    Err(err) => error!("{} failed: {}", what, err),
  }
}

fn render(cache: &CacheLayer, resource: Resource, address: &str) -> Value {
  match resource {
    Resource::TotalHashStats => json!(cache.total_hash_stats()),
    Resource::PaymentStats => json!(cache.payment_stats()),
    Resource::PoolStats => cache.pool_stats().unwrap_or(Value::Null),
    Resource::BlockStats => Value::Array(cache.block_stats()),
    Resource::LiveMinerData => cache.live_miner_data(),
    Resource::Shares => Value::Array(cache.shares().iter()
      .map(|share| json!({"miner": share.miner, "shares": share.shares}))
      .collect()),
    Resource::MinerStats => cache.miner_stats(address),
    Resource::MinerBlocks => Value::Array(cache.miner_blocks(address)),
    Resource::MinerPayments => Value::Array(cache.miner_payments(address)),
    Resource::MinerWorkers => cache.miner_workers(address),
  }
}

fn print_json(value: &Value) {
  match serde_json::to_string_pretty(value) {
    Ok(text) => println!("{}", text),
    Err(_) => println!("{}", value),
  }
}

fn run(cli: Cli) -> Result<(), StartupError> {
  if let Command::Show { resource, address: None } = &cli.command {
    if resource.per_miner() {
      Cli::command()
        .error(ErrorKind::MissingRequiredArgument, format!("{} needs --address", resource.name()))
        .exit();
    }
  }
  if let Command::Estimate { difficulty, network_hashrate, hashrate, last_block } = &cli.command {
    print_json(&json!({
      "effort": estimator::calculate_mining_effort(*difficulty, *network_hashrate, *hashrate, last_block),
      "ttf": estimator::calculate_time_to_find_block(*difficulty, *network_hashrate, *hashrate),
    }));
    return Ok(());
  }
  let config = config::read_config(&cli.config)?;
  setup_logging(&config)?;
  let shutdown = register_shutdown()?;
  let app = App::new(config, shutdown)?;

  match cli.command {
    Command::InitDb => {
      app.db()?.create_tables()?;
      info!("Tables are ready");
    },
    Command::Sync { pass } => {
      let mut store = app.db()?.session()?;
      let now = Utc::now();
      match pass {
        None => app.synchronizer.run_all(&mut store, now),
        Some(Pass::Pool) => log_outcome("Pool stats pass", app.synchronizer.sync_pool_stats(&mut store, now)),
        Some(Pass::Blocks) => log_outcome("Block pass", app.synchronizer.sync_blocks(&mut store)),
        Some(Pass::Miners) => log_outcome("Miner pass", app.synchronizer.sync_miners(&mut store, now)),
      }
    },
    Command::Reconcile { once: true } => {
      let mut store = app.db()?.session()?;
      log_outcome("Threshold reconciliation", app.reconciler.run_cycle(&mut store));
    },
    Command::Reconcile { once: false } => {
      let db = app.db()?;
      info!("Reconciling payout thresholds every {} hours", app.config.update_interval_hours);
      app.reconciler.run_forever(app.config.update_interval(), schedule::TICK_MS, || db.session());
    },
    Command::Show { resource, address } => {
      print_json(&render(&app.cache, resource, address.as_deref().unwrap_or_default()));
    },
    Command::Participation { n_factor } => {
      let (participation, total_shares) = app.cache.participation(n_factor);
      print_json(&json!({
        "participation": participation,
        "total_shares": total_shares,
      }));
    },
    Command::Estimate { .. } => {},
  }
  Ok(())
}

fn main() {
  let cli = Cli::parse();
  if let Err(err) = run(cli) {
    eprintln!("poolwatch: {}", err);
    process::exit(1);
  }
}
