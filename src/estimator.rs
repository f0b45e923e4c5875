//! Effort and time-to-find estimates for a Poisson block discovery process.
//!
//! Inputs use the canonical units the store keeps: difficulty in peta, network hashrate in TH/s and
//! the miner (or pool) hashrate in MH/s.  Everything is scaled to raw hashes before use.

use chrono::{DateTime, Utc};
use crate::normalize::parse_timestamp;

pub const DIFFICULTY_SCALE: f64 = 1e15;
pub const NETWORK_HASHRATE_SCALE: f64 = 1e12;
pub const HASHRATE_SCALE: f64 = 1e6;

const SECONDS_PER_DAY: f64 = 3600.0 * 24.0;

/// Decimal places used by the public estimators.
pub const DEFAULT_PRECISION: i32 = 2;

pub fn round_places(value: f64, places: i32) -> f64 {
  if !value.is_finite() {
    return value;
  }
  let factor = 10f64.powi(places);
  (value * factor).round() / factor
}

/// Effort in percent, unrounded.  Zero for any input that would otherwise divide by zero, and
/// elapsed time is clamped so a baseline in the future never produces negative effort.
pub fn mining_effort_at(network_difficulty: f64, network_hashrate: f64, hashrate: f64,
                        last_block_time: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
  let difficulty = network_difficulty * DIFFICULTY_SCALE;
  let network_hashrate = network_hashrate * NETWORK_HASHRATE_SCALE;
  let hashrate = hashrate * HASHRATE_SCALE;
  if !(difficulty > 0.0) || !(network_hashrate > 0.0) || !(hashrate > 0.0) {
    return 0.0;
  }
  let elapsed_millis = now.signed_duration_since(last_block_time).num_milliseconds().max(0);
  let elapsed_secs = elapsed_millis as f64 / 1000.0;
  let total_network_hashes = network_hashrate * elapsed_secs;
  let share_of_hashes = (hashrate / network_hashrate) * total_network_hashes;
  share_of_hashes / difficulty * 100.0
}

pub fn calculate_mining_effort_at(network_difficulty: f64, network_hashrate: f64, hashrate: f64,
                                  last_block_timestamp: &str, now: DateTime<Utc>) -> f64 {
  match parse_timestamp(last_block_timestamp) {
    Some(last_block_time) => round_places(
      mining_effort_at(network_difficulty, network_hashrate, hashrate, last_block_time, now),
      DEFAULT_PRECISION,
    ),
    None => {
      debug!("Unparseable last block timestamp {:?}, effort defaults to 0", last_block_timestamp);
      0.0
    },
  }
}

pub fn calculate_mining_effort(network_difficulty: f64, network_hashrate: f64, hashrate: f64,
                               last_block_timestamp: &str) -> f64 {
  calculate_mining_effort_at(network_difficulty, network_hashrate, hashrate, last_block_timestamp,
                             Utc::now())
}

/// Expected days to find a block, unrounded.  `f64::INFINITY` when the hashrate is zero.
pub fn time_to_find_block(network_difficulty: f64, _network_hashrate: f64, hashrate: f64) -> f64 {
  let difficulty = network_difficulty * DIFFICULTY_SCALE;
  let hashrate = hashrate * HASHRATE_SCALE;
  if !(hashrate > 0.0) {
    return f64::INFINITY;
  }
  difficulty / hashrate / SECONDS_PER_DAY
}

pub fn calculate_time_to_find_block(network_difficulty: f64, network_hashrate: f64, hashrate: f64) -> f64 {
  round_places(time_to_find_block(network_difficulty, network_hashrate, hashrate), DEFAULT_PRECISION)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{Duration, TimeZone};

  fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
  }

  #[test]
  fn test_pool_scenario() {
    // 63 P difficulty, 500 TH/s network, 50 GH/s pool (50_000 MH/s), last block two hours ago.
    let last_block = now() - Duration::hours(2);
    let effort = mining_effort_at(63.0, 500.0, 50_000.0, last_block, now());
    let expected = 5e10 * 7200.0 / 6.3e16 * 100.0;
    assert!((effort - expected).abs() < 1e-9);
    assert!((round_places(effort, 3) - 0.571).abs() < 1e-12);

    let ttf = calculate_time_to_find_block(63.0, 500.0, 50_000.0);
    assert_eq!(ttf, 14.58);
  }

  #[test]
  fn test_effort_from_timestamp_strings() {
    let effort = calculate_mining_effort_at(63.0, 500.0, 50_000.0, "2024-06-01 10:00:00", now());
    assert_eq!(effort, 0.57);
    let effort = calculate_mining_effort_at(63.0, 500.0, 50_000.0, "2024-06-01T10:00:00.000000Z", now());
    assert_eq!(effort, 0.57);
  }

  #[test]
  fn test_effort_scales_linearly_with_hashrate() {
    let last_block = now() - Duration::minutes(37);
    let base = mining_effort_at(40.0, 300.0, 1_000.0, last_block, now());
    for multiple in &[2.0, 3.5, 10.0] {
      let scaled = mining_effort_at(40.0, 300.0, 1_000.0 * multiple, last_block, now());
      assert!((scaled - base * multiple).abs() < 1e-9 * scaled.max(1.0));
    }
    assert!(base > 0.0);
  }

  #[test]
  fn test_effort_is_never_negative() {
    let future_block = now() + Duration::hours(1);
    assert_eq!(mining_effort_at(63.0, 500.0, 50_000.0, future_block, now()), 0.0);
  }

  #[test]
  fn test_effort_sentinels() {
    assert_eq!(calculate_mining_effort_at(63.0, 500.0, 100.0, "not a time", now()), 0.0);
    assert_eq!(calculate_mining_effort_at(63.0, 500.0, 100.0, "", now()), 0.0);
    assert_eq!(calculate_mining_effort_at(63.0, 0.0, 100.0, "2024-06-01 10:00:00", now()), 0.0);
    assert_eq!(calculate_mining_effort_at(0.0, 500.0, 100.0, "2024-06-01 10:00:00", now()), 0.0);
  }

  #[test]
  fn test_ttf_decreases_with_hashrate() {
    let mut previous = calculate_time_to_find_block(63.0, 500.0, 0.0);
    assert!(previous.is_infinite());
    for hashrate in &[1_000.0, 10_000.0, 50_000.0, 500_000.0] {
      let ttf = time_to_find_block(63.0, 500.0, *hashrate);
      assert!(ttf < previous);
      previous = ttf;
    }
  }
}
