use std::sync::OnceLock;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use regex::Regex;

pub const STORAGE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_FORMATS: &[&str] = &[
  "%Y-%m-%dT%H:%M:%S%.fZ",
  "%Y-%m-%dT%H:%M:%SZ",
  "%Y-%m-%dT%H:%M:%S%.f",
  "%Y-%m-%d %H:%M:%S%.f",
];

/// Parses the timestamp shapes the upstream APIs emit.  Anything without an offset is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(time) = DateTime::parse_from_rfc3339(raw) {
    return Some(time.with_timezone(&Utc));
  }
  if let Ok(time) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z") {
    return Some(time.with_timezone(&Utc));
  }
  NAIVE_FORMATS.iter()
    .filter_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
    .next()
    .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
  parse_timestamp(raw).map(|time| time.naive_utc())
}

/// Reformats an upstream timestamp into the canonical `%Y-%m-%d %H:%M:%S` text form.
pub fn format_timestamp(raw: &str) -> Option<String> {
  parse_timestamp(raw).map(|time| time.format(STORAGE_FORMAT).to_string())
}

/// Drops sub-second precision, so stored times compare equal across observations.
pub fn truncate_seconds(time: NaiveDateTime) -> NaiveDateTime {
  time.with_nanosecond(0).unwrap_or(time)
}

/// Base58 without the ambiguous characters, at least as long as a P2PK address.
const ADDRESS_PATTERN: &str = r"^[1-9A-HJ-NP-Za-km-z]{40,}$";

pub fn is_valid_address(address: &str) -> bool {
  static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
  PATTERN.get_or_init(|| Regex::new(ADDRESS_PATTERN).ok())
    .as_ref()
    .map_or(true, |pattern| pattern.is_match(address))
}

/// Display copy of an address, never used as a key.
pub fn abbreviate_address(address: &str) -> String {
  let chars: Vec<char> = address.chars().collect();
  if chars.len() <= 10 {
    return address.to_owned();
  }
  let head: String = chars[..5].iter().collect();
  let tail: String = chars[chars.len() - 5..].iter().collect();
  format!("{}...{}", head, tail)
}

pub fn to_percent(fraction: f64) -> f64 {
  fraction * 100.0
}

pub fn to_mega(raw: f64) -> f64 {
  raw / 1e6
}

pub fn to_giga(raw: f64) -> f64 {
  raw / 1e9
}

pub fn to_tera(raw: f64) -> f64 {
  raw / 1e12
}

pub fn to_peta(raw: f64) -> f64 {
  raw / 1e15
}

/// GH/s to the MH/s the estimator takes for a miner or pool hashrate.
pub fn giga_to_mega(giga: f64) -> f64 {
  giga * 1e3
}
