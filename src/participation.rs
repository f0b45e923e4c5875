use std::collections::HashMap;
use serde_json::Value;

/// Field names a share count may arrive under.  `shares` is what the current stats API emits,
/// older payloads used `sharecount`.
const SHARE_FIELDS: &[&str] = &["shares", "sharecount"];

#[derive(Clone, Debug, PartialEq)]
pub struct ShareRecord {
  pub miner: String,
  pub shares: f64,
}

impl ShareRecord {
  pub fn from_value(value: &Value) -> Option<ShareRecord> {
    let miner = match value.get("miner").and_then(Value::as_str) {
      Some(miner) if !miner.is_empty() => miner.to_owned(),
      _ => return None,
    };
    let shares = SHARE_FIELDS.iter()
      .filter_map(|field| value.get(*field))
      .next()?
      .as_f64()?;
    if !shares.is_finite() || shares < 0.0 {
      return None;
    }
    Some(ShareRecord { miner, shares })
  }
}

/// Splits the current round between miners by their share of submitted work.
///
/// `pool_data` and `n_factor` are reserved for weighting the PPLNS window and do not affect the
/// ratio yet.
pub fn calculate_pplns_participation(shares_data: &[Value], _pool_data: &Value, _n_factor: f64)
                                     -> (HashMap<String, f64>, f64) {
  let mut miner_shares: HashMap<String, f64> = HashMap::new();
  for entry in shares_data {
    match ShareRecord::from_value(entry) {
      Some(record) => *miner_shares.entry(record.miner).or_insert(0.0) += record.shares,
      None => warn!("Skipping invalid share entry: {}", entry),
    }
  }
  let total_shares: f64 = miner_shares.values().sum();
  if total_shares <= 0.0 {
    return (HashMap::new(), 0.0);
  }
  let participation = miner_shares.into_iter()
    .map(|(miner, shares)| (miner, shares / total_shares))
    .collect();
  (participation, total_shares)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_fractions_sum_to_one() {
    let shares = vec![
      json!({"miner": "9fAAA", "shares": 150000.0, "last_share": "2024-06-01T10:00:00Z"}),
      json!({"miner": "9fBBB", "shares": 50000}),
      json!({"miner": "9fCCC", "sharecount": 25000}),
    ];
    let (participation, total) = calculate_pplns_participation(&shares, &json!({}), 0.5);
    assert_eq!(total, 225000.0);
    assert_eq!(participation.len(), 3);
    let sum: f64 = participation.values().sum();
    assert!((sum - 1.0).abs() < 1e-12);
    assert!((participation["9fAAA"] - 150000.0 / 225000.0).abs() < 1e-12);
    assert!((participation["9fCCC"] - 25000.0 / 225000.0).abs() < 1e-12);
  }

  #[test]
  fn test_invalid_entries_are_skipped() {
    let shares = vec![
      json!({"miner": "9fAAA", "shares": 10}),
      json!({"miner": "9fBBB", "shares": "lots"}),
      json!({"shares": 40}),
      json!({"miner": "9fCCC"}),
      json!({"miner": "9fDDD", "shares": -5}),
      json!("garbage"),
    ];
    let (participation, total) = calculate_pplns_participation(&shares, &Value::Null, 1.0);
    assert_eq!(total, 10.0);
    assert_eq!(participation.len(), 1);
    assert_eq!(participation["9fAAA"], 1.0);
  }

  #[test]
  fn test_duplicate_miners_are_merged() {
    let shares = vec![
      json!({"miner": "9fAAA", "shares": 10}),
      json!({"miner": "9fAAA", "sharecount": 30}),
      json!({"miner": "9fBBB", "shares": 60}),
    ];
    let (participation, total) = calculate_pplns_participation(&shares, &Value::Null, 1.0);
    assert_eq!(total, 100.0);
    assert_eq!(participation.len(), 2);
    assert!((participation["9fAAA"] - 0.4).abs() < 1e-12);
  }

  #[test]
  fn test_empty_and_zero_input() {
    let (participation, total) = calculate_pplns_participation(&[], &Value::Null, 1.0);
    assert!(participation.is_empty());
    assert_eq!(total, 0.0);

    let shares = vec![json!({"miner": "9fAAA", "shares": 0}), json!({"bad": true})];
    let (participation, total) = calculate_pplns_participation(&shares, &Value::Null, 1.0);
    assert!(participation.is_empty());
    assert_eq!(total, 0.0);
  }
}
