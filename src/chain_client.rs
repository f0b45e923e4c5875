//! Lookups against the chain node and token explorer, used to find the configuration tokens a
//! miner holds.

use std::sync::Arc;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use crate::config::Config;
use crate::remote_client::JsonSource;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeldToken {
  pub token_id: String,
  #[serde(default)]
  pub name: Option<String>,
}

/// The document a configuration token carries in its description.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TokenDescription {
  pub collection_id: Option<String>,
  #[serde(rename = "type")]
  pub token_type: Option<String>,
  pub address: Option<String>,
  #[serde(rename = "minimumPayout", deserialize_with = "number_or_string")]
  pub minimum_payout: Option<f64>,
  #[serde(rename = "tokenDistribution")]
  pub token_distribution: Option<Value>,
}

/// Minted configuration sometimes writes numbers as strings.
fn number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
  where D: Deserializer<'de> {
  let value = Option::<Value>::deserialize(deserializer)?;
  Ok(match value {
    Some(Value::Number(number)) => number.as_f64(),
    Some(Value::String(text)) => text.trim().parse().ok(),
    _ => None,
  })
}

pub trait TokenLookup: Send + Sync {
  /// Tokens named `name` in the confirmed balance of `address`.  `None` when the balance could not be
  /// fetched.
  fn find_tokens_by_name(&self, address: &str, name: &str) -> Option<Vec<HeldToken>>;
  fn token_description(&self, token_id: &str) -> Option<TokenDescription>;
}

pub struct ChainClient {
  source: Arc<dyn JsonSource>,
  node_url: String,
  token_api_url: String,
}

impl ChainClient {
  pub fn new(source: Arc<dyn JsonSource>, config: &Config) -> ChainClient {
    ChainClient {
      source,
      node_url: config.node_url.trim_end_matches('/').to_owned(),
      token_api_url: config.token_api_url.trim_end_matches('/').to_owned(),
    }
  }

  pub fn balance_url(&self) -> String {
    format!("{}/blockchain/balance", self.node_url)
  }

  pub fn token_url(&self, token_id: &str) -> String {
    format!("{}/{}", self.token_api_url, token_id)
  }
}

impl TokenLookup for ChainClient {
  fn find_tokens_by_name(&self, address: &str, name: &str) -> Option<Vec<HeldToken>> {
    let balance = self.source.post_json(&self.balance_url(), &json!({"addresses": [address]}))?;
    let tokens = match balance.pointer("/confirmed/tokens") {
      Some(Value::Array(tokens)) => tokens,
      _ => {
        warn!("Balance of {} has no confirmed tokens list", address);
        return Some(vec![]);
      },
    };
    Some(tokens.iter()
      .filter_map(|token| serde_json::from_value::<HeldToken>(token.clone()).ok())
      .filter(|token| token.name.as_deref() == Some(name))
      .collect())
  }

  fn token_description(&self, token_id: &str) -> Option<TokenDescription> {
    let token = self.source.fetch_json(&self.token_url(token_id))?;
    let description = match token.get("description") {
      Some(Value::String(description)) => description,
      _ => {
        debug!("Token {} has no description", token_id);
        return None;
      },
    };
    match serde_json::from_str::<TokenDescription>(description) {
      Ok(parsed) => Some(parsed),
      Err(err) => {
        debug!("Description of token {} is not a configuration document: {}", token_id, err);
        None
      },
    }
  }
}
