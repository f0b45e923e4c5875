use std::sync::Arc;
use crate::remote_client::JsonSource;

pub const DEFAULT_PRICE_API: &str = "https://api.coingecko.com/api/v3";

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Prices {
  pub btc_usd: f64,
  pub erg_usd: f64,
}

impl Prices {
  /// ERG priced in BTC, 0 when either quote is missing.
  pub fn erg_btc(&self) -> f64 {
    if self.btc_usd > 0.0 { self.erg_usd / self.btc_usd } else { 0.0 }
  }
}

pub struct PriceReader {
  source: Arc<dyn JsonSource>,
  url: String,
}

impl PriceReader {
  pub fn new(source: Arc<dyn JsonSource>, base_url: Option<&str>) -> PriceReader {
    let base_url = base_url.unwrap_or(DEFAULT_PRICE_API).trim_end_matches('/');
    PriceReader {
      source,
      url: format!("{}/simple/price?ids=bitcoin,ergo&vs_currencies=usd", base_url),
    }
  }

  /// Current quotes, `None` when the API is unreachable or leaves one out.
  pub fn get(&self) -> Option<Prices> {
    let prices = self.source.fetch_json(&self.url)?;
    let usd = |coin: &str| prices.get(coin).and_then(|p| p.get("usd")).and_then(|p| p.as_f64());
    match (usd("bitcoin"), usd("ergo")) {
      (Some(btc_usd), Some(erg_usd)) => Some(Prices { btc_usd, erg_usd }),
      _ => {
        warn!("Price response missing a quote: {}", prices);
        None
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::remote_client::fake::FakeSource;

  const URL: &str = "http://prices/simple/price?ids=bitcoin,ergo&vs_currencies=usd";

  #[test]
  fn test_reads_quotes() {
    let source = Arc::new(FakeSource::new().with(URL, json!({
      "bitcoin": {"usd": 67000.5},
      "ergo": {"usd": 1.25},
    })));
    let reader = PriceReader::new(source, Some("http://prices/"));
    assert_eq!(reader.get(), Some(Prices { btc_usd: 67000.5, erg_usd: 1.25 }));
  }

  #[test]
  fn test_erg_btc() {
    let prices = Prices { btc_usd: 50000.0, erg_usd: 1.25 };
    assert!((prices.erg_btc() - 0.000025).abs() < 1e-15);
    assert_eq!(Prices::default().erg_btc(), 0.0);
  }

  #[test]
  fn test_missing_quote_is_unavailable() {
    let source = Arc::new(FakeSource::new().with(URL, json!({"bitcoin": {"usd": 67000.5}})));
    let reader = PriceReader::new(source, Some("http://prices"));
    assert!(reader.get().is_none());
    assert_eq!(reader.get().unwrap_or_default().erg_usd, 0.0);
  }
}
