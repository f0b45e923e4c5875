use std::thread;
use std::time::Duration;
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::Value;
use crate::config::Config;
use crate::error::FetchError;

/// Anything that can hand out JSON documents by URL.  Implemented over HTTP by `RemoteDataClient`
/// and by canned responses in tests.
pub trait JsonSource: Send + Sync {
  fn fetch_json(&self, url: &str) -> Option<Value>;
  fn post_json(&self, url: &str, body: &Value) -> Option<Value>;
}

#[derive(Clone, Debug)]
pub struct RetryPolicy {
  pub attempts: u32,
  pub base_delay: Duration,
}

impl RetryPolicy {
  /// Delay after the given (1-based) failed attempt: the base delay times the attempt index.
  pub fn delay_after(&self, attempt: u32) -> Duration {
    self.base_delay * attempt
  }

  pub fn run<T, F>(&self, what: &str, mut attempt_fn: F) -> Option<T>
    where F: FnMut() -> Result<T, FetchError> {
    for attempt in 1..=self.attempts {
      match attempt_fn() {
        Ok(value) => return Some(value),
        Err(err) => {
          warn!("Request for {} failed (attempt {}/{}): {}", what, attempt, self.attempts, err);
          if attempt < self.attempts {
            thread::sleep(self.delay_after(attempt));
          }
        },
      }
    }
    error!("Giving up on {} after {} attempts", what, self.attempts);
    None
  }
}

pub struct RemoteDataClient {
  client: Client,
  retry: RetryPolicy,
}

impl RemoteDataClient {
  pub fn new(config: &Config) -> Result<RemoteDataClient, FetchError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .build()?;
    Ok(RemoteDataClient {
      client,
      retry: RetryPolicy {
        attempts: config.retry_attempts,
        base_delay: config.retry_base(),
      },
    })
  }

  fn read_json(&self, res: reqwest::blocking::Response) -> Result<Value, FetchError> {
    if res.status() != StatusCode::OK {
      return Err(FetchError::Status(res.status().as_u16()));
    }
    let text = res.text()?;
    Ok(serde_json::from_str(&text)?)
  }
}

impl JsonSource for RemoteDataClient {
  fn fetch_json(&self, url: &str) -> Option<Value> {
    self.retry.run(url, || {
      let res = self.client.get(url).send()?;
      self.read_json(res)
    })
  }

  fn post_json(&self, url: &str, body: &Value) -> Option<Value> {
    self.retry.run(url, || {
      let res = self.client.post(url)
        .header("accept", "application/json")
        .json(body)
        .send()?;
      self.read_json(res)
    })
  }
}


#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> RetryPolicy {
    RetryPolicy { attempts: 3, base_delay: Duration::from_millis(0) }
  }

  #[test]
  fn test_backoff_grows_with_attempt() {
    let policy = RetryPolicy { attempts: 3, base_delay: Duration::from_secs(1) };
    assert_eq!(policy.delay_after(1), Duration::from_secs(1));
    assert_eq!(policy.delay_after(2), Duration::from_secs(2));
  }

  #[test]
  fn test_retries_until_success() {
    let mut calls = 0;
    let result = policy().run("test", || {
      calls += 1;
      if calls < 3 { Err(FetchError::Status(503)) } else { Ok(calls) }
    });
    assert_eq!(result, Some(3));
    assert_eq!(calls, 3);
  }

  #[test]
  fn test_gives_up_after_attempts() {
    let mut calls = 0;
    let result: Option<()> = policy().run("test", || {
      calls += 1;
      Err(FetchError::Status(500))
    });
    assert!(result.is_none());
    assert_eq!(calls, 3);
  }

  #[test]
  fn test_unreachable_host_is_absent() {
    let mut config = crate::config::test_config();
    config.retry_attempts = 2;
    let client = RemoteDataClient::new(&config).unwrap();
    assert!(client.fetch_json("http://127.0.0.1:1/pool").is_none());
  }
}
