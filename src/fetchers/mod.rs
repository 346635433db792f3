//! Upstream adapters. Each fetcher is a thin async wrapper around a pure
//! parse/normalize function from response body to records; retries and skips
//! are local, and a fetcher that cannot produce a row for a key emits
//! nothing. The pipeline composes around missing data downstream.

pub mod lineups;
pub mod odds;
pub mod pitch_events;
pub mod rosters;
pub mod schedule;
pub mod umpires;
pub mod weather;

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use serde::de::DeserializeOwned;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY_MS: u64 = 500;

/// Shared HTTP client with the per-call timeout applied at construction.
#[derive(Clone)]
pub struct Http {
    client: reqwest::Client,
}

impl Http {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self { client })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {url} failed: HTTP {status}: {body}");
        }
        Ok(resp.json().await?)
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("GET {url} failed: HTTP {status}");
        }
        Ok(resp.text().await?)
    }
}

/// Bounded retry with exponential backoff and jitter. After exhaustion the
/// error is returned for the caller to absorb into a risk flag.
pub async fn with_retry<T, F, Fut>(op: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut last_err = None;
    for attempt in 1..=RETRY_ATTEMPTS {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt < RETRY_ATTEMPTS {
                    let jitter = rand::thread_rng().gen_range(0..250);
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        op, attempt, RETRY_ATTEMPTS, e, delay
                    );
                    tokio::time::sleep(delay + Duration::from_millis(jitter)).await;
                    delay *= 2;
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("retry loop ran at least once"))
}
