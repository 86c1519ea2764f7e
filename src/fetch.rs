//! Resilient HTTP fetching against the rate-limited upstream API.
//!
//! Retry strategy:
//! - HTTP 200 → return the body
//! - HTTP 404 → the endpoint has no data; skip without retrying
//! - any other status or a network error → retry with exponential backoff
//!
//! Failure is never an error for the caller: [`Fetcher::fetch`] returns
//! `None` and the unit is skipped for this run. The next run's ledger diff
//! picks it up again.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, error, warn};

use crate::config::{ApiConfig, RetryConfig};

/// Status and body of a GET request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Minimal HTTP capability used by the fetcher.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by `reqwest`.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new(api: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_secs))
            .user_agent(api.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<HttpResponse> {
        let mut req = self.client.get(url);
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;
        Ok(HttpResponse { status, body })
    }
}

/// Backoff parameters.
///
/// The wait after failed attempt `n` (0-based) is
/// `min(base_delay * 4^n + U(0, jitter), max_delay)`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter(),
        }
    }

    /// Backoff for `attempt` with an explicit jitter value.
    pub fn backoff(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponential = 4u32
            .checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(self.max_delay);
        exponential
            .checked_add(jitter)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff for `attempt` with random jitter in `[0, jitter]`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        };
        self.backoff(attempt, jitter)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// GETs URLs with retry and backoff, never failing the batch.
pub struct Fetcher {
    client: Arc<dyn HttpClient>,
    policy: RetryPolicy,
}

impl Fetcher {
    pub fn new(client: Arc<dyn HttpClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch `url`, returning the body on HTTP 200 and `None` otherwise.
    ///
    /// At most `max_retries` requests are made. 404 returns immediately.
    pub async fn fetch(&self, url: &str, headers: &[(String, String)]) -> Option<String> {
        let max = self.policy.max_retries;

        for attempt in 0..max {
            match self.client.get(url, headers).await {
                Ok(resp) if resp.status == 200 => {
                    debug!(url, status = resp.status, attempt = attempt + 1, "fetched");
                    return Some(resp.body);
                }
                Ok(resp) if resp.status == 404 => {
                    warn!(url, status = resp.status, "endpoint has no data, skipping");
                    return None;
                }
                Ok(resp) => {
                    warn!(
                        url,
                        status = resp.status,
                        attempt = attempt + 1,
                        max_retries = max,
                        "upstream request failed"
                    );
                }
                Err(e) => {
                    warn!(
                        url,
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = max,
                        "upstream request errored"
                    );
                }
            }

            if attempt + 1 < max {
                let delay = self.policy.delay_for(attempt);
                warn!(url, wait_ms = delay.as_millis() as u64, "backing off before retry");
                tokio::time::sleep(delay).await;
            }
        }

        error!(url, attempts = max, "max retries reached, request failed");
        None
    }
}
