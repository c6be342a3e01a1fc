//! HTTP transport shared by every API client.
//!
//! Retries happen here and only here: idempotent-looking failures (throttling,
//! gateway errors, dropped connections) are retried with exponential backoff,
//! everything else is handed back to the caller untouched.

use crate::config::settings::RetryConfig;
use crate::utils::error::Result;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_factor: Duration,
    pub max_backoff: Duration,
    pub status_forcelist: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_factor: Duration::from_secs_f64(config.backoff_factor_secs.max(0.0)),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            status_forcelist: config.status_forcelist.clone(),
        }
    }
}

impl RetryPolicy {
    /// No retries at all; handy for tests that assert exact hit counts.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_backoff_factor(mut self, factor: Duration) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn should_retry_status(&self, status: StatusCode) -> bool {
        self.status_forcelist.contains(&status.as_u16())
    }

    /// Delay before retry number `retry` (1-based). The first retry is
    /// immediate; after that the delay doubles from `2 * factor`.
    pub fn backoff_for(&self, retry: u32) -> Duration {
        if retry <= 1 {
            return Duration::ZERO;
        }
        let multiplier = 2u32.saturating_pow(retry - 1);
        self.backoff_factor
            .saturating_mul(multiplier)
            .min(self.max_backoff)
    }

    fn retry_after(&self, response: &Response) -> Option<Duration> {
        if !matches!(
            response.status(),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE
        ) {
            return None;
        }
        let seconds: u64 = response
            .headers()
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse()
            .ok()?;
        Some(Duration::from_secs(seconds).min(self.max_backoff))
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout() || error.is_request()
}

/// A `reqwest::Client` paired with a retry policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("claims-etl/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, policy })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sends the request, retrying per policy. After the last attempt the
    /// final response is returned whatever its status, so callers decide how
    /// to treat it.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut retry = 0u32;
        loop {
            let attempt = match request.try_clone() {
                Some(attempt) => attempt,
                // Streaming bodies cannot be replayed.
                None => return Ok(request.send().await?),
            };

            match attempt.send().await {
                Ok(response)
                    if retry < self.policy.max_retries
                        && self.policy.should_retry_status(response.status()) =>
                {
                    retry += 1;
                    let delay = self
                        .policy
                        .retry_after(&response)
                        .unwrap_or_else(|| self.policy.backoff_for(retry));
                    tracing::warn!(
                        "HTTP {} from {}; retry {}/{} in {:?}",
                        response.status(),
                        response.url(),
                        retry,
                        self.policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => return Ok(response),
                Err(e) if retry < self.policy.max_retries && is_transient(&e) => {
                    retry += 1;
                    let delay = self.policy.backoff_for(retry);
                    tracing::warn!(
                        "Request failed ({}); retry {}/{} in {:?}",
                        e,
                        retry,
                        self.policy.max_retries,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
