//! HTTP transport to the ingest service.
//!
//! One persistent client with explicit deadlines on every call. Retry
//! discipline lives here, not in the aggregator: transient statuses
//! (429, 500, 502, 503, 504) and connection-level failures retry with
//! exponential backoff up to the configured budget; validation rejections
//! are final and the offending event is dropped.

use crate::config::AgentConfig;
use reqwest::StatusCode;
use sentinel_core::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// Statuses the agent retries with backoff.
const RETRYABLE: [u16; 5] = [429, 500, 502, 503, 504];

/// Outcome of one delivery attempt after retries.
#[derive(Debug)]
pub enum SendOutcome {
    /// Accepted by the server; carries the ingest acknowledgement.
    Delivered(Value),
    /// Rejected as invalid (unknown user, malformed activity). Fatal for
    /// this event only; the agent drops it and proceeds.
    Rejected(StatusCode),
}

/// Startup verification handshake result.
#[derive(Debug)]
pub enum UserVerification {
    Verified(Value),
    NotFound,
    Unreachable(String),
}

pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    retry_budget: u32,
    retry_base_delay: Duration,
}

impl Transport {
    pub fn new(config: &AgentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.connect_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| sentinel_core::Error::transport(format!("building http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            retry_budget: config.retry_budget,
            retry_base_delay: config.retry_base_delay,
        })
    }

    /// Deliver one activity, retrying transient failures with exponential
    /// backoff. Returns an error only once the retry budget is exhausted;
    /// the caller preserves the event in the offline queue.
    pub async fn send_activity(&self, payload: &Value) -> Result<SendOutcome> {
        let url = format!("{}/api/activity", self.base_url);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.client.post(&url).json(payload).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let ack = response.json::<Value>().await.unwrap_or(Value::Null);
                        return Ok(SendOutcome::Delivered(ack));
                    }
                    if RETRYABLE.contains(&status.as_u16()) {
                        if attempt > self.retry_budget {
                            return Err(sentinel_core::Error::transport(format!(
                                "server returned {status} after {attempt} attempts"
                            )));
                        }
                        self.backoff(attempt).await;
                        continue;
                    }
                    // Input-invalid: final, not retried.
                    debug!("Server rejected activity with {status}");
                    return Ok(SendOutcome::Rejected(status));
                }
                Err(e) => {
                    // DNS failures, connection refused and timeouts are
                    // transient; never crash on them.
                    if attempt > self.retry_budget {
                        return Err(sentinel_core::Error::transport(format!(
                            "delivery failed after {attempt} attempts: {e}"
                        )));
                    }
                    warn!("Delivery attempt {attempt} failed: {e}");
                    self.backoff(attempt).await;
                }
            }
        }
    }

    /// Startup handshake: fetch the user profile.
    pub async fn verify_user(&self, user_id: &str) -> UserVerification {
        let url = format!("{}/api/users/{}", self.base_url, user_id);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let profile = response.json::<Value>().await.unwrap_or(Value::Null);
                UserVerification::Verified(profile)
            }
            Ok(response) if response.status() == StatusCode::NOT_FOUND => UserVerification::NotFound,
            Ok(response) => UserVerification::Unreachable(format!(
                "unexpected status {} from user lookup",
                response.status()
            )),
            Err(e) => UserVerification::Unreachable(e.to_string()),
        }
    }

    /// Quick connectivity probe against the service health endpoint.
    pub async fn probe_health(&self) -> bool {
        let url = format!("{}/api/health", self.base_url);
        match self.client.get(&url).timeout(Duration::from_secs(3)).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    async fn backoff(&self, attempt: u32) {
        let exponent = attempt.saturating_sub(1).min(6);
        let delay = self.retry_base_delay * 2u32.pow(exponent);
        tokio::time::sleep(delay).await;
    }
}
