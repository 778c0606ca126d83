//! Dispatcher: one webhook attempt per call, under a deadline, no retries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cronhook_core::Job;
use tracing::{debug, warn};

use crate::error::{Result, SchedulerError};

/// Status recorded when no HTTP response was received (connect error, timeout).
pub const TRANSPORT_FAILURE_STATUS: u16 = 503;

/// Minimal HTTP client surface the dispatcher needs.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` as JSON to `url`, returning the response status code.
    async fn post_json(&self, url: &str, body: &serde_json::Value, timeout: Duration)
        -> Result<u16>;
}

/// [`WebhookTransport`] over a shared `reqwest::Client`.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WebhookTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<u16> {
        let resp = self
            .client
            .post(url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        Ok(resp.status().as_u16())
    }
}

/// Result of a single webhook attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Response status, or [`TRANSPORT_FAILURE_STATUS`] when none arrived.
    pub status_code: u16,
    /// Transport error text, when the request never completed.
    pub error: Option<String>,
    pub duration: Duration,
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

pub struct Dispatcher {
    transport: Arc<dyn WebhookTransport>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn WebhookTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// POST the job record to its webhook URL.
    ///
    /// Never fails: every problem is folded into the outcome so the caller can
    /// record it and tally it.
    pub async fn dispatch(&self, job: &Job) -> DispatchOutcome {
        let started = Instant::now();
        let result = match serde_json::to_value(job) {
            Ok(body) => {
                let send = self.transport.post_json(&job.webhook_url, &body, self.timeout);
                match tokio::time::timeout(self.timeout, send).await {
                    Ok(result) => result,
                    Err(_) => Err(SchedulerError::Transport(format!(
                        "no response within {} ms",
                        self.timeout.as_millis()
                    ))),
                }
            }
            Err(e) => Err(SchedulerError::Serialization(e)),
        };
        let duration = started.elapsed();

        let outcome = match result {
            Ok(status_code) => DispatchOutcome {
                status_code,
                error: None,
                duration,
            },
            Err(e) => DispatchOutcome {
                status_code: TRANSPORT_FAILURE_STATUS,
                error: Some(e.to_string()),
                duration,
            },
        };

        if outcome.is_success() {
            debug!(job_id = %job.id, status = outcome.status_code, "webhook delivered");
        } else {
            warn!(
                job_id = %job.id,
                url = %job.webhook_url,
                status = outcome.status_code,
                error = outcome.error.as_deref().unwrap_or(""),
                "webhook failed"
            );
        }
        outcome
    }
}
