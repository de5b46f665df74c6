//! HTTP client for the remote design-automation execution service.
//!
//! Submission is the only outbound call the engine sees from this server:
//! one POST per workitem. Transient failures (connect errors, timeouts,
//! 429/5xx rejections) retry with exponential backoff and jitter; permanent
//! rejections fail immediately.

pub mod workitem;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};

use crate::config::EngineConfig;
use crate::engine::workitem::{JobHandle, WorkItemAck, WorkItemSpec};
use crate::error::SubmitError;

/// Submits workitems to the remote execution service.
#[async_trait]
pub trait JobSubmitter: Send + Sync {
    async fn submit(&self, spec: WorkItemSpec) -> Result<JobHandle, SubmitError>;
}

/// Retry policy for workitem submission.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Calculate exponential backoff delay with 25% jitter, capped at `max_delay`.
///
/// Formula: `base_delay * 2^attempt`, then add uniform jitter in [-25%, +25%].
/// A hard floor of 100ms prevents degenerate tight-loop retries.
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped_ms = exp_ms.min(policy.max_delay.as_millis() as u64);

    let jitter_range = capped_ms / 4; // 25%
    let jitter = if jitter_range > 0 {
        let offset = rand::thread_rng().gen_range(0..=jitter_range.saturating_mul(2));
        offset as i64 - jitter_range as i64
    } else {
        0
    };
    let delay_ms = (capped_ms as i64 + jitter).max(100) as u64;
    Duration::from_millis(delay_ms)
}

/// Run `op` up to `max_retries + 1` times, sleeping with backoff between
/// transient failures. Permanent errors return immediately.
pub(crate) async fn submit_with_retries<F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> Result<JobHandle, SubmitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<JobHandle, SubmitError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(handle) => return Ok(handle),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = backoff_delay(policy, attempt);
                attempt += 1;
                tracing::warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying workitem submission after transient error"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Reqwest-backed submitter for the engine's workitem endpoint.
pub struct HttpJobSubmitter {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    retry: RetryPolicy,
}

impl HttpJobSubmitter {
    pub fn new(client: reqwest::Client, config: &EngineConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.access_token.clone(),
            retry: config.retry.clone(),
        }
    }

    fn workitems_url(&self) -> String {
        format!("{}/workitems", self.base_url)
    }

    async fn try_submit(&self, spec: &WorkItemSpec) -> Result<JobHandle, SubmitError> {
        let resp = self
            .client
            .post(self.workitems_url())
            .bearer_auth(self.token.expose_secret())
            .json(spec)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(SubmitError::Rejected { status, body });
        }

        let ack: WorkItemAck = resp
            .json()
            .await
            .map_err(|e| SubmitError::InvalidResponse(e.to_string()))?;
        Ok(JobHandle(ack.id))
    }
}

#[async_trait]
impl JobSubmitter for HttpJobSubmitter {
    async fn submit(&self, spec: WorkItemSpec) -> Result<JobHandle, SubmitError> {
        let activity = spec.activity_id.clone();
        let handle = submit_with_retries(&self.retry, || self.try_submit(&spec)).await?;
        tracing::info!(activity = %activity, job = %handle, "Workitem submitted");
        Ok(handle)
    }
}
