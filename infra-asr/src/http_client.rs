use std::time::Duration;

use diarization_domain::{DomainError, PipelineStep, ProgressSink, StepStatus};
use diarization_infra_common::RetryPolicy;
use serde_json::json;

/// Shared vendor-call timeouts (§4.2): batch jobs run for minutes, so the
/// per-call timeout must outlive a single poll, not the whole job.
#[derive(Debug, Clone)]
pub struct VendorHttpConfig {
    pub base_url: String,
    pub api_key: String,
    pub call_timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_wait: Duration,
}

impl VendorHttpConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            call_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            max_poll_wait: Duration::from_secs(20 * 60),
        }
    }

    pub fn with_long_recording_timeout(mut self) -> Self {
        self.max_poll_wait = Duration::from_secs(20 * 60);
        self
    }
}

pub fn retry_policy() -> RetryPolicy {
    RetryPolicy::vendor_default()
}

/// Polls `poll_once` on a fixed interval, reporting each transition to the
/// progress sink (attempt/total, status) until it returns `Some`, the vendor
/// reports a terminal failure, or `max_wait` elapses (§4.2 "reports each
/// poll/state transition").
pub async fn poll_until_ready<F, Fut, T>(
    vendor: &'static str,
    step: PipelineStep,
    progress: &dyn ProgressSink,
    interval: Duration,
    max_wait: Duration,
    mut poll_once: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<PollOutcome<T>, DomainError>>,
{
    let started = tokio::time::Instant::now();
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match poll_once().await? {
            PollOutcome::Ready(value) => {
                progress.emit(
                    step,
                    StepStatus::Completed,
                    &format!("{vendor} job finished"),
                    json!({ "attempt": attempt, "vendor": vendor }),
                );
                return Ok(value);
            }
            PollOutcome::Pending(status_label) => {
                progress.emit(
                    step,
                    StepStatus::Processing,
                    &format!("{vendor} job polling: {status_label}"),
                    json!({ "attempt": attempt, "vendor": vendor, "status": status_label }),
                );
            }
            PollOutcome::Failed(reason) => {
                return Err(DomainError::external_service_error(vendor, reason));
            }
        }

        if started.elapsed() >= max_wait {
            return Err(DomainError::transient(vendor, "polling timed out waiting for job completion"));
        }
        tokio::time::sleep(interval).await;
    }
}

pub enum PollOutcome<T> {
    Ready(T),
    Pending(String),
    Failed(String),
}
