use std::time::Duration;

use async_trait::async_trait;
use diarization_domain::{
    DomainError, PipelineStep, ProgressSink, SeparationDebugParams, SeparationOutput, Separator, SpeakerLabel,
    Stem, StepStatus,
};
use diarization_infra_common::retry_with_backoff;
use diarization_infra_common::RetryPolicy;
use serde::Deserialize;
use serde_json::json;

const VENDOR: &str = "audioshake";

pub struct AudioShakeAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    poll_interval: Duration,
    max_poll_wait: Duration,
}

impl AudioShakeAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| DomainError::configuration(format!("failed to build audioshake http client: {err}")))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(5),
            max_poll_wait: Duration::from_secs(20 * 60),
        })
    }

    /// AudioShake requires a publicly accessible HTTPS source; a bare local
    /// path or non-HTTPS URL is a validation error, not a vendor-reported
    /// one, so it never retries and never leaks into the PyAnnote/SpeechBrain
    /// error paths (§4.2 failure model).
    fn validate_https(audio_ref: &str) -> Result<(), DomainError> {
        if audio_ref.starts_with("https://") {
            Ok(())
        } else {
            Err(DomainError::validation("requires publicly accessible HTTPS URL"))
        }
    }

    async fn submit_job(&self, audio_ref: &str) -> Result<String, DomainError> {
        let url = format!("{}/v1/jobs", self.base_url);
        let body = json!({ "audioUrl": audio_ref, "stems": ["vocals_1", "vocals_2", "background"] });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DomainError::transient(VENDOR, format!("job submission failed with {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(VENDOR, format!("job submission failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            id: String,
        }
        let parsed: SubmitResponse = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;
        Ok(parsed.id)
    }

    /// Re-fetches current signed URLs for an already-completed job, used to
    /// re-materialize a separation-cache hit (§4.1): AudioShake URLs are
    /// time-limited, so a cached payload is never served back verbatim.
    async fn fetch_current_stems(&self, job_id: &str) -> Result<Vec<StemFile>, DomainError> {
        let url = format!("{}/v1/jobs/{job_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() {
            return Err(DomainError::transient(VENDOR, format!("status refresh failed with {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(VENDOR, format!("status refresh failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct StatusResponse {
            #[serde(default)]
            stems: Vec<StemFile>,
        }
        let parsed: StatusResponse = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;
        Ok(parsed.stems)
    }

    async fn poll_until_done(&self, job_id: &str, progress: &dyn ProgressSink) -> Result<Vec<StemFile>, DomainError> {
        let started = tokio::time::Instant::now();
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let url = format!("{}/v1/jobs/{job_id}", self.base_url);
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .send()
                .await
                .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

            if response.status().is_server_error() {
                return Err(DomainError::transient(VENDOR, format!("status poll failed with {}", response.status())));
            }

            #[derive(Deserialize)]
            struct StatusResponse {
                status: String,
                #[serde(default)]
                stems: Vec<StemFile>,
            }
            let parsed: StatusResponse = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

            match parsed.status.as_str() {
                "completed" => {
                    progress.emit(PipelineStep::Step2Separation, StepStatus::Completed, "audioshake job finished", json!({ "attempt": attempt }));
                    return Ok(parsed.stems);
                }
                "failed" => return Err(DomainError::external_service_error(VENDOR, "separation job failed")),
                other => {
                    progress.emit(PipelineStep::Step2Separation, StepStatus::Processing, &format!("audioshake job polling: {other}"), json!({ "attempt": attempt, "status": other }));
                }
            }

            if started.elapsed() >= self.max_poll_wait {
                return Err(DomainError::transient(VENDOR, "polling timed out waiting for job completion"));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[derive(Deserialize, Clone)]
struct StemFile {
    name: String,
    url: String,
    #[serde(default)]
    is_background: bool,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "wav".to_string()
}

#[async_trait]
impl Separator for AudioShakeAdapter {
    async fn separate(
        &self,
        audio_ref: &str,
        debug: &SeparationDebugParams,
        progress: &dyn ProgressSink,
    ) -> Result<SeparationOutput, DomainError> {
        let _ = debug;
        Self::validate_https(audio_ref)?;

        let policy = RetryPolicy::vendor_default();
        let job_id = retry_with_backoff(policy, VENDOR, || self.submit_job(audio_ref)).await?;
        let stem_files = self.poll_until_done(&job_id, progress).await?;

        let stems = stem_files
            .into_iter()
            .enumerate()
            .map(|(index, file)| Stem {
                name: SpeakerLabel::normalize(&file.name, index),
                audio_ref: file.url,
                is_background: file.is_background,
                format: file.format,
            })
            .collect();

        Ok(SeparationOutput { task_id: job_id, stems })
    }

    async fn refresh_stems(&self, task_id: &str, cached: Vec<Stem>) -> Result<Vec<Stem>, DomainError> {
        let stem_files = self.fetch_current_stems(task_id).await?;
        if stem_files.is_empty() {
            return Ok(cached);
        }
        Ok(stem_files
            .into_iter()
            .enumerate()
            .map(|(index, file)| Stem {
                name: SpeakerLabel::normalize(&file.name, index),
                audio_ref: file.url,
                is_background: file.is_background,
                format: file.format,
            })
            .collect())
    }
}
