use async_trait::async_trait;
use diarization_domain::{
    Diarization, DiarizationMode, DomainError, PipelineStep, ProgressSink, SpeakerHint, Transcriber,
};
use diarization_infra_common::retry_with_backoff;
use serde::Deserialize;
use serde_json::json;

use crate::http_client::{poll_until_ready, retry_policy, PollOutcome, VendorHttpConfig};
use crate::mapping::{into_service_result, single_engine_recording, words_into_segments, VendorWord};

const VENDOR: &str = "speechmatics";
const ENGINE_KEY: &str = "SpeechmaticsBatch";

pub struct SpeechmaticsBatchAdapter {
    client: reqwest::Client,
    config: VendorHttpConfig,
}

impl SpeechmaticsBatchAdapter {
    pub fn new(config: VendorHttpConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|err| DomainError::configuration(format!("failed to build speechmatics http client: {err}")))?;
        Ok(Self { client, config })
    }

    async fn submit_job(&self, audio_ref: &str, language: &str, mode: DiarizationMode) -> Result<String, DomainError> {
        let url = format!("{}/v2/jobs", self.config.base_url);
        let diarization = match mode {
            DiarizationMode::Mix => "speaker",
            DiarizationMode::Channel => "none",
        };
        let body = json!({
            "data_file": audio_ref,
            "config": {
                "type": "transcription",
                "transcription_config": {
                    "language": language,
                    "diarization": diarization,
                }
            }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DomainError::transient(VENDOR, format!("job submission failed with status {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(VENDOR, format!("job submission failed with status {}", response.status())));
        }

        #[derive(Deserialize)]
        struct SubmitResponse {
            id: String,
        }
        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;
        Ok(parsed.id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<PollOutcome<()>, DomainError> {
        let url = format!("{}/v2/jobs/{job_id}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() {
            return Err(DomainError::transient(VENDOR, format!("status poll failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct StatusEnvelope {
            job: StatusJob,
        }
        #[derive(Deserialize)]
        struct StatusJob {
            status: String,
        }
        let parsed: StatusEnvelope = response
            .json()
            .await
            .map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

        match parsed.job.status.as_str() {
            "done" => Ok(PollOutcome::Ready(())),
            "rejected" | "deleted" => Ok(PollOutcome::Failed(format!("job ended with status {}", parsed.job.status))),
            other => Ok(PollOutcome::Pending(other.to_string())),
        }
    }

    async fn fetch_transcript(&self, job_id: &str) -> Result<Vec<VendorWord>, DomainError> {
        let url = format!("{}/v2/jobs/{job_id}/transcript?format=json-v2", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() {
            return Err(DomainError::transient(VENDOR, format!("transcript fetch failed with {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(VENDOR, format!("transcript fetch failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct TranscriptEnvelope {
            results: Vec<ResultItem>,
        }
        #[derive(Deserialize)]
        struct ResultItem {
            #[serde(default)]
            alternatives: Vec<Alternative>,
            start_time: f64,
            end_time: f64,
        }
        #[derive(Deserialize)]
        struct Alternative {
            content: String,
            #[serde(default)]
            speaker: Option<String>,
            #[serde(default)]
            confidence: Option<f64>,
        }

        let parsed: TranscriptEnvelope = response
            .json()
            .await
            .map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .filter_map(|item| {
                let alternative = item.alternatives.into_iter().next()?;
                Some(VendorWord {
                    text: alternative.content,
                    start: item.start_time,
                    end: item.end_time,
                    speaker: alternative.speaker,
                    confidence: alternative.confidence,
                })
            })
            .collect())
    }
}

#[async_trait]
impl Transcriber for SpeechmaticsBatchAdapter {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
        speaker_hint: &SpeakerHint,
        mode: DiarizationMode,
        progress: &dyn ProgressSink,
    ) -> Result<Diarization, DomainError> {
        let _ = speaker_hint;
        let policy = retry_policy();

        let job_id = retry_with_backoff(policy, VENDOR, || self.submit_job(audio_ref, language, mode)).await?;

        poll_until_ready(
            VENDOR,
            PipelineStep::Step1Asr,
            progress,
            self.config.poll_interval,
            self.config.max_poll_wait,
            || self.poll_status(&job_id),
        )
        .await?;

        let words = retry_with_backoff(retry_policy(), VENDOR, || self.fetch_transcript(&job_id)).await?;
        let segments = words_into_segments(words, mode, None);
        let result = into_service_result(segments);
        let recording = single_engine_recording(&job_id, audio_ref, language, ENGINE_KEY, result);

        Ok(Diarization {
            recording,
            services_tested: [ENGINE_KEY.to_string()].into_iter().collect(),
        })
    }
}
