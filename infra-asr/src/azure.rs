use async_trait::async_trait;
use diarization_domain::{
    Diarization, DiarizationMode, DomainError, PipelineStep, ProgressSink, SpeakerHint, Transcriber,
};
use diarization_infra_common::retry_with_backoff;
use serde::Deserialize;
use serde_json::json;

use crate::http_client::{poll_until_ready, retry_policy, PollOutcome, VendorHttpConfig};
use crate::mapping::{into_service_result, single_engine_recording, words_into_segments, VendorWord};

const VENDOR: &str = "azure-speech";

/// Azure's batch transcription API: submit a `ContentUrls`-addressed job,
/// poll `/transcriptions/{id}`, then fetch `files/transcriptions`.
pub struct AzureBatchAdapter {
    client: reqwest::Client,
    config: VendorHttpConfig,
}

impl AzureBatchAdapter {
    pub fn new(config: VendorHttpConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|err| DomainError::configuration(format!("failed to build azure http client: {err}")))?;
        Ok(Self { client, config })
    }

    async fn submit_job(&self, audio_ref: &str, language: &str, diarization_enabled: bool) -> Result<String, DomainError> {
        let url = format!("{}/speechtotext/v3.2/transcriptions", self.config.base_url);
        let body = json!({
            "contentUrls": [audio_ref],
            "locale": language,
            "properties": {
                "diarizationEnabled": diarization_enabled,
                "wordLevelTimestampsEnabled": true,
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
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

        let raw: serde_json::Value = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;
        let job_url = raw
            .get("self")
            .and_then(|v| v.as_str())
            .ok_or_else(|| DomainError::parse(VENDOR, "missing `self` link in submit response"))?;
        job_url
            .rsplit('/')
            .next()
            .map(str::to_string)
            .ok_or_else(|| DomainError::parse(VENDOR, "malformed job url"))
    }

    async fn poll_status(&self, job_id: &str) -> Result<PollOutcome<()>, DomainError> {
        let url = format!("{}/speechtotext/v3.2/transcriptions/{job_id}", self.config.base_url);
        let response = self
            .client
            .get(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() {
            return Err(DomainError::transient(VENDOR, format!("status poll failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct StatusResponse {
            status: String,
        }
        let parsed: StatusResponse = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;
        match parsed.status.as_str() {
            "Succeeded" => Ok(PollOutcome::Ready(())),
            "Failed" => Ok(PollOutcome::Failed("transcription job failed".to_string())),
            other => Ok(PollOutcome::Pending(other.to_string())),
        }
    }

    async fn fetch_transcript(&self, job_id: &str) -> Result<Vec<VendorWord>, DomainError> {
        let files_url = format!("{}/speechtotext/v3.2/transcriptions/{job_id}/files", self.config.base_url);
        let files_response = self
            .client
            .get(&files_url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;
        let files: serde_json::Value = files_response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

        let content_url = files
            .get("values")
            .and_then(|v| v.as_array())
            .and_then(|values| values.iter().find(|f| f.get("kind").and_then(|k| k.as_str()) == Some("Transcription")))
            .and_then(|f| f.get("links"))
            .and_then(|l| l.get("contentUrl"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| DomainError::parse(VENDOR, "no transcription content url in files response"))?;

        let transcript_response = self
            .client
            .get(content_url)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        #[derive(Deserialize)]
        struct TranscriptEnvelope {
            #[serde(rename = "recognizedPhrases")]
            recognized_phrases: Vec<RecognizedPhrase>,
        }
        #[derive(Deserialize)]
        struct RecognizedPhrase {
            speaker: Option<u32>,
            #[serde(rename = "nBest")]
            n_best: Vec<NBest>,
        }
        #[derive(Deserialize)]
        struct NBest {
            #[serde(rename = "displayWords", default)]
            display_words: Vec<DisplayWord>,
        }
        #[derive(Deserialize)]
        struct DisplayWord {
            #[serde(rename = "displayText")]
            display_text: String,
            #[serde(rename = "offsetInTicks")]
            offset_in_ticks: f64,
            #[serde(rename = "durationInTicks")]
            duration_in_ticks: f64,
            confidence: Option<f64>,
        }

        let parsed: TranscriptEnvelope = transcript_response
            .json()
            .await
            .map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

        const TICKS_PER_SECOND: f64 = 10_000_000.0;
        let mut words = Vec::new();
        for phrase in parsed.recognized_phrases {
            let speaker = phrase.speaker.map(|s| s.to_string());
            for best in phrase.n_best {
                for display_word in best.display_words {
                    let start = display_word.offset_in_ticks / TICKS_PER_SECOND;
                    let end = start + display_word.duration_in_ticks / TICKS_PER_SECOND;
                    words.push(VendorWord {
                        text: display_word.display_text,
                        start,
                        end,
                        speaker: speaker.clone(),
                        confidence: display_word.confidence,
                    });
                }
            }
        }
        words.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
        Ok(words)
    }
}

#[async_trait]
impl Transcriber for AzureBatchAdapter {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
        speaker_hint: &SpeakerHint,
        mode: DiarizationMode,
        progress: &dyn ProgressSink,
    ) -> Result<Diarization, DomainError> {
        let _ = speaker_hint;
        let diarization_enabled = matches!(mode, DiarizationMode::Mix);
        let policy = retry_policy();

        let job_id = retry_with_backoff(policy, VENDOR, || self.submit_job(audio_ref, language, diarization_enabled)).await?;

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
        let recording = single_engine_recording(&job_id, audio_ref, language, "AzureBatch", result);

        Ok(Diarization {
            recording,
            services_tested: ["AzureBatch".to_string()].into_iter().collect(),
        })
    }
}

/// Azure's fast-transcription REST endpoint returns a synchronous JSON body
/// rather than a websocket stream; it fills the `AzureRealtime` slot without
/// a long-lived socket, which the orchestrator's step-scoped adapter calls
/// don't support anyway (decision recorded in DESIGN.md).
pub struct AzureRealtimeAdapter {
    client: reqwest::Client,
    config: VendorHttpConfig,
}

impl AzureRealtimeAdapter {
    pub fn new(config: VendorHttpConfig) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(config.call_timeout)
            .build()
            .map_err(|err| DomainError::configuration(format!("failed to build azure http client: {err}")))?;
        Ok(Self { client, config })
    }

    async fn transcribe_once(&self, audio_ref: &str, language: &str) -> Result<Vec<VendorWord>, DomainError> {
        let url = format!("{}/speechtotext/transcriptions:transcribe?api-version=2024-11-15", self.config.base_url);
        let body = json!({
            "definition": {
                "locales": [language],
            },
            "audioUrl": audio_ref,
        });

        let response = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| DomainError::transient(VENDOR, err.to_string()))?;

        if response.status().is_server_error() || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DomainError::transient(VENDOR, format!("fast transcription failed with {}", response.status())));
        }
        if !response.status().is_success() {
            return Err(DomainError::external_service_error(VENDOR, format!("fast transcription failed with {}", response.status())));
        }

        #[derive(Deserialize)]
        struct FastResponse {
            phrases: Vec<Phrase>,
        }
        #[derive(Deserialize)]
        struct Phrase {
            text: String,
            offset: f64,
            duration: f64,
            speaker: Option<u32>,
            confidence: Option<f64>,
        }
        let parsed: FastResponse = response.json().await.map_err(|err| DomainError::parse(VENDOR, err.to_string()))?;

        Ok(parsed
            .phrases
            .into_iter()
            .map(|phrase| VendorWord {
                text: phrase.text,
                start: phrase.offset,
                end: phrase.offset + phrase.duration,
                speaker: phrase.speaker.map(|s| s.to_string()),
                confidence: phrase.confidence,
            })
            .collect())
    }
}

#[async_trait]
impl Transcriber for AzureRealtimeAdapter {
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
        speaker_hint: &SpeakerHint,
        mode: DiarizationMode,
        progress: &dyn ProgressSink,
    ) -> Result<Diarization, DomainError> {
        let _ = speaker_hint;
        progress.emit(PipelineStep::Step1Asr, diarization_domain::StepStatus::Processing, "azure realtime transcription submitted", json!({}));

        let words = retry_with_backoff(retry_policy(), VENDOR, || self.transcribe_once(audio_ref, language)).await?;
        let segments = words_into_segments(words, mode, None);
        let result = into_service_result(segments);
        let recording = single_engine_recording(audio_ref, audio_ref, language, "AzureRealtime", result);

        progress.emit(PipelineStep::Step1Asr, diarization_domain::StepStatus::Completed, "azure realtime transcription finished", json!({}));

        Ok(Diarization {
            recording,
            services_tested: ["AzureRealtime".to_string()].into_iter().collect(),
        })
    }
}
