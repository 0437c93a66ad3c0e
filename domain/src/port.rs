use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Diarization, DiarizationMode, PipelineStep, SpeakerHint, SpeakerLabel, StepStatus};
use crate::error::DomainError;

/// A single stem produced by a Separation Adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stem {
    pub name: SpeakerLabel,
    pub audio_ref: String,
    pub is_background: bool,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationOutput {
    pub task_id: String,
    pub stems: Vec<Stem>,
}

/// SpeechBrain-only debug knobs; other back-ends ignore these (§6).
#[derive(Debug, Clone, Default)]
pub struct SeparationDebugParams {
    pub chunk_seconds: Option<f64>,
    pub enable_spectral_gating: Option<bool>,
    pub gate_threshold: Option<f64>,
    pub gate_alpha: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub reasoning_effort: Option<String>,
    pub stop: Option<Vec<String>>,
}

/// Progress sink every adapter reports into. The orchestrator is the only
/// reader; adapters never talk to the transport directly (§9 "SSE as a
/// channel").
pub trait ProgressSink: Send + Sync {
    fn emit(&self, step: PipelineStep, status: StepStatus, description: &str, details: Value);
}

/// No-op sink for call sites (tests, single-shot scripts) that do not care
/// about progress.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _step: PipelineStep, _status: StepStatus, _description: &str, _details: Value) {}
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// `mix` is the default; `channel` is required when re-transcribing a
    /// separated stem (§4.2).
    async fn transcribe(
        &self,
        audio_ref: &str,
        language: &str,
        speaker_hint: &SpeakerHint,
        mode: DiarizationMode,
        progress: &dyn ProgressSink,
    ) -> Result<Diarization, DomainError>;
}

#[async_trait]
pub trait Separator: Send + Sync {
    async fn separate(
        &self,
        audio_ref: &str,
        debug: &SeparationDebugParams,
        progress: &dyn ProgressSink,
    ) -> Result<SeparationOutput, DomainError>;

    /// Re-materializes a cache-hit's stems for back-ends whose download URLs
    /// expire (AudioShake). The default is "the cached stems are already
    /// trustworthy" — true for the local-subprocess back-ends, whose
    /// `audio_ref` is a path under the persisted `uploads/` directory rather
    /// than a signed, time-limited URL (§4.1 correctness property).
    async fn refresh_stems(&self, _task_id: &str, cached: Vec<Stem>) -> Result<Vec<Stem>, DomainError> {
        Ok(cached)
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> Result<String, DomainError>;
}

#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit(Value),
    Miss,
}

impl CacheLookup {
    pub fn into_hit(self) -> Option<Value> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            CacheLookup::Miss => None,
        }
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheLookup;
    async fn put(&self, key: &str, payload: &Value);
    async fn invalidate_all(&self);
    async fn export_all(&self) -> Vec<(String, Value)>;
}
