use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::DomainError;

/// `SPEAKER_00`, `SPEAKER_01`, ... Exactly two are allowed to reach the
/// Markdown stage (Agent, Client); everything else is internal bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpeakerLabel(String);

impl SpeakerLabel {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keeps the last two digits of whatever was handed in; falls back to
    /// `fallback_index` when no digits are present. Idempotent: normalizing
    /// an already-normalized label returns it unchanged (R2).
    pub fn normalize(raw: &str, fallback_index: usize) -> Self {
        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        let index = if digits.is_empty() {
            fallback_index
        } else {
            let tail = if digits.len() > 2 {
                &digits[digits.len() - 2..]
            } else {
                &digits[..]
            };
            tail.parse::<usize>().unwrap_or(fallback_index)
        };
        Self(format!("SPEAKER_{index:02}"))
    }
}

impl std::fmt::Display for SpeakerLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Agent,
    Client,
    Unknown,
}

impl Role {
    /// `operator` is the vendor-facing synonym for `Agent` used by the Role
    /// Classifier's prompt contract (§4.4).
    pub fn from_classifier_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "operator" | "agent" => Role::Agent,
            "client" => Role::Client,
            _ => Role::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<SpeakerLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Where a segment came from in the pipeline; drives downstream trust rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentSource {
    Primary,
    VoiceTrack,
    VoiceEnhanced,
    VoiceAdditional,
    LlmRefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeConfidence {
    High,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub speaker: SpeakerLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub text: String,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub words: Vec<Word>,
    #[serde(default)]
    pub overlap: bool,
    pub source: SegmentSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_speaker: Option<SpeakerLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_confidence: Option<MergeConfidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pause_before: Option<f64>,
    #[serde(default)]
    pub is_replica_boundary: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pauses: Vec<PauseGap>,
}

/// A detected intra-segment silence between two consecutive words.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PauseGap {
    pub after_word_index: usize,
    pub duration: f64,
}

impl Segment {
    /// Bare-bones segment with every optional field at its default; callers
    /// fill in `words`/`role`/etc. with struct-update syntax.
    pub fn new(speaker: SpeakerLabel, text: impl Into<String>, start: f64, end: f64, source: SegmentSource) -> Self {
        Self {
            speaker,
            role: None,
            text: text.into(),
            start,
            end,
            words: Vec::new(),
            overlap: false,
            source,
            track_speaker: None,
            merge_confidence: None,
            pause_before: None,
            is_replica_boundary: false,
            pauses: Vec::new(),
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    pub fn mid(&self) -> f64 {
        (self.start + self.end) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiarizationMode {
    Mix,
    Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum AsrEngine {
    SpeechmaticsBatch,
    AzureBatch,
    AzureRealtime,
}

impl AsrEngine {
    pub fn as_key_fragment(&self) -> &'static str {
        match self {
            AsrEngine::SpeechmaticsBatch => "speechmatics-batch",
            AsrEngine::AzureBatch => "azure-batch",
            AsrEngine::AzureRealtime => "azure-realtime",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SeparationMode {
    AudioShake,
    PyAnnote,
    SpeechBrain,
}

impl SeparationMode {
    pub fn as_key_fragment(&self) -> &'static str {
        match self {
            SeparationMode::AudioShake => "audioshake",
            SeparationMode::PyAnnote => "pyannote",
            SeparationMode::SpeechBrain => "speechbrain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    Local,
    Fast,
    Smart,
    Smart2,
    Test,
    Test2,
    Gemini25,
}

impl LlmMode {
    pub fn is_local(&self) -> bool {
        matches!(self, LlmMode::Local)
    }

    pub fn as_key_fragment(&self) -> &'static str {
        match self {
            LlmMode::Local => "local",
            LlmMode::Fast => "fast",
            LlmMode::Smart => "smart",
            LlmMode::Smart2 => "smart2",
            LlmMode::Test => "test",
            LlmMode::Test2 => "test2",
            LlmMode::Gemini25 => "gemini25",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAnalysisMode {
    Script,
    Llm,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerHint {
    Auto,
    Count(u32),
}

impl SpeakerHint {
    /// `auto` or the literal count, used verbatim as the diarization cache
    /// key's `{speaker_hint|auto}` fragment (§4.1).
    pub fn as_key_fragment(&self) -> String {
        match self {
            SpeakerHint::Auto => "auto".to_string(),
            SpeakerHint::Count(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AudioSource {
    /// A local file path, already accepted and written into `uploads/`.
    File(String),
    Url(String),
}

/// One inbound `/diarize-overlap` request. Immutable once a run starts (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub audio_source: AudioSource,
    pub language: String,
    pub speaker_hint: SpeakerHint,
    pub llm_mode: LlmMode,
    pub pipeline_mode: SeparationMode,
    pub asr_engine: AsrEngine,
    pub text_analysis_mode: TextAnalysisMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_truth: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceResult {
    pub segments: Vec<Segment>,
    pub speaker_count: u32,
    #[serde(default)]
    pub raw_meta: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recording {
    pub id: String,
    pub name: String,
    pub duration: f64,
    pub language: String,
    pub speaker_count: u32,
    pub results: BTreeMap<String, ServiceResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diarization {
    pub recording: Recording,
    pub services_tested: BTreeSet<String>,
}

impl Diarization {
    /// The engine key used before any merge has happened.
    pub fn primary_result(&self, engine_key: &str) -> Option<&ServiceResult> {
        self.recording.results.get(engine_key)
    }

    pub const MERGED_KEY: &'static str = "overlap-corrected";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAnalysis {
    pub role: Role,
    pub confidence: f64,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceTrack {
    pub speaker: SpeakerLabel,
    pub audio_ref: String,
    pub transcription: Diarization,
    pub transcript_text: String,
    pub role_analysis: Result<RoleAnalysis, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    CompletedWithFallback,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineStep {
    Step1Asr,
    Step1_5LlmDiarization,
    Step2Separation,
    Step3StemTranscription,
    Step4Merge,
    Step5Markdown,
    Step6TextAnalysis,
    Step7Scoring,
}

impl PipelineStep {
    pub fn index(&self) -> u8 {
        match self {
            PipelineStep::Step1Asr => 1,
            PipelineStep::Step1_5LlmDiarization => 1,
            PipelineStep::Step2Separation => 2,
            PipelineStep::Step3StemTranscription => 3,
            PipelineStep::Step4Merge => 4,
            PipelineStep::Step5Markdown => 5,
            PipelineStep::Step6TextAnalysis => 6,
            PipelineStep::Step7Scoring => 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepState {
    pub step: PipelineStep,
    pub status: StepStatus,
    pub duration_secs: f64,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthSide {
    pub match_percent: f64,
    pub matched: u64,
    pub unmatched: u64,
    pub total: u64,
    pub extra: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthComparison {
    pub next_level_better: bool,
    pub improvement: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthMetrics {
    pub next_level: GroundTruthSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speechmatics: Option<GroundTruthSide>,
    pub comparison: GroundTruthComparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextAnalysisTag {
    Green,
    Blue,
    Red,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAnalysisEntry {
    pub segment_id: usize,
    pub tag: TextAnalysisTag,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextAnalysisResult {
    pub entries: Vec<TextAnalysisEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineArtifacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_diarization: Option<Diarization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_diarization: Option<Diarization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub separation_speakers: Option<Vec<SpeakerLabel>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub voice_tracks: Vec<VoiceTrack>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrected_diarization: Option<Diarization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_analysis: Option<TextAnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_truth_metrics: Option<GroundTruthMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub request_id: String,
    pub request: Request,
    pub step_states: Vec<StepState>,
    pub artifacts: PipelineArtifacts,
}

impl PipelineRun {
    pub fn new(request_id: impl Into<String>, request: Request) -> Self {
        Self {
            request_id: request_id.into(),
            request,
            step_states: Vec::new(),
            artifacts: PipelineArtifacts::default(),
        }
    }

    pub fn record_step(&mut self, step: PipelineStep, status: StepStatus, duration_secs: f64, details: Value) {
        self.step_states.push(StepState {
            step,
            status,
            duration_secs,
            details,
        });
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEventKind {
    #[serde(rename = "step-progress")]
    StepProgress {
        step: PipelineStep,
        status: StepStatus,
        description: String,
        details: Value,
    },
    #[serde(rename = "final-result")]
    FinalResult { payload: Value },
    #[serde(rename = "pipeline-error")]
    PipelineError {
        step: Option<PipelineStep>,
        reason: String,
    },
    #[serde(rename = "keep-alive")]
    KeepAlive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(flatten)]
    pub kind: ProgressEventKind,
    pub request_id: String,
    pub timestamp: f64,
}

impl ProgressEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.kind,
            ProgressEventKind::FinalResult { .. } | ProgressEventKind::PipelineError { .. }
        )
    }
}

/// Validates the No-Hallucination (P4) building blocks: does `candidate`
/// appear verbatim (ignoring surrounding whitespace) inside `source`?
pub fn appears_verbatim(candidate: &str, source: &str) -> bool {
    source.contains(candidate.trim())
}

pub fn clamp_segment_bounds(segment: &mut Segment) -> Result<(), DomainError> {
    if segment.end < segment.start {
        segment.end = segment.start;
    }
    Ok(())
}

/// Wraps a segment list as a single-result recording. Used by adapters that
/// only ever produce one `ServiceResult` per call, and by test doubles
/// across crate boundaries that need a `ServiceResult` without reaching
/// into private fields.
pub fn entity_test_support_service_result(segments: Vec<Segment>) -> ServiceResult {
    let speaker_count = segments.iter().map(|segment| segment.speaker.as_str()).collect::<BTreeSet<_>>().len() as u32;
    ServiceResult { segments, speaker_count, raw_meta: Value::Null }
}
