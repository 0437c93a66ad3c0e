use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use diarization_domain::{
    AsrEngine, CacheStore, ChatModel, Diarization, DiarizationMode, DomainError, PipelineArtifacts, PipelineRun, PipelineStep, ProgressEvent, ProgressEventKind, Recording, Request, Role,
    RoleAnalysis, Segment, SegmentSource, SeparationDebugParams, SeparationMode, Separator, ServiceResult, SpeakerHint, SpeakerLabel, StepStatus, TextAnalysisMode, Transcriber, VoiceTrack,
};
use diarization_segment_utils::MarkdownRow;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cached_adapters::{cached_separate, cached_transcribe};
use crate::markdown::{build_prompt_context, run_pipeline as run_markdown_pipeline};
use crate::{merger, role_classifier, scoring, text_analysis, voice_track};

/// The three adapter ports the orchestrator drives. Wired by `setup` from
/// the concrete infra-* adapters; the application crate never depends on
/// them directly (§4.10, hexagonal boundary).
pub struct Engines {
    pub transcriber: Arc<dyn Transcriber>,
    pub separator: Arc<dyn Separator>,
    pub chat: Arc<dyn ChatModel>,
}

/// Builds an [`Engines`] handle for one request's `asr_engine`/
/// `pipeline_mode`/`llm_mode` selection (§9 "Dynamic dispatch over pipeline
/// mode"). Implemented by `setup`, which is the only crate allowed to touch
/// the concrete `infra-*` adapters; `http` depends on this trait instead of
/// on `setup` directly so the two crates don't form a cycle.
pub trait EngineFactory: Send + Sync {
    fn build(&self, request: &Request) -> Result<Engines, DomainError>;
}

/// The four content-addressed caches (§4.1): one per vendor-call family plus
/// the Role Classifier's own.
pub struct Caches {
    pub diarization: Arc<dyn CacheStore>,
    pub separation: Arc<dyn CacheStore>,
    pub llm: Arc<dyn CacheStore>,
    pub role: Arc<dyn CacheStore>,
}

/// Per-external-call deadlines (§5). Each field names the call it bounds.
#[derive(Debug, Clone, Copy)]
pub struct StepTimeouts {
    pub asr_first_job: Duration,
    pub asr: Duration,
    pub separation: Duration,
    pub speechbrain_separation: Duration,
    pub chat_remote: Duration,
    pub chat_local: Duration,
    pub chat_markdown: Duration,
}

impl Default for StepTimeouts {
    fn default() -> Self {
        Self {
            asr_first_job: Duration::from_secs(20 * 60),
            asr: Duration::from_secs(10 * 60),
            separation: Duration::from_secs(15 * 60),
            speechbrain_separation: Duration::from_secs(5 * 60),
            chat_remote: Duration::from_secs(3 * 60),
            chat_local: Duration::from_secs(30 * 60),
            chat_markdown: Duration::from_secs(10 * 60),
        }
    }
}

pub struct OrchestratorSettings {
    pub fast_model: String,
    pub use_multi_step_markdown: bool,
    pub text_analysis_mode: TextAnalysisMode,
    pub demo_llm_mode: Option<String>,
    /// STEP 3's per-stem fan-out bound (spec: "MAY parallelize with a small
    /// fan-out (≤4)").
    pub max_stem_concurrency: usize,
    pub timeouts: StepTimeouts,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            fast_model: "gpt-4o-mini".to_string(),
            use_multi_step_markdown: false,
            text_analysis_mode: TextAnalysisMode::Script,
            demo_llm_mode: None,
            max_stem_concurrency: 4,
            timeouts: StepTimeouts::default(),
        }
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Forwards every step's progress into the channel the transport layer
/// drains for SSE (§9 "SSE as a channel", mirroring the teacher's
/// `infra-streaming` websocket-frame-over-channel pattern).
struct ChannelProgressSink {
    request_id: String,
    sender: tokio::sync::mpsc::UnboundedSender<ProgressEvent>,
}

impl diarization_domain::ProgressSink for ChannelProgressSink {
    fn emit(&self, step: PipelineStep, status: StepStatus, description: &str, details: Value) {
        let _ = self.sender.send(ProgressEvent {
            kind: ProgressEventKind::StepProgress { step, status, description: description.to_string(), details },
            request_id: self.request_id.clone(),
            timestamp: now_secs(),
        });
    }
}

fn emit(sender: Option<&tokio::sync::mpsc::UnboundedSender<ProgressEvent>>, request_id: &str, kind: ProgressEventKind) {
    if let Some(sender) = sender {
        let _ = sender.send(ProgressEvent { kind, request_id: request_id.to_string(), timestamp: now_secs() });
    }
}

fn step_progress(sender: Option<&tokio::sync::mpsc::UnboundedSender<ProgressEvent>>, request_id: &str, step: PipelineStep, status: StepStatus, description: &str, details: Value) {
    emit(sender, request_id, ProgressEventKind::StepProgress { step, status, description: description.to_string(), details });
}

async fn with_timeout<T>(duration: Duration, step: PipelineStep, future: impl std::future::Future<Output = Result<T, DomainError>>) -> Result<T, DomainError> {
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::external_service_error(format!("{step:?}"), format!("timed out after {:?}", duration))),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), DomainError> {
    if cancel.is_cancelled() {
        Err(DomainError::Cancelled)
    } else {
        Ok(())
    }
}

/// Runs the full pipeline for one request (§4.10's state machine). `sender`
/// is `None` for plain JSON (non-streaming) callers; when present, every
/// state transition and the terminal event are pushed into it.
pub async fn run(
    request_id: String,
    request: Request,
    engines: &Engines,
    caches: &Caches,
    settings: &OrchestratorSettings,
    cancel: CancellationToken,
    sender: Option<tokio::sync::mpsc::UnboundedSender<ProgressEvent>>,
) -> Result<Value, DomainError> {
    let started_at = SystemTime::now();
    let mut run_state = PipelineRun::new(request_id.clone(), request.clone());
    let sink_sender = sender.clone().unwrap_or_else(|| tokio::sync::mpsc::unbounded_channel().0);
    let progress = ChannelProgressSink { request_id: request_id.clone(), sender: sink_sender };

    emit(sender.as_ref(), &request_id, ProgressEventKind::KeepAlive);

    let audio_ref = match &request.audio_source {
        diarization_domain::AudioSource::File(path) => path.clone(),
        diarization_domain::AudioSource::Url(url) => url.clone(),
    };

    // STEP 1: primary ASR.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step1Asr, StepStatus::Processing, "Transcribing primary audio", json!({}));
    let asr_timeout = if request.asr_engine == AsrEngine::SpeechmaticsBatch { settings.timeouts.asr_first_job } else { settings.timeouts.asr };
    let primary = match with_timeout(
        asr_timeout,
        PipelineStep::Step1Asr,
        cached_transcribe(caches.diarization.as_ref(), engines.transcriber.as_ref(), &audio_ref, &request.language, &request.speaker_hint, DiarizationMode::Mix, request.asr_engine, &progress),
    )
    .await
    {
        Ok(diarization) => diarization,
        Err(error) => {
            step_progress(sender.as_ref(), &request_id, PipelineStep::Step1Asr, StepStatus::Failed, &error.to_string(), json!({}));
            emit(sender.as_ref(), &request_id, ProgressEventKind::PipelineError { step: Some(PipelineStep::Step1Asr), reason: error.to_string() });
            return Err(error);
        }
    };
    let primary_result = only_result(&primary.recording);
    run_state.record_step(PipelineStep::Step1Asr, StepStatus::Completed, elapsed_secs(started_at), json!({"segments": primary_result.segments.len()}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step1Asr, StepStatus::Completed, "Primary transcription complete", json!({"segments": primary_result.segments.len()}));

    // STEP 1.5: optional LLM-assisted diarization pass. No vendor contract is
    // specified for this beyond "optional"; skipped unless a future engine
    // supplies one.
    run_state.record_step(PipelineStep::Step1_5LlmDiarization, StepStatus::Skipped, 0.0, json!({"reason": "no LLM diarization engine configured"}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step1_5LlmDiarization, StepStatus::Skipped, "LLM diarization pass skipped", json!({}));

    // STEP 2: separation.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step2Separation, StepStatus::Processing, "Separating speaker stems", json!({}));
    let separation_timeout = if request.pipeline_mode == SeparationMode::SpeechBrain { settings.timeouts.speechbrain_separation } else { settings.timeouts.separation };
    let debug_params = SeparationDebugParams::default();
    let separation = match with_timeout(
        separation_timeout,
        PipelineStep::Step2Separation,
        cached_separate(caches.separation.as_ref(), engines.separator.as_ref(), request.pipeline_mode, &audio_ref, &debug_params, None, &progress),
    )
    .await
    {
        Ok(output) => output,
        Err(error) => {
            step_progress(sender.as_ref(), &request_id, PipelineStep::Step2Separation, StepStatus::Failed, &error.to_string(), json!({}));
            emit(sender.as_ref(), &request_id, ProgressEventKind::PipelineError { step: Some(PipelineStep::Step2Separation), reason: error.to_string() });
            return Err(error);
        }
    };
    run_state.record_step(PipelineStep::Step2Separation, StepStatus::Completed, elapsed_secs(started_at), json!({"stems": separation.stems.len()}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step2Separation, StepStatus::Completed, "Separation complete", json!({"stems": separation.stems.len()}));

    // STEP 3: per-stem transcription + role classification + voice-track
    // aggregation, bounded fan-out, deterministic ordering by stem name.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step3StemTranscription, StepStatus::Processing, "Transcribing isolated stems", json!({}));
    let mut stems_sorted = separation.stems.clone();
    stems_sorted.sort_by(|a, b| a.name.as_str().cmp(b.name.as_str()));

    let mut stem_outcomes = Vec::with_capacity(stems_sorted.len());
    for chunk in stems_sorted.chunks(settings.max_stem_concurrency.max(1)) {
        let mut joinset = tokio::task::JoinSet::new();
        for stem in chunk.iter().cloned() {
            let transcriber = engines.transcriber.clone();
            let chat = engines.chat.clone();
            let role_cache = caches.role.clone();
            let diarization_cache = caches.diarization.clone();
            let language = request.language.clone();
            let model = settings.fast_model.clone();
            let timeout = settings.timeouts.asr;
            let asr_engine = request.asr_engine;
            joinset.spawn(async move {
                let sink = diarization_domain::NullProgressSink;
                let hint = SpeakerHint::Auto;
                let transcription = with_timeout(
                    timeout,
                    PipelineStep::Step3StemTranscription,
                    cached_transcribe(diarization_cache.as_ref(), transcriber.as_ref(), &stem.audio_ref, &language, &hint, DiarizationMode::Channel, asr_engine, &sink),
                )
                .await?;
                let result = only_result(&transcription.recording).clone();
                let transcript_text = result.segments.iter().map(|segment| segment.text.as_str()).collect::<Vec<_>>().join(" ");
                let analysis = role_classifier::classify(&transcript_text, &language, "fast", role_cache.as_ref(), chat.as_ref(), &model).await;
                Ok::<_, DomainError>((stem.name.clone(), analysis, result.segments, stem.audio_ref.clone(), transcript_text, transcription))
            });
        }
        while let Some(joined) = joinset.join_next().await {
            match joined {
                Ok(Ok(outcome)) => stem_outcomes.push(outcome),
                Ok(Err(error)) => warn!(%error, "stem transcription failed, excluding stem from voice tracks"),
                Err(join_error) => warn!(%join_error, "stem task panicked"),
            }
        }
    }
    stem_outcomes.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));

    let mut voice_track_segments: Vec<Segment> = Vec::new();
    let mut role_analyses: Vec<(SpeakerLabel, RoleAnalysis)> = Vec::new();
    let mut stem_segments_by_role: Vec<(SpeakerLabel, Role, Vec<Segment>)> = Vec::new();
    let mut voice_tracks: Vec<VoiceTrack> = Vec::new();
    for (speaker, analysis, segments, stem_audio_ref, transcript_text, transcription) in stem_outcomes {
        let aggregated = voice_track::aggregate_voice_track(&segments, &speaker);
        voice_track_segments.extend(aggregated.clone());
        stem_segments_by_role.push((speaker.clone(), analysis.role, aggregated));
        voice_tracks.push(VoiceTrack {
            speaker: speaker.clone(),
            audio_ref: stem_audio_ref,
            transcription,
            transcript_text,
            role_analysis: Ok(analysis.clone()),
        });
        role_analyses.push((speaker, analysis));
    }
    run_state.record_step(PipelineStep::Step3StemTranscription, StepStatus::Completed, elapsed_secs(started_at), json!({"voice_track_segments": voice_track_segments.len()}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step3StemTranscription, StepStatus::Completed, "Stem transcription complete", json!({"voice_track_segments": voice_track_segments.len()}));

    // STEP 4: programmatic merge.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step4Merge, StepStatus::Processing, "Merging primary with voice tracks", json!({}));
    let merge_outcome = merger::merge(&primary_result.segments, &voice_track_segments);
    run_state.record_step(PipelineStep::Step4Merge, StepStatus::Completed, elapsed_secs(started_at), merge_outcome.stats.clone());
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step4Merge, StepStatus::Completed, "Merge complete", merge_outcome.stats.clone());

    // STEP 5: markdown pipeline.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step5Markdown, StepStatus::Processing, "Building final transcript table", json!({}));
    let prompt_ctx = build_prompt_context(&merge_outcome.segments, &stem_segments_by_role, &role_analyses, request.ground_truth.as_deref());
    let role_by_speaker: Vec<(SpeakerLabel, Role)> = role_analyses.iter().map(|(speaker, analysis)| (speaker.clone(), analysis.role)).collect();
    let markdown_outcome = run_markdown_pipeline(
        &prompt_ctx,
        &merge_outcome.segments,
        &role_by_speaker,
        engines.chat.as_ref(),
        caches.llm.as_ref(),
        &settings.fast_model,
        &audio_ref,
        settings.demo_llm_mode.as_deref(),
        settings.use_multi_step_markdown,
        false,
    )
    .await;
    run_state.record_step(PipelineStep::Step5Markdown, StepStatus::Completed, elapsed_secs(started_at), json!({"rows": markdown_outcome.rows.len(), "mode": markdown_outcome.mode}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step5Markdown, StepStatus::Completed, "Final transcript table built", json!({"rows": markdown_outcome.rows.len()}));

    // STEP 6: text-analysis classification.
    check_cancelled(&cancel)?;
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step6TextAnalysis, StepStatus::Processing, "Tagging segments", json!({}));
    let all_stem_segments: Vec<Segment> = stem_segments_by_role.iter().flat_map(|(_, _, segments)| segments.clone()).collect();
    let text_analysis_result = text_analysis::classify(
        settings.text_analysis_mode,
        &markdown_outcome.rows,
        &merge_outcome.segments,
        &all_stem_segments,
        engines.chat.as_ref(),
        caches.llm.as_ref(),
        &settings.fast_model,
        &audio_ref,
    )
    .await;
    run_state.record_step(PipelineStep::Step6TextAnalysis, StepStatus::Completed, elapsed_secs(started_at), json!({"entries": text_analysis_result.entries.len()}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step6TextAnalysis, StepStatus::Completed, "Tagging complete", json!({}));

    // STEP 7: ground-truth scoring.
    let ground_truth_metrics = scoring::score(&markdown_outcome.rows, &primary_result.segments, request.ground_truth.as_deref());
    run_state.record_step(PipelineStep::Step7Scoring, StepStatus::Completed, elapsed_secs(started_at), json!({"has_ground_truth": ground_truth_metrics.is_some()}));
    step_progress(sender.as_ref(), &request_id, PipelineStep::Step7Scoring, StepStatus::Completed, "Scoring complete", json!({}));

    run_state.artifacts = PipelineArtifacts {
        primary_diarization: Some(primary.clone()),
        gemini_diarization: None,
        separation_speakers: Some(separation.stems.iter().map(|stem| stem.name.clone()).collect()),
        voice_tracks: voice_tracks.clone(),
        text_analysis: Some(text_analysis_result.clone()),
        ground_truth_metrics: ground_truth_metrics.clone(),
    };

    let payload = sanitized_payload(
        &request_id,
        &request,
        &primary,
        &merge_outcome.segments,
        &markdown_outcome,
        &separation,
        &text_analysis_result,
        &ground_truth_metrics,
        &voice_tracks,
        &run_state,
        elapsed_secs(started_at),
    );
    emit(sender.as_ref(), &request_id, ProgressEventKind::FinalResult { payload: payload.clone() });

    Ok(payload)
}

fn only_result(recording: &Recording) -> &ServiceResult {
    recording.results.values().next().expect("a freshly produced Diarization always has exactly one result")
}

fn elapsed_secs(since: SystemTime) -> f64 {
    since.elapsed().map(|d| d.as_secs_f64()).unwrap_or(0.0)
}

/// Assembles the final response, keeping only the fields §4.10 whitelists —
/// everything else (streaming internals, raw stderr, absolute temp paths)
/// never reaches the client.
#[allow(clippy::too_many_arguments)]
fn sanitized_payload(
    request_id: &str,
    request: &Request,
    primary: &Diarization,
    corrected_segments: &[Segment],
    markdown_outcome: &crate::markdown::MarkdownOutcome,
    separation: &diarization_domain::SeparationOutput,
    text_analysis_result: &diarization_domain::TextAnalysisResult,
    ground_truth_metrics: &Option<diarization_domain::GroundTruthMetrics>,
    voice_tracks: &[VoiceTrack],
    run_state: &PipelineRun,
    total_duration: f64,
) -> Value {
    json!({
        "request_id": request_id,
        "pipeline_mode": request.pipeline_mode,
        "primary_diarization": primary,
        "corrected_diarization": corrected_segments,
        "markdown_table": markdown_outcome.markdown,
        "text_analysis": text_analysis_result,
        "ground_truth_metrics": ground_truth_metrics,
        "separation": { "speakers": separation.stems.iter().map(|stem| stem.name.as_str().to_string()).collect::<Vec<_>>() },
        "voice_tracks": voice_tracks,
        "steps": run_state.step_states,
        "total_duration": total_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diarization_domain::{AudioSource, CacheLookup, ChatRequest, LlmMode, ProgressSink, Stem};

    struct NullCache;
    #[async_trait]
    impl CacheStore for NullCache {
        async fn get(&self, _key: &str) -> CacheLookup {
            CacheLookup::Miss
        }
        async fn put(&self, _key: &str, _payload: &Value) {}
        async fn invalidate_all(&self) {}
        async fn export_all(&self) -> Vec<(String, Value)> {
            Vec::new()
        }
    }

    struct StubTranscriber;
    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, audio_ref: &str, language: &str, _hint: &SpeakerHint, mode: DiarizationMode, _progress: &dyn ProgressSink) -> Result<Diarization, DomainError> {
            let speaker = if mode == DiarizationMode::Channel { SpeakerLabel::new(audio_ref) } else { SpeakerLabel::new("SPEAKER_00") };
            let segments = vec![Segment::new(speaker, "hello there", 0.0, 1.0, SegmentSource::Primary)];
            let result = diarization_domain::entity_test_support_service_result(segments);
            let mut results = std::collections::BTreeMap::new();
            results.insert("stub".to_string(), result);
            Ok(Diarization {
                recording: Recording { id: "rec".to_string(), name: audio_ref.to_string(), duration: 1.0, language: language.to_string(), speaker_count: 1, results },
                services_tested: ["stub".to_string()].into_iter().collect(),
            })
        }
    }

    struct StubSeparator;
    #[async_trait]
    impl Separator for StubSeparator {
        async fn separate(&self, _audio_ref: &str, _debug: &SeparationDebugParams, _progress: &dyn ProgressSink) -> Result<diarization_domain::SeparationOutput, DomainError> {
            Ok(diarization_domain::SeparationOutput {
                task_id: "task".to_string(),
                stems: vec![Stem { name: SpeakerLabel::new("SPEAKER_00"), audio_ref: "stem0".to_string(), is_background: false, format: "wav".to_string() }],
            })
        }
    }

    struct StubChat;
    #[async_trait]
    impl ChatModel for StubChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, DomainError> {
            Ok("{\"role\":\"client\",\"confidence\":0.8,\"summary\":\"ok\"}".to_string())
        }
    }

    fn engines() -> Engines {
        Engines { transcriber: Arc::new(StubTranscriber), separator: Arc::new(StubSeparator), chat: Arc::new(StubChat) }
    }

    fn caches() -> Caches {
        Caches { diarization: Arc::new(NullCache), separation: Arc::new(NullCache), llm: Arc::new(NullCache), role: Arc::new(NullCache) }
    }

    fn request() -> Request {
        Request {
            audio_source: AudioSource::File("call.wav".to_string()),
            language: "en".to_string(),
            speaker_hint: SpeakerHint::Auto,
            llm_mode: LlmMode::Fast,
            pipeline_mode: SeparationMode::AudioShake,
            asr_engine: AsrEngine::SpeechmaticsBatch,
            text_analysis_mode: TextAnalysisMode::Script,
            ground_truth: None,
        }
    }

    #[tokio::test]
    async fn full_pipeline_produces_a_sanitized_payload_with_whitelisted_fields() {
        let payload = run("req-1".to_string(), request(), &engines(), &caches(), &OrchestratorSettings::default(), CancellationToken::new(), None).await.unwrap();
        assert!(payload.get("markdown_table").is_some());
        assert!(payload.get("corrected_diarization").is_some());
        assert!(payload.get("ground_truth_metrics").unwrap().is_null());
        assert_eq!(payload.get("request_id").unwrap(), "req-1");
    }

    #[tokio::test]
    async fn cancellation_before_start_short_circuits_with_cancelled_error() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = run("req-2".to_string(), request(), &engines(), &caches(), &OrchestratorSettings::default(), cancel, None).await;
        assert!(matches!(result, Err(DomainError::Cancelled)));
    }
}
