use axum::extract::{Multipart, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Json, Response};
use diarization_application::orchestrator::{self, Caches, OrchestratorSettings, StepTimeouts};
use diarization_domain::{AsrEngine, AudioSource, DomainError, LlmMode, Request, SeparationMode, SpeakerHint, TextAnalysisMode};
use tokio_util::sync::CancellationToken;

use crate::error::{map_domain_error, HttpError};
use crate::sse::progress_stream;
use crate::state::AppState;

/// One parsed `multipart/form-data` submission, before it becomes a
/// [`Request`] (spec.md §6 inbound contract).
#[derive(Default)]
struct RawSubmission {
    audio_bytes: Option<Vec<u8>>,
    audio_filename: Option<String>,
    url: Option<String>,
    language: Option<String>,
    speaker_count: Option<String>,
    mode: Option<String>,
    pipeline_mode: Option<String>,
    engine: Option<String>,
    text_analysis_mode: Option<String>,
    ground_truth: Option<String>,
}

pub async fn diarize_overlap(State(state): State<AppState>, headers: HeaderMap, mut multipart: Multipart) -> Response {
    let mut submission = RawSubmission::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => return HttpError::Validation { message: format!("invalid multipart payload: {err}") }.into_response(),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "audio" => {
                submission.audio_filename = field.file_name().map(str::to_string);
                submission.audio_bytes = match field.bytes().await {
                    Ok(bytes) => Some(bytes.to_vec()),
                    Err(err) => return HttpError::Validation { message: format!("failed to read audio field: {err}") }.into_response(),
                };
            }
            "url" => submission.url = field.text().await.ok(),
            "language" => submission.language = field.text().await.ok(),
            "speakerCount" => submission.speaker_count = field.text().await.ok(),
            "mode" => submission.mode = field.text().await.ok(),
            "pipelineMode" => submission.pipeline_mode = field.text().await.ok(),
            "engine" => submission.engine = field.text().await.ok(),
            "textAnalysisMode" => submission.text_analysis_mode = field.text().await.ok(),
            "groundTruth" => submission.ground_truth = field.text().await.ok(),
            _ => {}
        }
    }

    let request = match build_request(&state, submission).await {
        Ok(request) => request,
        Err(error) => return map_domain_error(error).into_response(),
    };

    let wants_stream = headers.get(axum::http::header::ACCEPT).and_then(|value| value.to_str().ok()).map(|value| value.contains("text/event-stream")).unwrap_or(false);

    let Ok(_permit) = state.admission.clone().acquire_owned().await else {
        return HttpError::Internal { message: "server shutting down".to_string() }.into_response();
    };

    let engines = match state.engine_factory.build(&request) {
        Ok(engines) => engines,
        Err(error) => return map_domain_error(error).into_response(),
    };
    let caches = Caches {
        diarization: state.caches.diarization.clone(),
        separation: state.caches.separation.clone(),
        llm: state.caches.llm.clone(),
        role: state.caches.role.clone(),
    };
    let settings = build_settings(&state, &request);
    let request_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();

    if wants_stream {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        let run_cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = _permit;
            let _ = orchestrator::run(request_id, request, &engines, &caches, &settings, run_cancel, Some(sender)).await;
        });
        progress_stream(receiver).into_response()
    } else {
        match orchestrator::run(request_id, request, &engines, &caches, &settings, cancel, None).await {
            Ok(payload) => Json(payload).into_response(),
            Err(error) => map_domain_error(error).into_response(),
        }
    }
}

async fn build_request(state: &AppState, submission: RawSubmission) -> Result<Request, DomainError> {
    let audio_source = if let Some(bytes) = submission.audio_bytes {
        let filename = submission.audio_filename.unwrap_or_else(|| "upload.wav".to_string());
        let sanitized = diarization_infra_common::sanitize_filename(&filename);
        let dest = format!("{}/{}", state.config.data_dirs.uploads, sanitized);
        tokio::fs::create_dir_all(&state.config.data_dirs.uploads).await.map_err(|err| DomainError::internal_error(format!("failed to create uploads directory: {err}")))?;
        tokio::fs::write(&dest, &bytes).await.map_err(|err| DomainError::internal_error(format!("failed to persist uploaded audio: {err}")))?;
        AudioSource::File(dest)
    } else if let Some(url) = submission.url.filter(|url| !url.trim().is_empty()) {
        AudioSource::Url(url)
    } else {
        return Err(DomainError::validation("request must include either an `audio` file or a `url` field"));
    };

    let language = submission.language.unwrap_or_else(|| "auto".to_string());

    let speaker_hint = match submission.speaker_count.as_deref() {
        None | Some("auto") | Some("") => SpeakerHint::Auto,
        Some(raw) => raw.parse::<u32>().map(SpeakerHint::Count).map_err(|_| DomainError::validation(format!("invalid speakerCount `{raw}`")))?,
    };

    let llm_mode = parse_enum_field::<LlmMode>(submission.mode.as_deref(), "mode")?;
    let pipeline_mode = parse_enum_field::<SeparationMode>(submission.pipeline_mode.as_deref(), "pipelineMode")?;
    let asr_engine = parse_enum_field::<AsrEngine>(submission.engine.as_deref(), "engine")?;
    let text_analysis_mode = parse_enum_field::<TextAnalysisMode>(submission.text_analysis_mode.as_deref(), "textAnalysisMode")?;

    Ok(Request {
        audio_source,
        language,
        speaker_hint,
        llm_mode,
        pipeline_mode,
        asr_engine,
        text_analysis_mode,
        ground_truth: submission.ground_truth.filter(|value| !value.trim().is_empty()),
    })
}

fn parse_enum_field<T: serde::de::DeserializeOwned>(raw: Option<&str>, field_name: &str) -> Result<T, DomainError> {
    let raw = raw.ok_or_else(|| DomainError::validation(format!("missing required field `{field_name}`")))?;
    serde_json::from_value(serde_json::Value::String(raw.to_string())).map_err(|_| DomainError::validation(format!("invalid value `{raw}` for field `{field_name}`")))
}

fn build_settings(state: &AppState, request: &Request) -> OrchestratorSettings {
    let model = state.config.llm.model_for_mode(request.llm_mode);
    let text_analysis_mode = request.text_analysis_mode;
    OrchestratorSettings {
        fast_model: model,
        use_multi_step_markdown: state.config.features.use_multi_step_markdown || request.llm_mode.is_local(),
        text_analysis_mode,
        demo_llm_mode: state.config.features.demo_llm_mode.clone(),
        max_stem_concurrency: 4,
        timeouts: StepTimeouts::default(),
    }
}

