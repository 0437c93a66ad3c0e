use std::path::PathBuf;

use async_trait::async_trait;
use diarization_domain::{
    DomainError, PipelineStep, ProgressSink, SeparationDebugParams, SeparationOutput, Separator, SpeakerLabel,
    Stem, StepStatus,
};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

#[derive(Deserialize)]
struct SubprocessResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    stems: Vec<SubprocessStem>,
}

#[derive(Deserialize)]
struct SubprocessStem {
    name: String,
    path: String,
    #[serde(default)]
    is_background: bool,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "wav".to_string()
}

/// Shared shape for the two local separation back-ends: both call out to a
/// Python script that prints one JSON object to stdout (§4.2 "local file").
struct LocalSeparationRunner {
    vendor: &'static str,
    script_path: PathBuf,
    python_bin: String,
}

impl LocalSeparationRunner {
    async fn run(&self, mut args: Vec<String>, progress: &dyn ProgressSink) -> Result<Vec<SubprocessStem>, DomainError> {
        args.insert(0, self.script_path.to_string_lossy().to_string());

        progress.emit(PipelineStep::Step2Separation, StepStatus::Processing, &format!("{} subprocess started", self.vendor), json!({}));

        let output = tokio::process::Command::new(&self.python_bin)
            .args(&args)
            .output()
            .await
            .map_err(|err| DomainError::external_service_error(self.vendor, format!("failed to launch subprocess: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(vendor = self.vendor, stderr = %stderr, "local separation subprocess failed");
            return Err(DomainError::external_service_error(self.vendor, format!("subprocess exited with {}: {stderr}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let parsed: SubprocessResponse = serde_json::from_str(&stdout)
            .map_err(|err| DomainError::parse(self.vendor, format!("failed to parse subprocess output: {err}")))?;

        if !parsed.success {
            let reason = parsed.error.unwrap_or_else(|| "unknown subprocess failure".to_string());
            return Err(DomainError::external_service_error(self.vendor, reason));
        }

        progress.emit(PipelineStep::Step2Separation, StepStatus::Completed, &format!("{} subprocess finished", self.vendor), json!({ "stem_count": parsed.stems.len() }));
        Ok(parsed.stems)
    }
}

fn stems_from(raw: Vec<SubprocessStem>, task_id: String) -> SeparationOutput {
    let stems = raw
        .into_iter()
        .enumerate()
        .map(|(index, stem)| Stem {
            name: SpeakerLabel::normalize(&stem.name, index),
            audio_ref: stem.path,
            is_background: stem.is_background,
            format: stem.format,
        })
        .collect();
    SeparationOutput { task_id, stems }
}

pub struct PyAnnoteAdapter {
    runner: LocalSeparationRunner,
}

impl PyAnnoteAdapter {
    pub fn new(script_path: impl Into<PathBuf>, python_bin: impl Into<String>) -> Self {
        Self {
            runner: LocalSeparationRunner {
                vendor: "pyannote",
                script_path: script_path.into(),
                python_bin: python_bin.into(),
            },
        }
    }
}

#[async_trait]
impl Separator for PyAnnoteAdapter {
    async fn separate(
        &self,
        audio_ref: &str,
        debug: &SeparationDebugParams,
        progress: &dyn ProgressSink,
    ) -> Result<SeparationOutput, DomainError> {
        let _ = debug;
        let args = vec!["--audio-path".to_string(), audio_ref.to_string()];
        let stems = self.runner.run(args, progress).await?;
        Ok(stems_from(stems, audio_ref.to_string()))
    }
}

pub struct SpeechBrainAdapter {
    runner: LocalSeparationRunner,
}

impl SpeechBrainAdapter {
    pub fn new(script_path: impl Into<PathBuf>, python_bin: impl Into<String>) -> Self {
        Self {
            runner: LocalSeparationRunner {
                vendor: "speechbrain",
                script_path: script_path.into(),
                python_bin: python_bin.into(),
            },
        }
    }
}

#[async_trait]
impl Separator for SpeechBrainAdapter {
    async fn separate(
        &self,
        audio_ref: &str,
        debug: &SeparationDebugParams,
        progress: &dyn ProgressSink,
    ) -> Result<SeparationOutput, DomainError> {
        let mut args = vec!["--audio-path".to_string(), audio_ref.to_string()];

        if let Some(chunk_seconds) = debug.chunk_seconds {
            args.push("--chunk-seconds".to_string());
            args.push(chunk_seconds.to_string());
        }
        if let Some(enabled) = debug.enable_spectral_gating {
            args.push("--spectral-gating".to_string());
            args.push(enabled.to_string());
        }
        if let Some(threshold) = debug.gate_threshold {
            args.push("--gate-threshold".to_string());
            args.push(threshold.to_string());
        }
        if let Some(alpha) = debug.gate_alpha {
            args.push("--gate-alpha".to_string());
            args.push(alpha.to_string());
        }

        let stems = self.runner.run(args, progress).await?;
        Ok(stems_from(stems, audio_ref.to_string()))
    }
}
