//! Wires the concrete `infra-*` adapters and the three file caches into the
//! orchestrator, and exposes the axum app. The teacher's `setup/src/app.rs`
//! is the structural model: a small `Application` that owns `AppState` and a
//! `run` method; ours additionally implements [`EngineFactory`] since this
//! service picks its adapter per-request (`asr_engine`/`pipeline_mode`/
//! `llm_mode`) rather than once at process start (§9 "Dynamic dispatch over
//! pipeline mode").

use std::sync::Arc;
use std::time::Duration;

use diarization_application::orchestrator::{Caches, EngineFactory, Engines};
use diarization_cache::{FileCacheStore, NullCacheStore};
use diarization_configuration::RunConfig;
use diarization_domain::{AsrEngine, CacheStore, DomainError, Request};
use diarization_http::AppState;
use diarization_infra_asr::VendorHttpConfig;
use diarization_infra_separation::SeparationAdapterConfig;

/// Builds a fresh [`Engines`] handle per request from the live [`RunConfig`]
/// snapshot. Cheap: adapters are thin HTTP/subprocess clients, not
/// connection pools, so building one per request costs nothing that
/// matters against a multi-minute vendor call.
pub struct AdapterEngineFactory {
    config: Arc<RunConfig>,
}

impl AdapterEngineFactory {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }
}

impl EngineFactory for AdapterEngineFactory {
    fn build(&self, request: &Request) -> Result<Engines, DomainError> {
        let transcriber = diarization_infra_asr::build_transcriber(request.asr_engine, asr_vendor_config(&self.config, request.asr_engine)?)?;
        let separator = diarization_infra_separation::build_separator(request.pipeline_mode, separation_config(&self.config))?;
        let model = self.config.llm.model_for_mode(request.llm_mode);
        let chat = diarization_infra_llm::build_chat_model(
            request.llm_mode,
            format!("https://openrouter.ai/api/v1"),
            self.config.llm.openrouter_api_key.clone().unwrap_or_default(),
            self.config.llm.local_llm_base_url.clone().unwrap_or_else(|| "http://127.0.0.1:11434/v1".to_string()),
        );
        let _ = model; // resolved again per-call by the orchestrator via OrchestratorSettings
        Ok(Engines { transcriber, separator, chat })
    }
}

fn asr_vendor_config(config: &RunConfig, engine: AsrEngine) -> Result<VendorHttpConfig, DomainError> {
    match engine {
        AsrEngine::SpeechmaticsBatch => {
            let key = config.asr.speechmatics_api_key.clone().ok_or_else(|| DomainError::configuration("SPEECHMATICS_API_KEY is not set"))?;
            Ok(VendorHttpConfig::new("https://asr.api.speechmatics.com/v2", key).with_long_recording_timeout())
        }
        AsrEngine::AzureBatch | AsrEngine::AzureRealtime => {
            let key = config.asr.azure_speech_key.clone().ok_or_else(|| DomainError::configuration("AZURE_SPEECH_KEY is not set"))?;
            let region = config.asr.azure_speech_region.clone().ok_or_else(|| DomainError::configuration("AZURE_SPEECH_REGION is not set"))?;
            Ok(VendorHttpConfig::new(format!("https://{region}.api.cognitive.microsoft.com"), key))
        }
    }
}

fn separation_config(config: &RunConfig) -> SeparationAdapterConfig {
    SeparationAdapterConfig {
        audioshake_base_url: "https://groovy.audioshake.ai".to_string(),
        audioshake_api_key: config.separation.audioshake_api_key.clone().unwrap_or_default(),
        pyannote_script_path: "scripts/pyannote_separate.py".to_string(),
        speechbrain_script_path: "scripts/speechbrain_separate.py".to_string(),
        python_bin: "python3".to_string(),
    }
}

/// Opens (creating if needed) the four content-addressed caches under the
/// configured data directory (§4.1, §6 persisted state layout). LLM cache
/// TTL is disabled entirely when `LLM_CACHE_ENABLED=false` is read as "never
/// expire" rather than "don't cache", matching §4.1's explicit allowance.
pub fn build_caches(config: &RunConfig) -> Caches {
    let thirty_days = Duration::from_secs(30 * 24 * 60 * 60);
    let llm_ttl = if config.features.llm_cache_enabled { Some(thirty_days) } else { None };
    let separation: Arc<dyn CacheStore> = if config.features.separation_cache_enabled {
        Arc::new(FileCacheStore::new(config.data_dirs.separation_cache.clone(), Some(thirty_days)))
    } else {
        Arc::new(NullCacheStore)
    };
    Caches {
        diarization: Arc::new(FileCacheStore::new(config.data_dirs.diarization_cache.clone(), Some(thirty_days))),
        separation,
        llm: Arc::new(FileCacheStore::new(config.data_dirs.llm_cache.clone(), llm_ttl)),
        role: Arc::new(FileCacheStore::new(config.data_dirs.role_cache.clone(), Some(thirty_days))),
    }
}

/// Assembles the full [`AppState`] for one process lifetime's caches, but a
/// config/engine-factory pair that is rebuilt (see [`load_state`]) whenever
/// a caller wants the freshest env snapshot — e.g. between test runs.
pub fn build_state(config: RunConfig, max_concurrent_runs: usize) -> AppState {
    let config = Arc::new(config);
    let caches = Arc::new(build_caches(&config));
    let engine_factory: Arc<dyn EngineFactory> = Arc::new(AdapterEngineFactory::new(config.clone()));
    AppState::new(caches, engine_factory, config, max_concurrent_runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_speechmatics_key_is_a_configuration_error_not_a_panic() {
        let config = RunConfig::default();
        let err = asr_vendor_config(&config, AsrEngine::SpeechmaticsBatch).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn azure_requires_both_key_and_region() {
        let mut config = RunConfig::default();
        config.asr.azure_speech_key = Some("key".to_string());
        let err = asr_vendor_config(&config, AsrEngine::AzureBatch).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[tokio::test]
    async fn disabling_separation_cache_yields_a_store_that_never_hits() {
        let mut config = RunConfig::default();
        config.features.separation_cache_enabled = false;
        let caches = build_caches(&config);
        caches.separation.put("k", &serde_json::json!({"a": 1})).await;
        assert!(matches!(caches.separation.get("k").await, diarization_domain::CacheLookup::Miss));
    }
}
