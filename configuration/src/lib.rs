//! Ambient configuration for the orchestrator binary (SPEC_FULL §4.0/§9).
//!
//! The teacher leans on an internal `rustycog-config` crate for env-backed
//! config structs with a "load fresh" entry point; that crate is not part of
//! this repo's dependency graph, so this crate reaches for the ecosystem's
//! direct replacement, the `config` crate, and keeps the same shape: a
//! `RunConfig` snapshot built fresh on every call, never cached in a
//! long-lived mutable singleton (§9 "Global mutable state" — cache key
//! fingerprints must see the live model ID at submission time).

use std::time::Duration;

use diarization_domain::DomainError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: default_log_filter() }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Vendor credentials/base-URLs for the three ASR engines (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsrVendorConfig {
    pub speechmatics_api_key: Option<String>,
    pub azure_speech_key: Option<String>,
    pub azure_speech_region: Option<String>,
}

/// Vendor credentials for the separation back-ends (§6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeparationVendorConfig {
    pub audioshake_api_key: Option<String>,
    pub huggingface_token: Option<String>,
}

/// Chat-LLM back-end selection and per-mode model IDs (§6). Model IDs are
/// read fresh on every request precisely so the LLM cache key reflects
/// whichever model is live right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmVendorConfig {
    pub openrouter_api_key: Option<String>,
    pub google_gemini_api_key: Option<String>,
    pub local_llm_base_url: Option<String>,
    pub local_llm_api_key: Option<String>,
    pub local_llm_model: Option<String>,
    pub fast_model_id: Option<String>,
    pub smart_model_id: Option<String>,
    pub smart_2_model_id: Option<String>,
    pub test_model_id: Option<String>,
    pub test2_model_id: Option<String>,
}

impl LlmVendorConfig {
    pub fn model_for_mode(&self, mode: diarization_domain::LlmMode) -> String {
        use diarization_domain::LlmMode::*;
        match mode {
            Local => self.local_llm_model.clone(),
            Fast => self.fast_model_id.clone(),
            Smart => self.smart_model_id.clone(),
            Smart2 => self.smart_2_model_id.clone(),
            Test => self.test_model_id.clone(),
            Test2 => self.test2_model_id.clone(),
            Gemini25 => self.google_gemini_api_key.clone().map(|_| "gemini-2.5".to_string()),
        }
        .unwrap_or_else(|| "gpt-4o-mini".to_string())
    }
}

/// Feature flags and directory layout (§6, §7 persisted state layout).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub llm_cache_enabled: bool,
    #[serde(default = "default_true")]
    pub separation_cache_enabled: bool,
    #[serde(default)]
    pub text_analysis_mode: Option<String>,
    #[serde(default)]
    pub use_multi_step_markdown: bool,
    #[serde(default)]
    pub demo_llm_mode: Option<String>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            llm_cache_enabled: true,
            separation_cache_enabled: true,
            text_analysis_mode: None,
            use_multi_step_markdown: false,
            demo_llm_mode: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct DataDirs {
    pub uploads: String,
    pub diarization_cache: String,
    pub separation_cache: String,
    pub llm_cache: String,
    pub role_cache: String,
    pub temp_uploads: String,
}

impl Default for DataDirs {
    fn default() -> Self {
        Self {
            uploads: "uploads".to_string(),
            diarization_cache: "cache/diarization_results".to_string(),
            separation_cache: "cache/separation".to_string(),
            llm_cache: "cache/llm_responses".to_string(),
            role_cache: "cache/role_analysis".to_string(),
            temp_uploads: "temp_uploads".to_string(),
        }
    }
}

/// One immutable snapshot of everything the orchestrator needs for a single
/// request (§9 `RunConfig`). Built fresh by [`load_config_fresh`]; never
/// shared as a long-lived mutable singleton.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub asr: AsrVendorConfig,
    pub separation: SeparationVendorConfig,
    pub llm: LlmVendorConfig,
    pub features: FeatureFlags,
    pub data_dirs: DataDirs,
}

impl RunConfig {
    pub fn asr_call_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

fn env_opt(cfg: &config::Config, key: &str) -> Option<String> {
    cfg.get_string(key).ok().filter(|value| !value.is_empty())
}

fn env_bool(cfg: &config::Config, key: &str, default: bool) -> bool {
    cfg.get_bool(key).unwrap_or(default)
}

/// Reads recognized env keys (§6) fresh from the process environment. Called
/// once per incoming request so model IDs and feature flags are always
/// current, never memoized — the counterpart to the teacher's
/// `rustycog_config::load_config_fresh`.
pub fn load_config_fresh() -> Result<RunConfig, DomainError> {
    let cfg = config::Config::builder()
        .add_source(config::Environment::default())
        .build()
        .map_err(|err| DomainError::configuration(format!("failed to read environment configuration: {err}")))?;

    let server = ServerConfig {
        host: env_opt(&cfg, "HOST").unwrap_or_else(default_host),
        port: cfg.get_int("PORT").ok().and_then(|value| u16::try_from(value).ok()).unwrap_or_else(default_port),
    };

    let logging = LoggingConfig {
        filter: env_opt(&cfg, "RUST_LOG").unwrap_or_else(default_log_filter),
    };

    let asr = AsrVendorConfig {
        speechmatics_api_key: env_opt(&cfg, "SPEECHMATICS_API_KEY"),
        azure_speech_key: env_opt(&cfg, "AZURE_SPEECH_KEY"),
        azure_speech_region: env_opt(&cfg, "AZURE_SPEECH_REGION"),
    };

    let separation = SeparationVendorConfig {
        audioshake_api_key: env_opt(&cfg, "AUDIOSHAKE_API_KEY"),
        huggingface_token: env_opt(&cfg, "HUGGINGFACE_TOKEN"),
    };

    let llm = LlmVendorConfig {
        openrouter_api_key: env_opt(&cfg, "OPENROUTER_API_KEY"),
        google_gemini_api_key: env_opt(&cfg, "GOOGLE_GEMINI_API_KEY"),
        local_llm_base_url: env_opt(&cfg, "LOCAL_LLM_BASE_URL"),
        local_llm_api_key: env_opt(&cfg, "LOCAL_LLM_API_KEY"),
        local_llm_model: env_opt(&cfg, "LOCAL_LLM_MODEL"),
        fast_model_id: env_opt(&cfg, "FAST_MODEL_ID"),
        smart_model_id: env_opt(&cfg, "SMART_MODEL_ID"),
        smart_2_model_id: env_opt(&cfg, "SMART_2_MODEL_ID"),
        test_model_id: env_opt(&cfg, "TEST_MODEL_ID"),
        test2_model_id: env_opt(&cfg, "TEST2_MODEL_ID"),
    };

    let features = FeatureFlags {
        llm_cache_enabled: env_bool(&cfg, "LLM_CACHE_ENABLED", true),
        separation_cache_enabled: env_bool(&cfg, "SEPARATION_CACHE_ENABLED", true),
        text_analysis_mode: env_opt(&cfg, "TEXT_ANALYSIS_MODE"),
        use_multi_step_markdown: env_bool(&cfg, "USE_MULTI_STEP_MARKDOWN", false),
        demo_llm_mode: env_opt(&cfg, "DEMO_LLM_MODE"),
    };

    Ok(RunConfig { server, logging, asr, separation, llm, features, data_dirs: DataDirs::default() })
}

/// Initializes the global `tracing` subscriber once at process start, the
/// direct replacement for the teacher's `rustycog_logger::setup_logging`.
pub fn setup_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&logging.filter).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_deterministic() {
        let server = ServerConfig::default();
        assert_eq!(server.port, 8080);
        assert_eq!(server.host, "0.0.0.0");
    }

    #[test]
    fn model_for_mode_falls_back_when_unset() {
        let llm = LlmVendorConfig::default();
        assert_eq!(llm.model_for_mode(diarization_domain::LlmMode::Fast), "gpt-4o-mini");
    }

    #[test]
    fn model_for_mode_prefers_configured_id() {
        let llm = LlmVendorConfig { fast_model_id: Some("custom-fast".to_string()), ..Default::default() };
        assert_eq!(llm.model_for_mode(diarization_domain::LlmMode::Fast), "custom-fast");
    }

    #[test]
    fn load_config_fresh_never_panics_on_empty_environment() {
        let config = load_config_fresh().expect("config should always load, even with no vendor keys set");
        assert!(config.server.port > 0);
    }
}
