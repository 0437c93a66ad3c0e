pub mod audioshake;
pub mod local_subprocess;

pub use audioshake::AudioShakeAdapter;
pub use local_subprocess::{PyAnnoteAdapter, SpeechBrainAdapter};

use std::sync::Arc;

use diarization_domain::{DomainError, SeparationMode, Separator};

/// Per-mode construction arguments; only the fields relevant to the chosen
/// mode are consulted (§4.2 "modes: AudioShake ... PyAnnote ... SpeechBrain").
pub struct SeparationAdapterConfig {
    pub audioshake_base_url: String,
    pub audioshake_api_key: String,
    pub pyannote_script_path: String,
    pub speechbrain_script_path: String,
    pub python_bin: String,
}

pub fn build_separator(mode: SeparationMode, config: SeparationAdapterConfig) -> Result<Arc<dyn Separator>, DomainError> {
    let separator: Arc<dyn Separator> = match mode {
        SeparationMode::AudioShake => Arc::new(AudioShakeAdapter::new(config.audioshake_base_url, config.audioshake_api_key)?),
        SeparationMode::PyAnnote => Arc::new(PyAnnoteAdapter::new(config.pyannote_script_path, config.python_bin)),
        SeparationMode::SpeechBrain => Arc::new(SpeechBrainAdapter::new(config.speechbrain_script_path, config.python_bin)),
    };
    Ok(separator)
}
