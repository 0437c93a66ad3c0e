pub mod azure;
pub mod http_client;
pub mod mapping;
pub mod speechmatics;

use std::sync::Arc;

use diarization_domain::{AsrEngine, DomainError, Transcriber};

pub use http_client::VendorHttpConfig;

/// Builds the `Transcriber` for a given engine selection (§4.2). Each engine
/// gets its own `VendorHttpConfig` (distinct base URL / key) supplied by the
/// caller's configuration layer.
pub fn build_transcriber(engine: AsrEngine, config: VendorHttpConfig) -> Result<Arc<dyn Transcriber>, DomainError> {
    let transcriber: Arc<dyn Transcriber> = match engine {
        AsrEngine::SpeechmaticsBatch => Arc::new(speechmatics::SpeechmaticsBatchAdapter::new(config)?),
        AsrEngine::AzureBatch => Arc::new(azure::AzureBatchAdapter::new(config)?),
        AsrEngine::AzureRealtime => Arc::new(azure::AzureRealtimeAdapter::new(config)?),
    };
    Ok(transcriber)
}
