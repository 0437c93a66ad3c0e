pub mod openai_compatible;
pub mod sse_stream;

pub use openai_compatible::OpenAiCompatibleAdapter;

use std::sync::Arc;

use diarization_domain::{ChatModel, LlmMode};

/// Selects the remote or local back-end by `llm_mode` (§4.2): `local` talks
/// to the local OpenAI-compatible endpoint, every other mode talks remote.
pub fn build_chat_model(mode: LlmMode, remote_base_url: String, remote_api_key: String, local_base_url: String) -> Arc<dyn ChatModel> {
    if mode.is_local() {
        Arc::new(OpenAiCompatibleAdapter::local(local_base_url))
    } else {
        Arc::new(OpenAiCompatibleAdapter::remote(remote_base_url, remote_api_key))
    }
}
