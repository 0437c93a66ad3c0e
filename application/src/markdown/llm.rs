use diarization_cache::llm_key;
use diarization_domain::{CacheStore, ChatModel, ChatRequest, DomainError};

/// Runs one LLM call behind the shared `diarization_cache::llm_key` scheme,
/// handling the `EmptyContent` reasoning-field fallback (§4.2, §4.7) and the
/// local-mode "probe the fast-mode cache first" rule: a local model is
/// usually *worse* than the remote fast model, so if a fast-mode answer for
/// this exact prompt is already cached, reuse it instead of spending a local
/// call on a question already answered well.
#[allow(clippy::too_many_arguments)]
pub async fn cached_chat(
    cache: &dyn CacheStore,
    chat: &dyn ChatModel,
    base_name: &str,
    mode: &str,
    variant: &str,
    demo_mode: Option<&str>,
    request: ChatRequest,
) -> Result<String, DomainError> {
    let key = llm_key(base_name, &request.user, &request.model, mode, variant, demo_mode);

    if demo_mode == Some("local") {
        let fast_key = llm_key(base_name, &request.user, &request.model, "fast", variant, None);
        if let Some(hit) = cache.get(&fast_key).await.into_hit() {
            if let Some(text) = hit.as_str() {
                return Ok(text.to_string());
            }
        }
    }

    if let Some(hit) = cache.get(&key).await.into_hit() {
        if let Some(text) = hit.as_str() {
            return Ok(text.to_string());
        }
    }

    match chat.chat(request).await {
        Ok(content) => {
            cache.put(&key, &serde_json::json!(content)).await;
            Ok(content)
        }
        Err(DomainError::EmptyContent { reasoning_fallback: Some(fallback), .. }) => {
            cache.put(&key, &serde_json::json!(fallback)).await;
            Ok(fallback)
        }
        Err(other) => Err(other),
    }
}
