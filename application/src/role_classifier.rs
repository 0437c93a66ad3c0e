use diarization_cache::role_analysis_key;
use diarization_domain::{CacheStore, ChatModel, ChatRequest, Role, RoleAnalysis};

use crate::json_salvage::salvage_json;

const SYSTEM_PROMPT: &str = "You are a call classification assistant. Given a transcript of one speaker's \
side of a two-party call, decide whether this speaker is the operator (Agent) or the client. \
Respond with strict JSON: {\"role\": \"operator\"|\"client\", \"confidence\": 0.0-1.0, \"summary\": \"...\"}. \
No prose outside the JSON object.";

const HEURISTIC_MARKERS: [&str; 3] = ["help", "can i", "how can"];

/// Classifies one stem's transcript as Agent or Client (§4.4). Caches the
/// LLM result for 30 days; heuristic fallbacks are never cached, since they
/// are much less reliable and a later retry with a healthy LLM should not
/// be blocked by a stale heuristic guess.
pub async fn classify(
    transcript: &str,
    language: &str,
    mode: &str,
    cache: &dyn CacheStore,
    chat: &dyn ChatModel,
    model: &str,
) -> RoleAnalysis {
    if transcript.trim().is_empty() {
        return RoleAnalysis {
            role: Role::Unknown,
            confidence: 0.0,
            summary: "No speech detected.".to_string(),
        };
    }

    let key = role_analysis_key(transcript, language, mode);
    if let Some(cached) = cache.get(&key).await.into_hit() {
        if let Some(analysis) = parse_role_analysis(&cached) {
            return analysis;
        }
    }

    let request = ChatRequest {
        model: model.to_string(),
        system: SYSTEM_PROMPT.to_string(),
        user: transcript.to_string(),
        temperature: 0.0,
        reasoning_effort: None,
        stop: None,
    };

    match chat.chat(request).await {
        Ok(reply) => match salvage_json(&reply).and_then(|value| parse_role_analysis(&value)) {
            Some(analysis) => {
                cache
                    .put(
                        &key,
                        &serde_json::json!({
                            "role": role_to_classifier_label(analysis.role),
                            "confidence": analysis.confidence,
                            "summary": analysis.summary,
                        }),
                    )
                    .await;
                analysis
            }
            None => heuristic_fallback(transcript),
        },
        Err(_) => heuristic_fallback(transcript),
    }
}

fn heuristic_fallback(transcript: &str) -> RoleAnalysis {
    let lowered = transcript.to_ascii_lowercase();
    let role = if HEURISTIC_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        Role::Agent
    } else {
        Role::Client
    };
    RoleAnalysis {
        role,
        confidence: 0.5,
        summary: "Heuristic classification (LLM unavailable).".to_string(),
    }
}

fn parse_role_analysis(value: &serde_json::Value) -> Option<RoleAnalysis> {
    let role_label = value.get("role")?.as_str()?;
    let confidence = value.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let summary = value.get("summary").and_then(|v| v.as_str()).unwrap_or_default().to_string();
    Some(RoleAnalysis { role: Role::from_classifier_label(role_label), confidence, summary })
}

fn role_to_classifier_label(role: Role) -> &'static str {
    match role {
        Role::Agent => "operator",
        Role::Client => "client",
        Role::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diarization_domain::{CacheLookup, DomainError};
    use std::sync::Mutex;

    struct NullCache;
    #[async_trait]
    impl CacheStore for NullCache {
        async fn get(&self, _key: &str) -> CacheLookup {
            CacheLookup::Miss
        }
        async fn put(&self, _key: &str, _payload: &serde_json::Value) {}
        async fn invalidate_all(&self) {}
        async fn export_all(&self) -> Vec<(String, serde_json::Value)> {
            Vec::new()
        }
    }

    struct FailingChat;
    #[async_trait]
    impl ChatModel for FailingChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, DomainError> {
            Err(DomainError::external_service_error("test", "boom"))
        }
    }

    struct ScriptedChat(Mutex<Vec<String>>);
    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(&self, _request: ChatRequest) -> Result<String, DomainError> {
            Ok(self.0.lock().unwrap().remove(0))
        }
    }

    #[tokio::test]
    async fn empty_transcript_short_circuits_without_calling_the_llm() {
        let analysis = classify("", "en", "fast", &NullCache, &FailingChat, "gpt").await;
        assert_eq!(analysis.role, Role::Unknown);
        assert_eq!(analysis.confidence, 0.0);
        assert_eq!(analysis.summary, "No speech detected.");
    }

    #[tokio::test]
    async fn falls_back_to_heuristic_when_llm_fails() {
        let analysis = classify("how can I help you today", "en", "fast", &NullCache, &FailingChat, "gpt").await;
        assert_eq!(analysis.role, Role::Agent);
        assert_eq!(analysis.confidence, 0.5);
    }

    #[tokio::test]
    async fn heuristic_defaults_to_client_without_markers() {
        let analysis = classify("I need a refund please", "en", "fast", &NullCache, &FailingChat, "gpt").await;
        assert_eq!(analysis.role, Role::Client);
    }

    #[tokio::test]
    async fn parses_fenced_json_from_llm_reply() {
        let chat = ScriptedChat(Mutex::new(vec!["```json\n{\"role\":\"operator\",\"confidence\":0.9,\"summary\":\"greets caller\"}\n```".to_string()]));
        let analysis = classify("thanks for calling support", "en", "fast", &NullCache, &chat, "gpt").await;
        assert_eq!(analysis.role, Role::Agent);
        assert_eq!(analysis.confidence, 0.9);
    }
}
