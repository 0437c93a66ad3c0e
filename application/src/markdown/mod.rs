pub(crate) mod llm;
mod multi_step;
mod prompt;
mod single_shot;
pub(crate) mod table;

pub use prompt::{build_prompt_context, PromptContext};
pub use table::render_table;

use diarization_domain::{CacheStore, ChatModel, Role, Segment, SpeakerLabel};
use diarization_segment_utils::MarkdownRow;

pub struct MarkdownOutcome {
    pub rows: Vec<MarkdownRow>,
    pub markdown: String,
    pub mode: &'static str,
    pub ground_truth_note: Option<String>,
}

/// Entry point for the Markdown Pipeline (§4.7): dispatches to the
/// single-shot or multi-step mode, then (when a reference transcript was
/// supplied) runs the non-mutating ground-truth note as a final, separate
/// step regardless of which mode produced the table.
#[allow(clippy::too_many_arguments)]
pub async fn run_pipeline(
    ctx: &PromptContext,
    merged_segments: &[Segment],
    role_by_speaker: &[(SpeakerLabel, Role)],
    chat: &dyn ChatModel,
    cache: &dyn CacheStore,
    model: &str,
    base_name: &str,
    demo_mode: Option<&str>,
    use_multi_step: bool,
    verify: bool,
) -> MarkdownOutcome {
    let (rows, mode) = if use_multi_step {
        (multi_step::run(ctx, merged_segments, role_by_speaker, chat, cache, model, base_name, demo_mode, verify).await, "multi-step")
    } else {
        (single_shot::run(ctx, merged_segments, role_by_speaker, chat, cache, model, base_name, demo_mode, verify).await, "single-shot")
    };

    let markdown = table::render_table(&rows);
    let ground_truth_note = multi_step::ground_truth_note(ctx, chat, cache, model, base_name, demo_mode, &markdown).await;

    MarkdownOutcome { rows, markdown, mode, ground_truth_note }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diarization_domain::{CacheLookup, ChatRequest, DomainError, SegmentSource, SpeakerLabel};

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
            Err(DomainError::external_service_error("test", "down"))
        }
    }

    #[tokio::test]
    async fn pipeline_falls_back_to_deterministic_table_in_both_modes_when_llm_is_unavailable() {
        let segments = vec![Segment::new(SpeakerLabel::new("SPEAKER_00"), "hello there", 0.0, 1.0, SegmentSource::Primary)];
        let ctx = build_prompt_context(&segments, &[], &[], None);

        let single = run_pipeline(&ctx, &segments, &[], &FailingChat, &NullCache, "gpt", "call", None, false, false).await;
        assert_eq!(single.rows.len(), 1);
        assert_eq!(single.mode, "single-shot");

        let multi = run_pipeline(&ctx, &segments, &[], &FailingChat, &NullCache, "gpt", "call", None, true, false).await;
        assert_eq!(multi.rows.len(), 1);
        assert_eq!(multi.mode, "multi-step");
    }
}
