use diarization_domain::{CacheStore, ChatModel, ChatRequest, Role, Segment, SpeakerLabel};
use diarization_segment_utils::MarkdownRow;

use super::llm::cached_chat;
use super::prompt::{single_shot_prompt, single_shot_system_prompt, verification_prompt, verification_system_prompt, PromptContext};
use super::table::{deterministic_table_from_segments, parse_table, post_process, render_table};

const MERGE_MAX_GAP_SECONDS: f64 = 2.0;

#[allow(clippy::too_many_arguments)]
pub async fn run(
    ctx: &PromptContext,
    merged_segments: &[Segment],
    role_by_speaker: &[(SpeakerLabel, Role)],
    chat: &dyn ChatModel,
    cache: &dyn CacheStore,
    model: &str,
    base_name: &str,
    demo_mode: Option<&str>,
    verify: bool,
) -> Vec<MarkdownRow> {
    let first_request = ChatRequest {
        model: model.to_string(),
        system: single_shot_system_prompt(),
        user: single_shot_prompt(ctx),
        temperature: 0.0,
        reasoning_effort: None,
        stop: None,
    };

    let mut table_text = match cached_chat(cache, chat, base_name, "fast", "markdown-fixes", demo_mode, first_request).await {
        Ok(text) => text,
        Err(_) => return post_process(deterministic_table_from_segments(merged_segments, role_by_speaker), MERGE_MAX_GAP_SECONDS),
    };

    let mut rows = parse_table(&table_text);
    if rows.is_empty() {
        return post_process(deterministic_table_from_segments(merged_segments, role_by_speaker), MERGE_MAX_GAP_SECONDS);
    }

    if verify {
        let verify_request = ChatRequest {
            model: model.to_string(),
            system: verification_system_prompt(),
            user: verification_prompt(ctx, &table_text),
            temperature: 0.0,
            reasoning_effort: None,
            stop: None,
        };
        if let Ok(verified_text) = cached_chat(cache, chat, base_name, "fast", "markdown-verify", demo_mode, verify_request).await {
            let verified_rows = parse_table(&verified_text);
            if !verified_rows.is_empty() {
                table_text = verified_text;
                rows = verified_rows;
            }
        }
    }

    let _ = table_text;
    post_process(rows, MERGE_MAX_GAP_SECONDS)
}

#[allow(dead_code)]
pub(crate) fn render_for_test(rows: &[MarkdownRow]) -> String {
    render_table(rows)
}
