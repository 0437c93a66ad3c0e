use diarization_domain::{CacheStore, ChatModel, ChatRequest, Segment, TextAnalysisEntry, TextAnalysisMode, TextAnalysisResult, TextAnalysisTag};
use diarization_segment_utils::{jaccard_similarity, normalize_text, overlap_share_of_shorter, ranges_overlap, MarkdownRow};

use crate::json_salvage::salvage_json;
use crate::markdown::llm::cached_chat;

const TIME_WINDOW_MIN_OVERLAP_SHARE: f64 = 0.3;
const TOKEN_OVERLAP_MIN_JACCARD: f64 = 0.2;

/// Tags every row of the final table Green/Blue/Red against the primary
/// diarization and the per-stem transcripts (§4.8). Dispatches between the
/// deterministic script implementation and the LLM implementation, which
/// share the same output contract.
#[allow(clippy::too_many_arguments)]
pub async fn classify(
    mode: TextAnalysisMode,
    final_table: &[MarkdownRow],
    primary_segments: &[Segment],
    stem_segments: &[Segment],
    chat: &dyn ChatModel,
    cache: &dyn CacheStore,
    model: &str,
    base_name: &str,
) -> TextAnalysisResult {
    match mode {
        TextAnalysisMode::Script => classify_script(final_table, primary_segments, stem_segments),
        TextAnalysisMode::Llm => classify_llm(final_table, primary_segments, stem_segments, chat, cache, model, base_name).await,
    }
}

fn overlaps_enough(row: &MarkdownRow, candidate: &Segment) -> bool {
    ranges_overlap(row.start, row.end, candidate.start, candidate.end) && overlap_share_of_shorter(row.start, row.end, candidate.start, candidate.end) >= TIME_WINDOW_MIN_OVERLAP_SHARE
}

fn text_matches(a: &str, b: &str) -> bool {
    jaccard_similarity(&normalize_text(a), &normalize_text(b)) >= TOKEN_OVERLAP_MIN_JACCARD
}

fn found_in(row: &MarkdownRow, candidates: &[Segment]) -> bool {
    candidates.iter().any(|candidate| overlaps_enough(row, candidate) && text_matches(&row.text, &candidate.text))
}

pub fn classify_script(final_table: &[MarkdownRow], primary_segments: &[Segment], stem_segments: &[Segment]) -> TextAnalysisResult {
    let entries = final_table
        .iter()
        .map(|row| {
            let in_primary = found_in(row, primary_segments);
            let in_stem = found_in(row, stem_segments);
            let tag = match (in_primary, in_stem) {
                (true, true) => TextAnalysisTag::Green,
                (true, false) => TextAnalysisTag::Blue,
                (false, true) => TextAnalysisTag::Red,
                (false, false) => TextAnalysisTag::Green,
            };
            TextAnalysisEntry { segment_id: row.segment_id, tag }
        })
        .collect();
    TextAnalysisResult { entries }
}

async fn classify_llm(
    final_table: &[MarkdownRow],
    primary_segments: &[Segment],
    stem_segments: &[Segment],
    chat: &dyn ChatModel,
    cache: &dyn CacheStore,
    model: &str,
    base_name: &str,
) -> TextAnalysisResult {
    let primary_dialogue = primary_segments.iter().map(|segment| format!("{}: {}", segment.speaker.as_str(), segment.text)).collect::<Vec<_>>().join("\n");
    let stem_dialogue = stem_segments.iter().map(|segment| format!("{}: {}", segment.speaker.as_str(), segment.text)).collect::<Vec<_>>().join("\n");
    let table_text = final_table.iter().map(|row| format!("{} | {} | {}", row.segment_id, row.speaker, row.text)).collect::<Vec<_>>().join("\n");

    let request = ChatRequest {
        model: model.to_string(),
        system: "For each final-table row, decide whether its text is present in the primary diarization \
only (tag \"blue\"), present in the isolated per-stem dialogues only (tag \"red\"), or present in both \
(tag \"green\"). Respond with a JSON array of {segment_id, tag}."
            .to_string(),
        user: format!("Final table:\n{table_text}\n\nPrimary dialogue:\n{primary_dialogue}\n\nStem dialogues:\n{stem_dialogue}"),
        temperature: 0.0,
        reasoning_effort: None,
        stop: None,
    };

    let fallback = classify_script(final_table, primary_segments, stem_segments);
    match cached_chat(cache, chat, base_name, "fast", "text-analysis", None, request).await {
        Ok(reply) => match salvage_json(&reply) {
            Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                let entries: Vec<TextAnalysisEntry> = items
                    .iter()
                    .filter_map(|item| {
                        let segment_id = item.get("segment_id")?.as_u64()? as usize;
                        let tag = match item.get("tag")?.as_str()? {
                            "green" => TextAnalysisTag::Green,
                            "blue" => TextAnalysisTag::Blue,
                            "red" => TextAnalysisTag::Red,
                            _ => return None,
                        };
                        Some(TextAnalysisEntry { segment_id, tag })
                    })
                    .collect();
                if entries.len() == final_table.len() {
                    TextAnalysisResult { entries }
                } else {
                    fallback
                }
            }
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diarization_domain::{SegmentSource, SpeakerLabel};

    fn seg(speaker: &str, text: &str, start: f64, end: f64) -> Segment {
        Segment::new(SpeakerLabel::new(speaker), text, start, end, SegmentSource::Primary)
    }

    fn row(id: usize, text: &str, start: f64, end: f64) -> MarkdownRow {
        MarkdownRow { segment_id: id, speaker: "Agent".to_string(), text: text.to_string(), start, end }
    }

    #[test]
    fn tags_green_when_present_in_both_primary_and_stem() {
        let table = vec![row(0, "hello there how are you", 0.0, 2.0)];
        let primary = vec![seg("SPEAKER_00", "hello there how are you", 0.0, 2.0)];
        let stem = vec![seg("SPEAKER_00", "hello there how are you", 0.0, 2.0)];
        let result = classify_script(&table, &primary, &stem);
        assert_eq!(result.entries[0].tag, TextAnalysisTag::Green);
    }

    #[test]
    fn tags_blue_when_present_in_primary_only() {
        let table = vec![row(0, "crosstalk over another speaker", 0.0, 2.0)];
        let primary = vec![seg("SPEAKER_00", "crosstalk over another speaker", 0.0, 2.0)];
        let stem = vec![seg("SPEAKER_00", "completely unrelated words", 5.0, 6.0)];
        let result = classify_script(&table, &primary, &stem);
        assert_eq!(result.entries[0].tag, TextAnalysisTag::Blue);
    }

    #[test]
    fn tags_red_when_present_in_stem_only() {
        let table = vec![row(0, "clean isolated speech here", 0.0, 2.0)];
        let primary = vec![seg("SPEAKER_00", "garbled unrelated primary text", 10.0, 11.0)];
        let stem = vec![seg("SPEAKER_00", "clean isolated speech here", 0.0, 2.0)];
        let result = classify_script(&table, &primary, &stem);
        assert_eq!(result.entries[0].tag, TextAnalysisTag::Red);
    }
}
