use std::collections::BTreeMap;

use diarization_domain::{Role, RoleAnalysis, Segment, SpeakerLabel};
use serde_json::{json, Value};

/// Everything the markdown-pipeline prompts are templated from (§4.7). Built
/// once per request and shared by both the single-shot and multi-step modes.
pub struct PromptContext {
    pub primary_dialogue: String,
    pub raw_speaker_dialogues: BTreeMap<String, String>,
    pub stem_dialogues: Vec<(String, String)>,
    pub role_guidance: Value,
    pub segment_timestamps: Value,
    pub ground_truth: Option<String>,
}

fn is_two_party_raw_speaker(label: &SpeakerLabel) -> bool {
    matches!(label.as_str(), "SPEAKER_00" | "SPEAKER_01")
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::Agent => "Agent",
        Role::Client => "Client",
        Role::Unknown => "Unknown",
    }
}

pub fn build_prompt_context(
    primary_segments: &[Segment],
    stems: &[(SpeakerLabel, Role, Vec<Segment>)],
    role_analyses: &[(SpeakerLabel, RoleAnalysis)],
    ground_truth: Option<&str>,
) -> PromptContext {
    let primary_dialogue = primary_segments.iter().map(|segment| format!("{}: {}", segment.speaker.as_str(), segment.text)).collect::<Vec<_>>().join("\n");

    let mut raw_speaker_dialogues: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for segment in primary_segments {
        if is_two_party_raw_speaker(&segment.speaker) {
            raw_speaker_dialogues.entry(segment.speaker.as_str().to_string()).or_default().push(segment.text.as_str());
        }
    }
    let raw_speaker_dialogues = raw_speaker_dialogues.into_iter().map(|(speaker, lines)| (speaker, lines.join("\n"))).collect();

    let stem_dialogues = stems
        .iter()
        .map(|(_, role, segments)| {
            let dialogue = segments.iter().map(|segment| segment.text.as_str()).collect::<Vec<_>>().join("\n");
            (role_label(*role).to_string(), dialogue)
        })
        .collect();

    let role_guidance = json!(role_analyses
        .iter()
        .map(|(speaker, analysis)| {
            (
                speaker.as_str().to_string(),
                json!({
                    "role": role_label(analysis.role),
                    "confidence": analysis.confidence,
                    "summary": analysis.summary,
                }),
            )
        })
        .collect::<serde_json::Map<_, _>>());

    let segment_timestamps = json!(primary_segments
        .iter()
        .enumerate()
        .map(|(index, segment)| json!({"index": index, "start": segment.start, "end": segment.end}))
        .collect::<Vec<_>>());

    PromptContext {
        primary_dialogue,
        raw_speaker_dialogues,
        stem_dialogues,
        role_guidance,
        segment_timestamps,
        ground_truth: ground_truth.map(str::to_string),
    }
}

const BASE_RULES: &str = "You are building a two-party call transcript table. Output ONLY the final table, \
never invent words the speakers did not say, never drop a segment, and never merge text across a topic \
change you are not certain about. Speaker column MUST be exactly \"Agent\" or \"Client\" — never a raw \
speaker id. Consecutive turns MUST alternate between Agent and Client except where the source material \
itself shows one party speaking twice in a row without the other responding. Timestamps MUST be copied \
verbatim from the segment timestamps provided, never invented or rounded beyond what was given. Output \
format: a markdown table with columns Segment ID | Speaker | Text | Start Time | End Time, and nothing else.";

pub fn single_shot_prompt(ctx: &PromptContext) -> String {
    let mut prompt = String::new();
    prompt.push_str("Primary diarized dialogue:\n");
    prompt.push_str(&ctx.primary_dialogue);
    prompt.push_str("\n\nRaw per-speaker dialogues (for disambiguation only):\n");
    for (speaker, dialogue) in &ctx.raw_speaker_dialogues {
        prompt.push_str(&format!("{speaker}:\n{dialogue}\n"));
    }
    prompt.push_str("\nPer-stem isolated-voice dialogues:\n");
    for (role, dialogue) in &ctx.stem_dialogues {
        prompt.push_str(&format!("{role}:\n{dialogue}\n"));
    }
    prompt.push_str("\nRole guidance (speaker -> role classification):\n");
    prompt.push_str(&ctx.role_guidance.to_string());
    prompt.push_str("\n\nSegment timestamps (authoritative, copy verbatim):\n");
    prompt.push_str(&ctx.segment_timestamps.to_string());
    if let Some(ground_truth) = &ctx.ground_truth {
        prompt.push_str("\n\nReference ground truth transcript (for calibration only, do not copy verbatim):\n");
        prompt.push_str(ground_truth);
    }
    prompt
}

pub fn single_shot_system_prompt() -> String {
    BASE_RULES.to_string()
}

pub fn verification_system_prompt() -> String {
    format!("{BASE_RULES} You are now reviewing a previously generated table for hallucinated segments, \
missing alternation, or timestamp drift. Return a corrected table under the same rules, or the same \
table unchanged if it is already correct.")
}

pub fn verification_prompt(ctx: &PromptContext, previous_table: &str) -> String {
    format!("{}\n\nPreviously generated table to review:\n{}", single_shot_prompt(ctx), previous_table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diarization_domain::SegmentSource;

    #[test]
    fn builds_context_filtering_raw_dialogues_to_the_two_canonical_speakers() {
        let segments = vec![
            Segment::new(SpeakerLabel::new("SPEAKER_00"), "hi", 0.0, 1.0, SegmentSource::Primary),
            Segment::new(SpeakerLabel::new("SPEAKER_02"), "crosstalk", 1.0, 1.5, SegmentSource::Primary),
        ];
        let ctx = build_prompt_context(&segments, &[], &[], None);
        assert_eq!(ctx.raw_speaker_dialogues.len(), 1);
        assert!(ctx.raw_speaker_dialogues.contains_key("SPEAKER_00"));
    }
}
