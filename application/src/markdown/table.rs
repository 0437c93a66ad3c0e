use std::collections::HashMap;

use diarization_domain::{Role, Segment, SpeakerLabel};
use diarization_segment_utils::{merge_consecutive_same_speaker_in_markdown, remove_filler_words, MarkdownRow};

const HEADER: &str = "| Segment ID | Speaker | Text | Start Time | End Time |";
const SEPARATOR: &str = "|---|---|---|---|---|";

/// Extracts a fenced ```` ```markdown ```` (or bare ` ``` `) block if present,
/// otherwise returns the whole reply — the model sometimes wraps the table,
/// sometimes doesn't (§4.7).
fn unfence(text: &str) -> &str {
    for marker in ["```markdown", "```md", "```"] {
        if let Some(start) = text.find(marker) {
            let after = &text[start + marker.len()..];
            if let Some(end) = after.find("```") {
                return after[..end].trim();
            }
        }
    }
    text.trim()
}

/// Parses a `| id | speaker | text | start | end |` table into rows. Lines
/// that aren't shaped like a table row (prose before/after, the separator
/// row) are skipped; malformed time fields fall back to `0.0` rather than
/// dropping the whole row, since a model reply with one garbled cell
/// shouldn't lose the rest of the transcript.
pub fn parse_table(text: &str) -> Vec<MarkdownRow> {
    let body = unfence(text);
    let mut rows = Vec::new();
    for (index, line) in body.lines().enumerate() {
        let trimmed = line.trim();
        if !trimmed.starts_with('|') {
            continue;
        }
        let cells: Vec<&str> = trimmed.trim_matches('|').split('|').map(|cell| cell.trim()).collect();
        if cells.len() < 5 {
            continue;
        }
        if cells.iter().all(|cell| cell.chars().all(|c| c == '-' || c == ':') && !cell.is_empty()) {
            continue; // separator row
        }
        if cells[0].eq_ignore_ascii_case("segment id") {
            continue; // header row
        }
        let start = cells[3].parse::<f64>().unwrap_or(0.0);
        let end = cells[4].parse::<f64>().unwrap_or(0.0);
        rows.push(MarkdownRow {
            segment_id: rows.len(),
            speaker: cells[1].to_string(),
            text: cells[2].to_string(),
            start,
            end,
        });
        let _ = index;
    }
    rows
}

pub fn render_table(rows: &[MarkdownRow]) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push('\n');
    out.push_str(SEPARATOR);
    for row in rows {
        out.push('\n');
        out.push_str(&format!("| {} | {} | {} | {:.2} | {:.2} |", row.segment_id, row.speaker, row.text.replace('|', "/"), row.start, row.end));
    }
    out
}

/// Strips filler words from every row and merges consecutive same-speaker
/// rows (§4.7's post-processing step, shared by both pipeline modes).
pub fn post_process(rows: Vec<MarkdownRow>, max_gap: f64) -> Vec<MarkdownRow> {
    let cleaned: Vec<MarkdownRow> = rows
        .into_iter()
        .map(|mut row| {
            row.text = remove_filler_words(&row.text);
            row
        })
        .collect();
    merge_consecutive_same_speaker_in_markdown(cleaned, max_gap)
}

fn role_label(role: Role) -> Option<&'static str> {
    match role {
        Role::Agent => Some("Agent"),
        Role::Client => Some("Client"),
        Role::Unknown => None,
    }
}

/// Builds a table directly from the merged segments, bypassing the LLM
/// entirely. Used when every markdown-pipeline LLM call fails or produces
/// an empty table — STEP 4 must never hand the pipeline an empty table
/// (§4.7 "Failure handling"). Merged segments never carry a `Role` of their
/// own (the merger only ever clones the primary ASR segments), so every row
/// is labeled from the Role Classifier's per-speaker `role_by_speaker`
/// mapping; a speaker the classifier left `Unknown` falls back to a stable
/// Agent/Client alternation by first-seen order, so the table still obeys
/// the Agent/Client-only, alternating contract (P1) instead of defaulting
/// every row to the same label.
pub fn deterministic_table_from_segments(segments: &[Segment], role_by_speaker: &[(SpeakerLabel, Role)]) -> Vec<MarkdownRow> {
    let role_map: HashMap<&SpeakerLabel, Role> = role_by_speaker.iter().map(|(speaker, role)| (speaker, *role)).collect();
    let mut fallback_labels: HashMap<SpeakerLabel, &'static str> = HashMap::new();
    let mut next_fallback_is_agent = true;

    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| {
            let resolved = segment.role.or_else(|| role_map.get(&segment.speaker).copied());
            let speaker = role_label(resolved.unwrap_or(Role::Unknown)).unwrap_or_else(|| {
                *fallback_labels.entry(segment.speaker.clone()).or_insert_with(|| {
                    let label = if next_fallback_is_agent { "Agent" } else { "Client" };
                    next_fallback_is_agent = !next_fallback_is_agent;
                    label
                })
            });
            MarkdownRow {
                segment_id: index,
                speaker: speaker.to_string(),
                text: segment.text.clone(),
                start: segment.start,
                end: segment.end,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_fenced_table_ignoring_prose() {
        let reply = "Here is the table:\n```markdown\n| Segment ID | Speaker | Text | Start Time | End Time |\n|---|---|---|---|---|\n| 0 | Agent | hello there | 0.00 | 1.50 |\n```\nLet me know if you need changes.";
        let rows = parse_table(reply);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].speaker, "Agent");
        assert_eq!(rows[0].text, "hello there");
        assert_eq!(rows[0].end, 1.5);
    }

    #[test]
    fn parses_an_unfenced_table() {
        let reply = "| Segment ID | Speaker | Text | Start Time | End Time |\n|---|---|---|---|---|\n| 0 | Client | hi | 0.00 | 1.00 |";
        let rows = parse_table(reply);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].speaker, "Client");
    }

    #[test]
    fn deterministic_fallback_never_produces_an_empty_table_for_nonempty_segments() {
        let segments = vec![Segment::new(diarization_domain::SpeakerLabel::new("SPEAKER_00"), "hi", 0.0, 1.0, diarization_domain::SegmentSource::Primary)];
        let rows = deterministic_table_from_segments(&segments, &[]);
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn deterministic_fallback_labels_rows_from_the_role_classifier_mapping() {
        let agent = diarization_domain::SpeakerLabel::new("SPEAKER_00");
        let client = diarization_domain::SpeakerLabel::new("SPEAKER_01");
        let segments = vec![
            Segment::new(agent.clone(), "how can I help", 0.0, 1.0, diarization_domain::SegmentSource::Primary),
            Segment::new(client.clone(), "I need a refund", 1.0, 2.0, diarization_domain::SegmentSource::Primary),
        ];
        let role_by_speaker = [(agent, Role::Agent), (client, Role::Client)];
        let rows = deterministic_table_from_segments(&segments, &role_by_speaker);
        assert_eq!(rows[0].speaker, "Agent");
        assert_eq!(rows[1].speaker, "Client");
    }

    #[test]
    fn deterministic_fallback_alternates_unclassified_speakers_instead_of_defaulting_to_client() {
        let speaker_a = diarization_domain::SpeakerLabel::new("SPEAKER_00");
        let speaker_b = diarization_domain::SpeakerLabel::new("SPEAKER_01");
        let segments = vec![
            Segment::new(speaker_a.clone(), "hello", 0.0, 1.0, diarization_domain::SegmentSource::Primary),
            Segment::new(speaker_b.clone(), "hi there", 1.0, 2.0, diarization_domain::SegmentSource::Primary),
            Segment::new(speaker_a, "how are you", 2.0, 3.0, diarization_domain::SegmentSource::Primary),
        ];
        let rows = deterministic_table_from_segments(&segments, &[]);
        assert_eq!(rows[0].speaker, "Agent");
        assert_eq!(rows[1].speaker, "Client");
        assert_eq!(rows[2].speaker, "Agent");
    }

    #[test]
    fn render_then_parse_round_trips_rows() {
        let rows = vec![MarkdownRow { segment_id: 0, speaker: "Agent".to_string(), text: "hello there".to_string(), start: 0.0, end: 1.5 }];
        let rendered = render_table(&rows);
        let parsed = parse_table(&rendered);
        assert_eq!(parsed, rows);
    }
}
