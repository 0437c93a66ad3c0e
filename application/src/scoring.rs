use std::collections::HashMap;

use diarization_domain::{GroundTruthComparison, GroundTruthMetrics, GroundTruthSide, Segment};
use diarization_segment_utils::{tokenize_words, MarkdownRow};

/// Scores the final table (and, as a baseline, the raw ASR segments) against
/// a reference transcript (§4.9). Returns `None` — never `Some` of an empty
/// metrics object — when no ground truth was supplied (B5).
pub fn score(final_table: &[MarkdownRow], baseline_segments: &[Segment], ground_truth: Option<&str>) -> Option<GroundTruthMetrics> {
    let ground_truth = ground_truth?;

    let reference_text = strip_speaker_prefixes(ground_truth);
    let reference_bag = word_bag(&reference_text);

    let final_text = final_table.iter().map(|row| row.text.as_str()).collect::<Vec<_>>().join(" ");
    let next_level = compare(&word_bag(&final_text), &reference_bag);

    let speechmatics = if baseline_segments.is_empty() {
        None
    } else {
        let baseline_text = baseline_segments.iter().map(|segment| segment.text.as_str()).collect::<Vec<_>>().join(" ");
        Some(compare(&word_bag(&baseline_text), &reference_bag))
    };

    let baseline_percent = speechmatics.as_ref().map(|side| side.match_percent).unwrap_or(0.0);
    let comparison = GroundTruthComparison {
        next_level_better: next_level.match_percent > baseline_percent,
        improvement: next_level.match_percent - baseline_percent,
    };

    Some(GroundTruthMetrics { next_level, speechmatics, comparison })
}

/// Drops a leading `Word:` token from every line — the reference transcript
/// is typically formatted as `SpeakerN: ...` or `Agent: ...`; the scorer
/// only cares about the spoken words.
fn strip_speaker_prefixes(text: &str) -> String {
    text.lines()
        .map(|line| match line.find(':') {
            Some(colon) if !line[..colon].contains(char::is_whitespace) && colon > 0 => line[colon + 1..].trim(),
            _ => line.trim(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn word_bag(text: &str) -> HashMap<String, u64> {
    let mut bag = HashMap::new();
    for word in tokenize_words(text) {
        *bag.entry(word).or_insert(0) += 1;
    }
    bag
}

fn compare(output: &HashMap<String, u64>, reference: &HashMap<String, u64>) -> GroundTruthSide {
    let total: u64 = reference.values().sum();
    let total_output: u64 = output.values().sum();
    let matched: u64 = reference.iter().map(|(word, count)| (*count).min(output.get(word).copied().unwrap_or(0))).sum();
    let unmatched = total.saturating_sub(matched);
    let extra = total_output.saturating_sub(matched);
    let match_percent = if total > 0 { ((matched as f64 / total as f64 * 1000.0).round()) / 10.0 } else { 0.0 };
    GroundTruthSide { match_percent, matched, unmatched, total, extra }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diarization_domain::SegmentSource;
    use diarization_domain::SpeakerLabel;

    fn row(text: &str) -> MarkdownRow {
        MarkdownRow { segment_id: 0, speaker: "Agent".to_string(), text: text.to_string(), start: 0.0, end: 1.0 }
    }

    #[test]
    fn returns_none_without_ground_truth() {
        assert!(score(&[row("hello there")], &[], None).is_none());
    }

    #[test]
    fn perfect_match_scores_100_percent() {
        let table = vec![row("hello there, how are you?")];
        let metrics = score(&table, &[], Some("Agent: hello there, how are you?")).unwrap();
        assert_eq!(metrics.next_level.match_percent, 100.0);
        assert_eq!(metrics.next_level.unmatched, 0);
    }

    #[test]
    fn partial_match_reports_unmatched_and_extra_words() {
        let table = vec![row("hello there friend")];
        let metrics = score(&table, &[], Some("Client: hello there old pal")).unwrap();
        assert!(metrics.next_level.match_percent < 100.0);
        assert!(metrics.next_level.unmatched > 0);
    }

    #[test]
    fn baseline_comparison_is_none_without_raw_segments() {
        let table = vec![row("hello there")];
        let metrics = score(&table, &[], Some("hello there")).unwrap();
        assert!(metrics.speechmatics.is_none());
    }

    #[test]
    fn baseline_comparison_flags_improvement_when_final_is_better() {
        let table = vec![row("hello there how are you")];
        let baseline = vec![Segment::new(SpeakerLabel::new("SPEAKER_00"), "hello their howdy", 0.0, 1.0, SegmentSource::Primary)];
        let metrics = score(&table, &baseline, Some("hello there how are you")).unwrap();
        assert!(metrics.comparison.next_level_better);
        assert!(metrics.comparison.improvement > 0.0);
    }

    #[test]
    fn match_percent_is_rounded_to_one_decimal_and_improvement_follows() {
        let reference_words: Vec<String> = (1..=140).map(|i| format!("w{i}")).collect();
        let reference = reference_words.join(" ");

        let mut final_words: Vec<String> = (1..=130).map(|i| format!("w{i}")).collect();
        final_words.extend((1..=8).map(|i| format!("extra{i}")));
        let table = vec![row(&final_words.join(" "))];

        let baseline_words: Vec<String> = (1..=120).map(|i| format!("w{i}")).collect();
        let baseline = vec![Segment::new(SpeakerLabel::new("SPEAKER_00"), baseline_words.join(" "), 0.0, 1.0, SegmentSource::Primary)];

        let metrics = score(&table, &baseline, Some(&reference)).unwrap();
        assert_eq!(metrics.next_level.match_percent, 92.9);
        assert_eq!(metrics.speechmatics.as_ref().unwrap().match_percent, 85.7);
        assert!(metrics.comparison.next_level_better);
        assert!((metrics.comparison.improvement - 7.2).abs() < 1e-9);
    }
}
