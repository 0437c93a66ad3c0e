use diarization_domain::{MergeConfidence, Segment, SegmentSource};
use diarization_segment_utils::{jaccard_similarity, mark_overlap_flags, normalize_text, overlap_duration, ranges_overlap};
use serde_json::json;

const MIN_OVERLAP_SECONDS: f64 = 0.1;
const MAX_MID_DISTANCE_SECONDS: f64 = 2.0;
const MIN_TEXT_SIMILARITY: f64 = 0.3;
const BETTER_TEXT_JACCARD: f64 = 0.8;
const BETTER_TEXT_LENGTH_RATIO: f64 = 0.9;

pub struct MergeOutcome {
    pub segments: Vec<Segment>,
    pub stats: serde_json::Value,
}

/// Fuses the primary diarization with the per-stem voice tracks under guards
/// G1-G5 (§4.6). Never touches the primary's speaker labels or time bounds,
/// never inserts new segments — only replaces text when a matching
/// voice-track segment is clearly better.
pub fn merge(primary_segments: &[Segment], voice_track_segments: &[Segment]) -> MergeOutcome {
    let mut used = vec![false; voice_track_segments.len()];
    let mut output = Vec::with_capacity(primary_segments.len());

    let mut voice_enhanced_count = 0usize;
    let mut kept_primary_count = 0usize;

    let mut ordered_primary: Vec<(usize, &Segment)> = primary_segments.iter().enumerate().collect();
    ordered_primary.sort_by(|a, b| a.1.start.partial_cmp(&b.1.start).unwrap_or(std::cmp::Ordering::Equal));

    for (_, primary) in ordered_primary {
        let mut best: Option<(usize, f64, f64)> = None; // (index, score, jaccard)

        for (index, voice) in voice_track_segments.iter().enumerate() {
            if used[index] {
                continue;
            }
            if voice.speaker != primary.speaker {
                continue; // G1
            }
            if !ranges_overlap(primary.start, primary.end, voice.start, voice.end) {
                continue;
            }
            let overlap = overlap_duration(primary.start, primary.end, voice.start, voice.end);
            if overlap < MIN_OVERLAP_SECONDS {
                continue; // G2
            }
            if (primary.mid() - voice.mid()).abs() > MAX_MID_DISTANCE_SECONDS {
                continue; // G3
            }
            let similarity = jaccard_similarity(&normalize_text(&primary.text), &normalize_text(&voice.text));
            if similarity < MIN_TEXT_SIMILARITY {
                continue; // G4
            }

            let score = overlap * similarity;
            if best.map(|(_, best_score, _)| score > best_score).unwrap_or(true) {
                best = Some((index, score, similarity));
            }
        }

        let mut merged = primary.clone();
        if let Some((index, _, jaccard)) = best {
            used[index] = true;
            let voice = &voice_track_segments[index];
            let better_text = jaccard >= BETTER_TEXT_JACCARD && voice.text.chars().count() as f64 >= primary.text.chars().count() as f64 * BETTER_TEXT_LENGTH_RATIO;
            if better_text {
                merged.text = voice.text.clone();
                merged.source = SegmentSource::VoiceEnhanced;
                merged.merge_confidence = Some(MergeConfidence::High);
                voice_enhanced_count += 1;
            } else {
                merged.source = SegmentSource::Primary;
                merged.merge_confidence = Some(MergeConfidence::Low);
                kept_primary_count += 1;
            }
        } else {
            merged.source = SegmentSource::Primary;
            merged.merge_confidence = Some(MergeConfidence::Low);
            kept_primary_count += 1;
        }
        output.push(merged);
    }

    mark_overlap_flags(&mut output);

    let stats = json!({
        "primary_count": primary_segments.len(),
        "voice_track_count": voice_track_segments.len(),
        "voice_enhanced_count": voice_enhanced_count,
        "kept_primary_count": kept_primary_count,
    });

    MergeOutcome { segments: output, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diarization_domain::SpeakerLabel;

    fn seg(speaker: &str, text: &str, start: f64, end: f64, source: SegmentSource) -> Segment {
        Segment::new(SpeakerLabel::new(speaker), text, start, end, source)
    }

    #[test]
    fn replaces_text_when_voice_track_is_clearly_better() {
        let primary = vec![seg("SPEAKER_00", "hello", 0.0, 2.0, SegmentSource::Primary)];
        let voice = vec![seg("SPEAKER_00", "hello there how are you", 0.05, 2.0, SegmentSource::VoiceTrack)];
        let outcome = merge(&primary, &voice);
        assert_eq!(outcome.segments[0].text, "hello there how are you");
        assert_eq!(outcome.segments[0].source, SegmentSource::VoiceEnhanced);
    }

    #[test]
    fn keeps_primary_text_when_similarity_is_below_threshold() {
        let primary = vec![seg("SPEAKER_00", "totally different sentence", 0.0, 2.0, SegmentSource::Primary)];
        let voice = vec![seg("SPEAKER_00", "completely unrelated words here", 0.05, 2.0, SegmentSource::VoiceTrack)];
        let outcome = merge(&primary, &voice);
        assert_eq!(outcome.segments[0].text, "totally different sentence");
        assert_eq!(outcome.segments[0].source, SegmentSource::Primary);
    }

    #[test]
    fn never_changes_primary_speaker_or_bounds() {
        let primary = vec![seg("SPEAKER_00", "hello", 0.0, 2.0, SegmentSource::Primary)];
        let voice = vec![seg("SPEAKER_01", "hello there", 0.05, 2.0, SegmentSource::VoiceTrack)];
        let outcome = merge(&primary, &voice);
        assert_eq!(outcome.segments[0].speaker.as_str(), "SPEAKER_00");
        assert_eq!(outcome.segments[0].start, 0.0);
        assert_eq!(outcome.segments[0].end, 2.0);
    }

    #[test]
    fn output_speaker_set_equals_primary_speaker_set() {
        let primary = vec![
            seg("SPEAKER_00", "a", 0.0, 1.0, SegmentSource::Primary),
            seg("SPEAKER_01", "b", 1.0, 2.0, SegmentSource::Primary),
        ];
        let outcome = merge(&primary, &[]);
        assert_eq!(outcome.segments.len(), primary.len());
        let speakers: std::collections::BTreeSet<_> = outcome.segments.iter().map(|s| s.speaker.clone()).collect();
        let primary_speakers: std::collections::BTreeSet<_> = primary.iter().map(|s| s.speaker.clone()).collect();
        assert_eq!(speakers, primary_speakers);
    }
}
