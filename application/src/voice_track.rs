use std::collections::BTreeMap;

use diarization_domain::{Segment, SegmentSource, SpeakerLabel};
use diarization_segment_utils::{jaccard_similarity, normalize_text, normalized_levenshtein_similarity, overlap_duration, overlap_share_of_both, ranges_overlap};
use tracing::warn;

const MAIN_BUCKET_SHARE_THRESHOLD: f64 = 0.6;
const DUPLICATE_OVERLAP_SHARE: f64 = 0.65;
const SIMILAR_TEXT_JACCARD: f64 = 0.85;
const SIMILAR_TEXT_LEVENSHTEIN: f64 = 0.85;
const SIMILAR_TEXT_MIN_OVERLAP: f64 = 0.3;
const CONTAINMENT_MIN_OVERLAP: f64 = 0.1;

/// Reduces a stem's raw (possibly multi-speaker, crosstalk-laden) segments
/// down to the clean single-speaker track for that stem (§4.5).
pub fn aggregate_voice_track(stem_segments: &[Segment], stem_speaker: &SpeakerLabel) -> Vec<Segment> {
    let main_bucket_label = select_main_bucket(stem_segments);
    let Some(main_bucket_label) = main_bucket_label else {
        return Vec::new();
    };

    let relabeled: Vec<Segment> = stem_segments
        .iter()
        .filter(|segment| segment.speaker == main_bucket_label)
        .map(|segment| {
            let mut cloned = segment.clone();
            cloned.speaker = stem_speaker.clone();
            cloned.track_speaker = Some(stem_speaker.clone());
            cloned.source = SegmentSource::VoiceTrack;
            cloned
        })
        .collect();

    deduplicate(relabeled)
}

fn select_main_bucket(segments: &[Segment]) -> Option<SpeakerLabel> {
    let mut buckets: BTreeMap<SpeakerLabel, f64> = BTreeMap::new();
    for segment in segments {
        *buckets.entry(segment.speaker.clone()).or_insert(0.0) += segment.duration();
    }
    if buckets.is_empty() {
        return None;
    }

    let total: f64 = buckets.values().sum();
    let (largest_label, largest_duration) = buckets
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(label, duration)| (label.clone(), *duration))?;

    let share = if total > 0.0 { largest_duration / total } else { 0.0 };
    if share < MAIN_BUCKET_SHARE_THRESHOLD {
        warn!(share, "stem main bucket share below 60%, falling back to largest-duration bucket regardless of share");
    }
    Some(largest_label)
}

fn deduplicate(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<Segment> = Vec::new();
    'outer: for candidate in segments {
        for existing in kept.iter_mut() {
            if is_duplicate(existing, &candidate) {
                if candidate.text.len() > existing.text.len() {
                    *existing = candidate;
                }
                continue 'outer;
            }
        }
        kept.push(candidate);
    }
    kept
}

fn is_duplicate(a: &Segment, b: &Segment) -> bool {
    if !ranges_overlap(a.start, a.end, b.start, b.end) {
        return false;
    }
    let overlap = overlap_duration(a.start, a.end, b.start, b.end);

    if overlap_share_of_both(a.start, a.end, b.start, b.end) > DUPLICATE_OVERLAP_SHARE {
        return true;
    }

    let norm_a = normalize_text(&a.text);
    let norm_b = normalize_text(&b.text);

    let jaccard = jaccard_similarity(&norm_a, &norm_b);
    let levenshtein = normalized_levenshtein_similarity(&norm_a, &norm_b);
    if jaccard >= SIMILAR_TEXT_JACCARD && levenshtein >= SIMILAR_TEXT_LEVENSHTEIN && overlap > SIMILAR_TEXT_MIN_OVERLAP {
        return true;
    }

    if overlap > CONTAINMENT_MIN_OVERLAP && (norm_a.contains(&norm_b) || norm_b.contains(&norm_a)) && !norm_a.is_empty() && !norm_b.is_empty() {
        return true;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(speaker: &str, text: &str, start: f64, end: f64) -> Segment {
        Segment::new(SpeakerLabel::new(speaker), text, start, end, SegmentSource::Primary)
    }

    #[test]
    fn keeps_only_the_main_bucket() {
        let segments = vec![
            seg("SPEAKER_00", "hello there friend", 0.0, 12.5),
            seg("SPEAKER_01", "crosstalk blip", 12.5, 13.3),
        ];
        let stem_speaker = SpeakerLabel::new("SPEAKER_02");
        let aggregated = aggregate_voice_track(&segments, &stem_speaker);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].speaker, stem_speaker);
        assert_eq!(aggregated[0].track_speaker, Some(stem_speaker));
        assert_eq!(aggregated[0].source, SegmentSource::VoiceTrack);
    }

    #[test]
    fn single_speaker_stem_keeps_everything() {
        let segments = vec![seg("SPEAKER_00", "a", 0.0, 1.0), seg("SPEAKER_00", "b", 1.0, 2.0)];
        let stem_speaker = SpeakerLabel::new("SPEAKER_00");
        let aggregated = aggregate_voice_track(&segments, &stem_speaker);
        assert_eq!(aggregated.len(), 2);
    }

    #[test]
    fn deduplicates_heavily_overlapping_segments_keeping_longer_text() {
        let segments = vec![
            seg("SPEAKER_00", "hello there how are you doing today", 0.0, 3.0),
            seg("SPEAKER_00", "hello there", 0.1, 2.9),
        ];
        let stem_speaker = SpeakerLabel::new("SPEAKER_00");
        let aggregated = aggregate_voice_track(&segments, &stem_speaker);
        assert_eq!(aggregated.len(), 1);
        assert_eq!(aggregated[0].text, "hello there how are you doing today");
    }
}
