use diarization_domain::{PauseGap, Segment};

use crate::ranges::ranges_overlap;

/// Fills defaults, clamps `end >= start`, sorts the word list by start time.
pub fn sanitize_segment(mut segment: Segment) -> Segment {
    if segment.end < segment.start {
        segment.end = segment.start;
    }
    segment.words.sort_by(|a, b| a.start.total_cmp(&b.start));
    segment.text = segment.text.trim().to_string();
    segment
}

#[derive(Debug, Clone, Copy)]
pub struct PauseDetectionConfig {
    pub inter_threshold: f64,
    pub intra_threshold: f64,
    pub long_pause: f64,
}

impl Default for PauseDetectionConfig {
    fn default() -> Self {
        Self {
            inter_threshold: 0.3,
            intra_threshold: 0.5,
            long_pause: 1.0,
        }
    }
}

/// Adds `pause_before` to every segment (gap to the previous segment's end),
/// flags `is_replica_boundary` when that gap is at least `long_pause`, and
/// records intra-segment word gaps at least `intra_threshold` wide as
/// `pauses` on segments that carry word-level timings. Segments must already
/// be chronologically sorted.
pub fn detect_pauses(segments: &mut [Segment], config: PauseDetectionConfig) {
    for index in 0..segments.len() {
        if index > 0 {
            let previous_end = segments[index - 1].end;
            let gap = (segments[index].start - previous_end).max(0.0);
            segments[index].pause_before = Some(gap);
            segments[index].is_replica_boundary = gap >= config.long_pause;
        } else {
            segments[index].pause_before = Some(0.0);
        }

        let words = &segments[index].words;
        if words.len() < 2 {
            continue;
        }
        let mut pauses = Vec::new();
        for word_index in 0..words.len() - 1 {
            let gap = (words[word_index + 1].start - words[word_index].end).max(0.0);
            if gap >= config.intra_threshold || gap >= config.inter_threshold {
                pauses.push(PauseGap {
                    after_word_index: word_index,
                    duration: gap,
                });
            }
        }
        segments[index].pauses = pauses;
    }
}

/// O(n^2) but bounded: flags `overlap = true` on both segments of any pair
/// with different speakers and overlapping time ranges.
pub fn mark_overlap_flags(segments: &mut [Segment]) {
    for segment in segments.iter_mut() {
        segment.overlap = false;
    }
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            if segments[i].speaker == segments[j].speaker {
                continue;
            }
            if ranges_overlap(segments[i].start, segments[i].end, segments[j].start, segments[j].end) {
                segments[i].overlap = true;
                segments[j].overlap = true;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use diarization_domain::{SegmentSource, SpeakerLabel, Word};

    use super::*;

    fn seg(speaker: &str, start: f64, end: f64) -> Segment {
        Segment::new(SpeakerLabel::new(speaker), "text", start, end, SegmentSource::Primary)
    }

    #[test]
    fn sanitize_clamps_end_to_start() {
        let raw = seg("SPEAKER_00", 2.0, 1.0);
        let clean = sanitize_segment(raw);
        assert_eq!(clean.end, clean.start);
    }

    #[test]
    fn sanitize_sorts_words_by_start() {
        let mut raw = seg("SPEAKER_00", 0.0, 2.0);
        raw.words = vec![
            Word { text: "b".into(), start: 1.0, end: 1.5, speaker: None, confidence: None },
            Word { text: "a".into(), start: 0.0, end: 0.5, speaker: None, confidence: None },
        ];
        let clean = sanitize_segment(raw);
        assert_eq!(clean.words[0].text, "a");
        assert_eq!(clean.words[1].text, "b");
    }

    #[test]
    fn detect_pauses_flags_replica_boundary_on_long_gap() {
        let mut segments = vec![seg("SPEAKER_00", 0.0, 1.0), seg("SPEAKER_01", 2.5, 3.0)];
        detect_pauses(&mut segments, PauseDetectionConfig::default());
        assert_eq!(segments[1].pause_before, Some(1.5));
        assert!(segments[1].is_replica_boundary);
    }

    #[test]
    fn mark_overlap_flags_only_different_speakers() {
        let mut segments = vec![seg("SPEAKER_00", 0.0, 2.0), seg("SPEAKER_01", 1.0, 3.0)];
        mark_overlap_flags(&mut segments);
        assert!(segments[0].overlap);
        assert!(segments[1].overlap);
    }

    #[test]
    fn mark_overlap_flags_ignores_same_speaker_overlap() {
        let mut segments = vec![seg("SPEAKER_00", 0.0, 2.0), seg("SPEAKER_00", 1.0, 3.0)];
        mark_overlap_flags(&mut segments);
        assert!(!segments[0].overlap);
        assert!(!segments[1].overlap);
    }
}
