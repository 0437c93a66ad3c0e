use std::collections::{BTreeMap, BTreeSet};

use diarization_domain::{
    DiarizationMode, Recording, Segment, SegmentSource, ServiceResult, SpeakerLabel, Word,
};
use serde::Deserialize;

/// Vendor-agnostic shape every ASR back-end maps its own JSON into before
/// `into_recording` builds the domain type. Vendors disagree on field names
/// (Speechmatics: `results[].alternatives[]`; Azure: `recognizedPhrases[]`)
/// but agree on "a list of words with start/end/speaker", so that's the
/// common denominator kept here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VendorWord {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub speaker: Option<String>,
    pub confidence: Option<f64>,
}

/// Groups consecutive words from the same speaker into a Segment. In
/// `channel` mode the vendor already isolated one speaker per call, so every
/// word here is folded under a single nominal label.
pub fn words_into_segments(words: Vec<VendorWord>, mode: DiarizationMode, single_speaker_hint: Option<&SpeakerLabel>) -> Vec<Segment> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut current_words: Vec<Word> = Vec::new();
    let mut current_speaker: Option<SpeakerLabel> = None;

    let flush = |segments: &mut Vec<Segment>, speaker: &Option<SpeakerLabel>, words: &mut Vec<Word>| {
        if words.is_empty() {
            return;
        }
        let Some(speaker) = speaker.clone() else {
            words.clear();
            return;
        };
        let start = words.first().map(|w| w.start).unwrap_or(0.0);
        let end = words.last().map(|w| w.end).unwrap_or(start);
        let text = words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" ");
        let mut segment = Segment::new(speaker, text, start, end, SegmentSource::Primary);
        segment.words = std::mem::take(words);
        segments.push(segment);
    };

    for (index, vendor_word) in words.into_iter().enumerate() {
        let label = match mode {
            DiarizationMode::Channel => single_speaker_hint.cloned().unwrap_or_else(|| SpeakerLabel::normalize("0", 0)),
            DiarizationMode::Mix => vendor_word
                .speaker
                .as_deref()
                .map(|raw| SpeakerLabel::normalize(raw, index))
                .unwrap_or_else(|| SpeakerLabel::normalize("", index)),
        };

        if current_speaker.as_ref() != Some(&label) {
            flush(&mut segments, &current_speaker, &mut current_words);
            current_speaker = Some(label.clone());
        }

        current_words.push(Word {
            text: vendor_word.text,
            start: vendor_word.start,
            end: vendor_word.end,
            speaker: Some(label),
            confidence: vendor_word.confidence,
        });
    }
    flush(&mut segments, &current_speaker, &mut current_words);
    segments
}

/// Wraps a flat segment list into the `Recording`/`Diarization` envelope
/// under the engine's result key (§3 `ServiceResult`/`Recording`).
pub fn into_service_result(segments: Vec<Segment>) -> ServiceResult {
    let speaker_count = segments
        .iter()
        .map(|segment| segment.speaker.as_str().to_string())
        .collect::<BTreeSet<_>>()
        .len() as u32;
    ServiceResult {
        segments,
        speaker_count,
        raw_meta: serde_json::Value::Null,
    }
}

pub fn single_engine_recording(id: &str, name: &str, language: &str, engine_key: &str, result: ServiceResult) -> Recording {
    let duration = result.segments.iter().map(|s| s.end).fold(0.0_f64, f64::max);
    let speaker_count = result.speaker_count;
    let mut results = BTreeMap::new();
    results.insert(engine_key.to_string(), result);
    Recording {
        id: id.to_string(),
        name: name.to_string(),
        duration,
        language: language.to_string(),
        speaker_count,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(text: &str, start: f64, end: f64, speaker: &str) -> VendorWord {
        VendorWord { text: text.to_string(), start, end, speaker: Some(speaker.to_string()), confidence: Some(0.9) }
    }

    #[test]
    fn groups_consecutive_same_speaker_words_into_one_segment() {
        let words = vec![word("hello", 0.0, 0.5, "S1"), word("there", 0.5, 1.0, "S1"), word("hi", 1.2, 1.5, "S2")];
        let segments = words_into_segments(words, DiarizationMode::Mix, None);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].text, "hello there");
        assert_eq!(segments[1].speaker.as_str(), "SPEAKER_02");
    }

    #[test]
    fn channel_mode_collapses_all_words_to_the_hinted_speaker() {
        let words = vec![word("a", 0.0, 0.2, "S1"), word("b", 0.2, 0.4, "S2")];
        let hint = SpeakerLabel::normalize("1", 0);
        let segments = words_into_segments(words, DiarizationMode::Channel, Some(&hint));
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].speaker, hint);
    }
}
