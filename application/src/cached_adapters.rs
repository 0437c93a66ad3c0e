use diarization_cache::{diarization_key, separation_key};
use diarization_domain::{
    AsrEngine, CacheStore, Diarization, DiarizationMode, DomainError, ProgressSink, SeparationDebugParams, SeparationMode,
    SeparationOutput, Separator, SpeakerHint, Transcriber,
};
use tracing::warn;

/// Wraps one ASR call with the diarization cache (§4.1), used for both the
/// primary STEP 1 call (`mix`) and each STEP 3 per-stem call (`channel`).
/// A cache hit that fails to deserialize back into a [`Diarization`] is
/// treated as a miss rather than an error — the adapter call still runs.
pub async fn cached_transcribe(
    cache: &dyn CacheStore,
    transcriber: &dyn Transcriber,
    audio_ref: &str,
    language: &str,
    speaker_hint: &SpeakerHint,
    mode: DiarizationMode,
    engine: AsrEngine,
    progress: &dyn ProgressSink,
) -> Result<Diarization, DomainError> {
    let mode_fragment = match mode {
        DiarizationMode::Mix => "mix",
        DiarizationMode::Channel => "channel",
    };
    let key = diarization_key(audio_ref, language, &speaker_hint.as_key_fragment(), mode_fragment, engine.as_key_fragment());

    if let Some(hit) = cache.get(&key).await.into_hit() {
        match serde_json::from_value::<Diarization>(hit) {
            Ok(diarization) => return Ok(diarization),
            Err(err) => warn!(key, error = %err, "diarization cache hit did not deserialize, treating as miss"),
        }
    }

    let diarization = transcriber.transcribe(audio_ref, language, speaker_hint, mode, progress).await?;
    cache.put(&key, &serde_json::to_value(&diarization).unwrap_or(serde_json::Value::Null)).await;
    Ok(diarization)
}

/// Wraps one separation call with the separation cache (§4.1). On a hit,
/// the stems are re-materialized through [`Separator::refresh_stems`] before
/// being returned, so AudioShake's time-limited download URLs are never
/// served back stale (§4.1 correctness property, §9 cache correctness).
pub async fn cached_separate(
    cache: &dyn CacheStore,
    separator: &dyn Separator,
    mode: SeparationMode,
    audio_ref: &str,
    debug: &SeparationDebugParams,
    audio_hash: Option<&str>,
    progress: &dyn ProgressSink,
) -> Result<SeparationOutput, DomainError> {
    let key = separation_key(audio_ref, mode.as_key_fragment(), audio_hash);

    if let Some(hit) = cache.get(&key).await.into_hit() {
        match serde_json::from_value::<SeparationOutput>(hit) {
            Ok(cached) => {
                let stems = separator.refresh_stems(&cached.task_id, cached.stems).await?;
                return Ok(SeparationOutput { task_id: cached.task_id, stems });
            }
            Err(err) => warn!(key, error = %err, "separation cache hit did not deserialize, treating as miss"),
        }
    }

    let output = separator.separate(audio_ref, debug, progress).await?;
    cache.put(&key, &serde_json::to_value(&output).unwrap_or(serde_json::Value::Null)).await;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use diarization_domain::{CacheLookup, NullProgressSink, Recording, Segment, SegmentSource, ServiceResult, SpeakerLabel, Stem};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MapCache(Mutex<std::collections::HashMap<String, serde_json::Value>>);
    #[async_trait]
    impl CacheStore for MapCache {
        async fn get(&self, key: &str) -> CacheLookup {
            match self.0.lock().unwrap().get(key) {
                Some(v) => CacheLookup::Hit(v.clone()),
                None => CacheLookup::Miss,
            }
        }
        async fn put(&self, key: &str, payload: &serde_json::Value) {
            self.0.lock().unwrap().insert(key.to_string(), payload.clone());
        }
        async fn invalidate_all(&self) {
            self.0.lock().unwrap().clear();
        }
        async fn export_all(&self) -> Vec<(String, serde_json::Value)> {
            self.0.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        }
    }

    fn sample_diarization() -> Diarization {
        let segments = vec![Segment::new(SpeakerLabel::new("SPEAKER_00"), "hi", 0.0, 1.0, SegmentSource::Primary)];
        let mut results = BTreeMap::new();
        results.insert("speechmatics-batch".to_string(), ServiceResult { segments, speaker_count: 1, raw_meta: serde_json::Value::Null });
        Diarization {
            recording: Recording { id: "rec".to_string(), name: "call.wav".to_string(), duration: 1.0, language: "en".to_string(), speaker_count: 1, results },
            services_tested: BTreeSet::from(["speechmatics-batch".to_string()]),
        }
    }

    struct CountingTranscriber(AtomicUsize);
    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, _audio_ref: &str, _language: &str, _hint: &SpeakerHint, _mode: DiarizationMode, _progress: &dyn ProgressSink) -> Result<Diarization, DomainError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(sample_diarization())
        }
    }

    #[tokio::test]
    async fn second_transcribe_call_is_served_from_cache() {
        let cache = MapCache(Mutex::new(std::collections::HashMap::new()));
        let transcriber = CountingTranscriber(AtomicUsize::new(0));
        let hint = SpeakerHint::Auto;

        let first = cached_transcribe(&cache, &transcriber, "call.wav", "en", &hint, DiarizationMode::Mix, AsrEngine::SpeechmaticsBatch, &NullProgressSink).await.unwrap();
        let second = cached_transcribe(&cache, &transcriber, "call.wav", "en", &hint, DiarizationMode::Mix, AsrEngine::SpeechmaticsBatch, &NullProgressSink).await.unwrap();

        assert_eq!(transcriber.0.load(Ordering::SeqCst), 1);
        assert_eq!(first.recording.name, second.recording.name);
    }

    #[tokio::test]
    async fn mix_and_channel_modes_never_share_a_cache_entry() {
        let cache = MapCache(Mutex::new(std::collections::HashMap::new()));
        let transcriber = CountingTranscriber(AtomicUsize::new(0));
        let hint = SpeakerHint::Auto;

        cached_transcribe(&cache, &transcriber, "call.wav", "en", &hint, DiarizationMode::Mix, AsrEngine::SpeechmaticsBatch, &NullProgressSink).await.unwrap();
        cached_transcribe(&cache, &transcriber, "call.wav", "en", &hint, DiarizationMode::Channel, AsrEngine::SpeechmaticsBatch, &NullProgressSink).await.unwrap();

        assert_eq!(transcriber.0.load(Ordering::SeqCst), 2);
    }

    struct CountingSeparator(AtomicUsize);
    #[async_trait]
    impl Separator for CountingSeparator {
        async fn separate(&self, _audio_ref: &str, _debug: &SeparationDebugParams, _progress: &dyn ProgressSink) -> Result<SeparationOutput, DomainError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(SeparationOutput {
                task_id: "task-1".to_string(),
                stems: vec![Stem { name: SpeakerLabel::new("SPEAKER_00"), audio_ref: "uploads/stem0.wav".to_string(), is_background: false, format: "wav".to_string() }],
            })
        }
    }

    #[tokio::test]
    async fn second_separate_call_is_served_from_cache_and_refreshed() {
        let cache = MapCache(Mutex::new(std::collections::HashMap::new()));
        let separator = CountingSeparator(AtomicUsize::new(0));

        let first = cached_separate(&cache, &separator, SeparationMode::SpeechBrain, "call.wav", &SeparationDebugParams::default(), None, &NullProgressSink).await.unwrap();
        let second = cached_separate(&cache, &separator, SeparationMode::SpeechBrain, "call.wav", &SeparationDebugParams::default(), None, &NullProgressSink).await.unwrap();

        assert_eq!(separator.0.load(Ordering::SeqCst), 1);
        assert_eq!(first.stems[0].audio_ref, second.stems[0].audio_ref);
    }

    struct ExpiringUrlSeparator {
        calls: AtomicUsize,
    }
    #[async_trait]
    impl Separator for ExpiringUrlSeparator {
        async fn separate(&self, _audio_ref: &str, _debug: &SeparationDebugParams, _progress: &dyn ProgressSink) -> Result<SeparationOutput, DomainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SeparationOutput {
                task_id: "job-42".to_string(),
                stems: vec![Stem { name: SpeakerLabel::new("SPEAKER_00"), audio_ref: "https://vendor/expiring-v1".to_string(), is_background: false, format: "wav".to_string() }],
            })
        }

        async fn refresh_stems(&self, task_id: &str, cached: Vec<Stem>) -> Result<Vec<Stem>, DomainError> {
            assert_eq!(task_id, "job-42");
            Ok(cached.into_iter().map(|stem| Stem { audio_ref: "https://vendor/fresh-v2".to_string(), ..stem }).collect())
        }
    }

    #[tokio::test]
    async fn cache_hit_for_expiring_urls_is_refreshed_not_served_stale() {
        let cache = MapCache(Mutex::new(std::collections::HashMap::new()));
        let separator = ExpiringUrlSeparator { calls: AtomicUsize::new(0) };

        cached_separate(&cache, &separator, SeparationMode::AudioShake, "call.wav", &SeparationDebugParams::default(), None, &NullProgressSink).await.unwrap();
        let second = cached_separate(&cache, &separator, SeparationMode::AudioShake, "call.wav", &SeparationDebugParams::default(), None, &NullProgressSink).await.unwrap();

        assert_eq!(separator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.stems[0].audio_ref, "https://vendor/fresh-v2");
    }
}
