use sha2::{Digest, Sha256};

use diarization_infra_common::sanitize_filename;

/// First 16 hex characters of the SHA-256 digest of `input`.
pub fn sha256_prefix16(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();
    hex[..16].to_string()
}

/// `{sanitized-base-name}_{language}_{speaker_hint|auto}_{mix|channel}_{engine}`
pub fn diarization_key(base_name: &str, language: &str, speaker_hint: &str, mode: &str, engine: &str) -> String {
    format!(
        "{}_{}_{}_{}_{}",
        sanitize_filename(base_name),
        sanitize_filename(language),
        sanitize_filename(speaker_hint),
        sanitize_filename(mode),
        sanitize_filename(engine),
    )
}

/// `sep_{sanitized-base-name}_{pipeline_mode}[_{audio_hash[:16]}]`
pub fn separation_key(base_name: &str, pipeline_mode: &str, audio_hash: Option<&str>) -> String {
    let mut key = format!("sep_{}_{}", sanitize_filename(base_name), sanitize_filename(pipeline_mode));
    if let Some(hash) = audio_hash {
        key.push('_');
        key.push_str(&hash[..hash.len().min(16)]);
    }
    key
}

/// `{sanitized-base-name}_{sha256(prompt)[:16]}_{model}_{mode}_{variant}[_demo_{demo_mode}]`
pub fn llm_key(base_name: &str, prompt: &str, model: &str, mode: &str, variant: &str, demo_mode: Option<&str>) -> String {
    let mut key = format!(
        "{}_{}_{}_{}_{}",
        sanitize_filename(base_name),
        sha256_prefix16(prompt),
        sanitize_filename(model),
        sanitize_filename(mode),
        sanitize_filename(variant),
    );
    if let Some(demo) = demo_mode {
        key.push_str("_demo_");
        key.push_str(&sanitize_filename(demo));
    }
    key
}

/// `sha256(transcript.to_lowercase())[:16]_{language}_{mode}` — the Role
/// Classifier's cache key (§4.4).
pub fn role_analysis_key(transcript: &str, language: &str, mode: &str) -> String {
    format!(
        "{}_{}_{}",
        sha256_prefix16(&transcript.to_lowercase()),
        sanitize_filename(language),
        sanitize_filename(mode),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diarization_key_is_deterministic() {
        let a = diarization_key("call.wav", "en", "auto", "mix", "speechmatics-batch");
        let b = diarization_key("call.wav", "en", "auto", "mix", "speechmatics-batch");
        assert_eq!(a, b);
    }

    #[test]
    fn different_inputs_never_collide() {
        let a = diarization_key("call-a.wav", "en", "auto", "mix", "speechmatics-batch");
        let b = diarization_key("call-b.wav", "en", "auto", "mix", "speechmatics-batch");
        assert_ne!(a, b);
    }

    #[test]
    fn llm_key_includes_demo_mode_suffix() {
        let without = llm_key("call", "prompt text", "gpt", "smart", "markdown-fixes", None);
        let with_demo = llm_key("call", "prompt text", "gpt", "smart", "markdown-fixes", Some("local"));
        assert_ne!(without, with_demo);
    }

    #[test]
    fn role_analysis_key_is_case_insensitive_on_transcript() {
        let a = role_analysis_key("Hello There", "en", "fast");
        let b = role_analysis_key("hello there", "en", "fast");
        assert_eq!(a, b);
    }
}
