use std::sync::OnceLock;

use regex::Regex;

fn unsafe_char_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("valid regex"))
}

/// Replaces any run of non-`[A-Za-z0-9_-]` characters with a single `_`,
/// strips leading/trailing `_`, and defaults to `"audio"` for an empty
/// result. Used identically for every cache key and every persisted stem
/// filename (§4.1, §9) so two different inputs never collide.
pub fn sanitize_filename(raw: &str) -> String {
    let collapsed = unsafe_char_re().replace_all(raw, "_");
    let trimmed = collapsed.trim_matches('_');
    if trimmed.is_empty() {
        "audio".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("call recording (1).wav"), "call_recording_1_wav");
    }

    #[test]
    fn collapses_repeated_separators() {
        assert_eq!(sanitize_filename("a///b   c"), "a_b_c");
    }

    #[test]
    fn strips_leading_and_trailing_separators() {
        assert_eq!(sanitize_filename("__hello__"), "hello");
    }

    #[test]
    fn empty_input_defaults_to_audio() {
        assert_eq!(sanitize_filename(""), "audio");
        assert_eq!(sanitize_filename("???"), "audio");
    }

    #[test]
    fn different_inputs_never_collide_trivially() {
        assert_ne!(sanitize_filename("call-a"), sanitize_filename("call-b"));
    }
}
