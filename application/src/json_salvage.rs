use serde_json::Value;

/// Tries, in order: a direct parse, a fenced ```json block, the first
/// balanced top-level `{...}` span, then any other balanced span in the
/// text. Used everywhere an LLM's reply is supposed to be strict JSON but
/// isn't always (§4.7 "fenced-block extraction, brace-balance extraction,
/// pattern-recovery of complete objects").
pub fn salvage_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(fenced) = extract_fenced_block(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            return Some(value);
        }
    }

    for span in balanced_brace_spans(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(span) {
            return Some(value);
        }
    }

    None
}

fn extract_fenced_block(text: &str) -> Option<&str> {
    let start_marker_positions = ["```json", "```JSON", "```"];
    for marker in start_marker_positions {
        if let Some(start) = text.find(marker) {
            let after_marker = &text[start + marker.len()..];
            if let Some(end) = after_marker.find("```") {
                return Some(&after_marker[..end]);
            }
        }
    }
    None
}

/// Every maximal balanced `{...}` substring, outermost-first, longest-first.
fn balanced_brace_spans(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut spans = Vec::new();
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'{' {
            let mut depth = 0i32;
            let mut cursor = index;
            while cursor < bytes.len() {
                match bytes[cursor] {
                    b'{' => depth += 1,
                    b'}' => {
                        depth -= 1;
                        if depth == 0 {
                            spans.push(&text[index..=cursor]);
                            break;
                        }
                    }
                    _ => {}
                }
                cursor += 1;
            }
        }
        index += 1;
    }
    spans.sort_by_key(|s| std::cmp::Reverse(s.len()));
    spans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_json_directly() {
        let value = salvage_json(r#"{"role":"operator"}"#).unwrap();
        assert_eq!(value["role"], "operator");
    }

    #[test]
    fn extracts_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"role\":\"client\"}\n```\nThanks";
        let value = salvage_json(text).unwrap();
        assert_eq!(value["role"], "client");
    }

    #[test]
    fn recovers_balanced_object_from_surrounding_prose() {
        let text = "The answer is {\"role\":\"operator\",\"confidence\":0.8} as requested.";
        let value = salvage_json(text).unwrap();
        assert_eq!(value["confidence"], 0.8);
    }

    #[test]
    fn returns_none_for_unrecoverable_text() {
        assert!(salvage_json("not json at all").is_none());
    }
}
