//! Response Extraction
//!
//! The generator is asked for exactly one JSON object, but in practice the
//! raw text often carries prose or markdown fences around it. This module
//! recovers the first balanced `{...}` span and validates it as JSON before
//! anyone tries to decode a payload out of it. No repair, no guessing: if
//! the first balanced span is not valid JSON, extraction fails.

use tracing::debug;

/// Extract the first balanced JSON object from `text`.
///
/// Scans to the first `{`, then walks a nesting depth counter to the
/// matching `}`. The minimal balanced span is returned only if it parses as
/// JSON; otherwise `None`.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    for (i, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..start + i + 1];
                    return if serde_json::from_str::<serde_json::Value>(candidate).is_ok() {
                        Some(candidate)
                    } else {
                        debug!("balanced span is not valid JSON");
                        None
                    };
                }
            }
            _ => {}
        }
    }
    // ran out of text before the object closed
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_bare_object() {
        assert_eq!(extract_json_object(r#"{"a": 1}"#), Some(r#"{"a": 1}"#));
    }

    #[test]
    fn tolerates_surrounding_prose() {
        let text = r#"Sure! Here is the result: {"query":"SELECT 1","params":[]} Hope that helps."#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"query":"SELECT 1","params":[]}"#)
        );
    }

    #[test]
    fn handles_nested_objects() {
        let text = r#"note {"a": {"b": {"c": 3}}, "d": 4} trailing"#;
        assert_eq!(extract_json_object(text), Some(r#"{"a": {"b": {"c": 3}}, "d": 4}"#));
    }

    #[test]
    fn picks_the_first_balanced_span() {
        let text = r#"{"first": true} and later {"second": true}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"first": true}"#));
    }

    #[test]
    fn fails_cleanly_without_braces() {
        assert_eq!(extract_json_object("no braces here"), None);
        assert_eq!(extract_json_object(""), None);
    }

    #[test]
    fn fails_on_unclosed_object() {
        assert_eq!(extract_json_object(r#"{"a": 1"#), None);
    }

    #[test]
    fn fails_on_invalid_json_span() {
        assert_eq!(extract_json_object("{not json}"), None);
    }

    #[test]
    fn idempotent_on_its_own_output() {
        let text = r#"prose {"query":"SELECT 1","params":[],"explain":"x","type":"SELECT"} more prose"#;
        let first = extract_json_object(text).unwrap();
        let second = extract_json_object(first).unwrap();
        assert_eq!(first, second);
    }
}
