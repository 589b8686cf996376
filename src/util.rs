//! Shared text helpers for the specforge crate.

/// Extract the first balanced `open`..`close` block from text that may contain
/// other content. Brackets inside JSON strings are ignored.
fn extract_balanced(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + i + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Extract a JSON object from text that may contain other content.
pub fn extract_json_object(text: &str) -> Option<String> {
    extract_balanced(text, '{', '}')
}

/// Extract a JSON array from text that may contain other content.
pub fn extract_json_array(text: &str) -> Option<String> {
    extract_balanced(text, '[', ']')
}

/// Body of the first fenced code block (```json or bare ```), if any.
pub fn extract_code_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

/// Truncate to at most `max_chars` characters, appending `marker` when cut.
pub fn truncate_chars(text: &str, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{}", &text[..byte_idx], marker),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(text), Some(text.to_string()));
    }

    #[test]
    fn test_extract_json_object_with_surrounding_text() {
        let text = r#"Here is the JSON: {"key": "value"} and some more text"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"key": "value"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}}"#;
        assert_eq!(extract_json_object(text), Some(text.to_string()));
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"concern": "use } carefully \" {"} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"concern": "use } carefully \" {"}"#.to_string())
        );
    }

    #[test]
    fn test_extract_json_object_no_json_or_unclosed() {
        assert_eq!(extract_json_object("No JSON here"), None);
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_extract_json_array() {
        let text = r#"Findings: [{"severity": "low"}, {"severity": "medium"}] done"#;
        assert_eq!(
            extract_json_array(text),
            Some(r#"[{"severity": "low"}, {"severity": "medium"}]"#.to_string())
        );
    }

    #[test]
    fn test_extract_code_block() {
        let text = "Review:\n```json\n{\"a\": 1}\n```\nThanks";
        assert_eq!(extract_code_block(text), Some("{\"a\": 1}"));
        assert_eq!(extract_code_block("no fences"), None);
        assert_eq!(extract_code_block("```json\nunterminated"), None);
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10, "..."), "hello");
        assert_eq!(truncate_chars("hello", 5, "..."), "hello");
        assert_eq!(truncate_chars("hello world", 5, "..."), "hello...");
        assert_eq!(truncate_chars("héllo", 2, "~"), "hé~");
    }
}
