//! Decoder for free-text critic output.
//!
//! Critics are asked for a JSON object `{"feedback": [...]}`, but the text that
//! comes back may wrap it in a code fence, surround it with prose, return a
//! bare array, or use different field names. The decoder accepts all of these
//! and reports anything else as a `ParseFailure`; it never panics.

use super::feedback::{CriticFeedback, FeedbackSeverity};
use crate::util::{extract_code_block, extract_json_array, extract_json_object};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Successfully decoded feedback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeedback {
    pub items: Vec<CriticFeedback>,
    /// Entries that were present but unusable (no concern, unknown severity)
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseFailure {
    #[error("critic output is empty")]
    Empty,

    #[error("no JSON found in critic output")]
    NoStructuredOutput,

    #[error("invalid JSON in critic output: {0}")]
    InvalidJson(String),

    #[error("critic JSON has no feedback list")]
    UnexpectedShape,
}

const LIST_KEYS: &[&str] = &["feedback", "issues", "findings"];
const CONCERN_KEYS: &[&str] = &["concern", "issue", "description", "message"];
const RECOMMENDATION_KEYS: &[&str] = &["recommendation", "suggestion", "fix"];

pub fn decode_feedback(text: &str) -> Result<ParsedFeedback, ParseFailure> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ParseFailure::Empty);
    }

    let value = locate_json(text)?;
    let items = match &value {
        Value::Array(items) => items,
        Value::Object(map) => LIST_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or(ParseFailure::UnexpectedShape)?,
        _ => return Err(ParseFailure::UnexpectedShape),
    };

    let mut parsed = ParsedFeedback::default();
    for item in items {
        match decode_item(item) {
            Some(feedback) => parsed.items.push(feedback),
            None => parsed.skipped += 1,
        }
    }
    Ok(parsed)
}

/// Decode, degrading any failure to an empty list plus a warning.
pub fn decode_feedback_or_empty(text: &str) -> Vec<CriticFeedback> {
    match decode_feedback(text) {
        Ok(parsed) => {
            if parsed.skipped > 0 {
                warn!(skipped = parsed.skipped, "Skipped unusable critic feedback entries");
            }
            parsed.items
        }
        Err(e) => {
            warn!(error = %e, "Could not parse critic output; treating as no feedback");
            Vec::new()
        }
    }
}

fn locate_json(text: &str) -> Result<Value, ParseFailure> {
    let mut candidates: Vec<String> = Vec::new();
    if let Some(block) = extract_code_block(text) {
        candidates.push(block.to_string());
    }
    candidates.push(text.to_string());

    let mut last_error = None;
    for candidate in candidates {
        match serde_json::from_str::<Value>(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e.to_string()),
        }
        // Prefer whichever bracket opens first.
        let object_at = candidate.find('{');
        let array_at = candidate.find('[');
        let extracted = match (object_at, array_at) {
            (Some(o), Some(a)) if a < o => extract_json_array(&candidate),
            (Some(_), _) => extract_json_object(&candidate),
            (None, Some(_)) => extract_json_array(&candidate),
            (None, None) => None,
        };
        if let Some(json) = extracted {
            match serde_json::from_str::<Value>(&json) {
                Ok(value) => return Ok(value),
                Err(e) => last_error = Some(e.to_string()),
            }
        }
    }

    match last_error {
        Some(e) if text.contains('{') || text.contains('[') => Err(ParseFailure::InvalidJson(e)),
        _ => Err(ParseFailure::NoStructuredOutput),
    }
}

fn first_string(item: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn decode_item(item: &Value) -> Option<CriticFeedback> {
    let concern = first_string(item, CONCERN_KEYS)?;
    let severity = match item.get("severity").and_then(Value::as_str) {
        Some(raw) => match FeedbackSeverity::parse_lenient(raw) {
            Some(severity) => severity,
            None => {
                warn!(severity = raw, "Unknown critic severity; skipping entry");
                return None;
            }
        },
        None => FeedbackSeverity::Medium,
    };

    Some(CriticFeedback {
        severity,
        category: first_string(item, &["category", "type"]).unwrap_or_else(|| "general".into()),
        concern,
        recommendation: first_string(item, RECOMMENDATION_KEYS).unwrap_or_default(),
        location: first_string(item, &["location", "file"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_fenced_object() {
        let text = r#"Here is my review.

```json
{
  "feedback": [
    {"severity": "medium", "category": "coverage", "concern": "Auth missing", "recommendation": "Add login", "location": "PRD.md"},
    {"severity": "low", "category": "style", "concern": "Typos"}
  ]
}
```
"#;
        let parsed = decode_feedback(text).unwrap();
        assert_eq!(parsed.items.len(), 2);
        assert_eq!(parsed.items[0].severity, FeedbackSeverity::Medium);
        assert_eq!(parsed.items[0].location.as_deref(), Some("PRD.md"));
        assert_eq!(parsed.items[1].recommendation, "");
    }

    #[test]
    fn test_decodes_bare_array_with_prose() {
        let text = r#"Findings: [{"severity": "critical", "category": "security", "issue": "Plaintext passwords"}] end"#;
        let parsed = decode_feedback(text).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.items[0].severity, FeedbackSeverity::Critical);
        assert_eq!(parsed.items[0].concern, "Plaintext passwords");
    }

    #[test]
    fn test_aliases_and_defaults() {
        let text = r#"{"issues": [{"severity": "major", "description": "Gap", "suggestion": "Fill it"}, {"concern": "No severity"}]}"#;
        let parsed = decode_feedback(text).unwrap();
        assert_eq!(parsed.items[0].severity, FeedbackSeverity::Medium);
        assert_eq!(parsed.items[0].recommendation, "Fill it");
        assert_eq!(parsed.items[0].category, "general");
        assert_eq!(parsed.items[1].severity, FeedbackSeverity::Medium);
    }

    #[test]
    fn test_skips_unusable_entries() {
        let text = r#"{"feedback": [{"severity": "spicy", "concern": "x"}, {"severity": "low"}, {"severity": "low", "concern": "ok"}]}"#;
        let parsed = decode_feedback(text).unwrap();
        assert_eq!(parsed.items.len(), 1);
        assert_eq!(parsed.skipped, 2);
    }

    #[test]
    fn test_empty_feedback_list() {
        let parsed = decode_feedback(r#"{"feedback": []}"#).unwrap();
        assert!(parsed.items.is_empty());
    }

    #[test]
    fn test_failures() {
        assert_eq!(decode_feedback("   "), Err(ParseFailure::Empty));
        assert_eq!(
            decode_feedback("Looks great to me!"),
            Err(ParseFailure::NoStructuredOutput)
        );
        assert!(matches!(
            decode_feedback("{ \"feedback\": [ oops"),
            Err(ParseFailure::InvalidJson(_))
        ));
        assert_eq!(
            decode_feedback(r#"{"verdict": "pass"}"#),
            Err(ParseFailure::UnexpectedShape)
        );
        assert_eq!(decode_feedback("42"), Err(ParseFailure::UnexpectedShape));
    }

    #[test]
    fn test_or_empty_never_fails() {
        assert!(decode_feedback_or_empty("garbage {{{").is_empty());
        assert_eq!(
            decode_feedback_or_empty(r#"[{"severity": "low", "concern": "x"}]"#).len(),
            1
        );
    }
}
