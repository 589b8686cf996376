//! Built-in validators.
//!
//! Presence, markdown structure, JSON parseability and required keys are
//! errors. Short documents and placeholder text are warnings.

use super::{ValidationIssue, Validator};
use regex::Regex;
use std::sync::LazyLock;

/// Markdown artifacts shorter than this raise a warning.
pub const MIN_MARKDOWN_CHARS: usize = 200;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,6}\s+\S").unwrap());

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:lorem ipsum|todo|tbd|fixme)\b").unwrap()
});

/// Top-level keys required in well-known JSON artifacts.
const REQUIRED_JSON_KEYS: &[(&str, &[&str])] = &[
    ("project-classification.json", &["project_type"]),
    ("stack.json", &["frontend", "backend"]),
    ("api-spec.json", &["endpoints"]),
];

/// Every name in `required` must be present and non-blank.
pub fn required_artifacts(required: &[String]) -> Validator {
    let required = required.to_vec();
    Validator::new("required_artifacts", move |artifacts| {
        required
            .iter()
            .filter_map(|name| match artifacts.get(name) {
                None => Some(ValidationIssue::error(
                    "required_artifacts",
                    Some(name),
                    format!("Missing required artifact {name}"),
                )),
                Some(content) if content.trim().is_empty() => Some(ValidationIssue::error(
                    "required_artifacts",
                    Some(name),
                    "Artifact is empty",
                )),
                Some(_) => None,
            })
            .collect()
    })
}

/// A markdown artifact must contain at least one heading.
pub fn markdown_heading(filename: &str) -> Validator {
    let filename = filename.to_string();
    Validator::new("markdown_heading", move |artifacts| {
        match artifacts.get(&filename) {
            Some(content) if !content.trim().is_empty() && !HEADING_RE.is_match(content) => {
                vec![ValidationIssue::error(
                    "markdown_heading",
                    Some(&filename),
                    "Missing heading: markdown artifacts must contain at least one heading",
                )]
            }
            _ => Vec::new(),
        }
    })
}

/// A JSON artifact must parse.
pub fn json_parseable(filename: &str) -> Validator {
    let filename = filename.to_string();
    Validator::new("json_parseable", move |artifacts| {
        let Some(content) = artifacts.get(&filename) else {
            return Vec::new();
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        match serde_json::from_str::<serde_json::Value>(content) {
            Ok(_) => Vec::new(),
            Err(e) => vec![ValidationIssue::error(
                "json_parseable",
                Some(&filename),
                format!("Invalid JSON: {e}"),
            )],
        }
    })
}

/// A JSON artifact must be an object carrying every key in `keys`.
///
/// Unparseable content is left to `json_parseable`.
pub fn json_keys(filename: &str, keys: &[&str]) -> Validator {
    let filename = filename.to_string();
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    Validator::new("json_keys", move |artifacts| {
        let Some(content) = artifacts.get(&filename) else {
            return Vec::new();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
            return Vec::new();
        };
        let Some(object) = value.as_object() else {
            return vec![ValidationIssue::error(
                "json_keys",
                Some(&filename),
                "Expected a JSON object at the top level",
            )];
        };
        keys.iter()
            .filter(|key| !object.contains_key(key.as_str()))
            .map(|key| {
                ValidationIssue::error(
                    "json_keys",
                    Some(&filename),
                    format!("Missing required key '{key}'"),
                )
            })
            .collect()
    })
}

/// Warn when an artifact is shorter than `min_chars`.
pub fn min_length(filename: &str, min_chars: usize) -> Validator {
    let filename = filename.to_string();
    Validator::new("min_length", move |artifacts| match artifacts.get(&filename) {
        Some(content) if !content.trim().is_empty() && content.chars().count() < min_chars => {
            vec![ValidationIssue::warning(
                "min_length",
                Some(&filename),
                format!(
                    "Only {} characters (expected at least {min_chars})",
                    content.chars().count()
                ),
            )]
        }
        _ => Vec::new(),
    })
}

/// Warn on placeholder text in any artifact.
pub fn placeholder_text() -> Validator {
    Validator::new("placeholder_text", |artifacts| {
        artifacts
            .iter()
            .filter_map(|(name, content)| {
                PLACEHOLDER_RE.find(content).map(|m| {
                    ValidationIssue::warning(
                        "placeholder_text",
                        Some(name),
                        format!("Contains placeholder text '{}'", m.as_str()),
                    )
                })
            })
            .collect()
    })
}

/// The default validator list for a phase producing `required`.
pub fn defaults_for(required: &[String]) -> Vec<Validator> {
    if required.is_empty() {
        return Vec::new();
    }

    let mut validators = vec![required_artifacts(required)];
    for name in required {
        if name.ends_with(".md") {
            validators.push(markdown_heading(name));
        } else if name.ends_with(".json") {
            validators.push(json_parseable(name));
            if let Some((_, keys)) = REQUIRED_JSON_KEYS.iter().find(|(file, _)| file == name) {
                validators.push(json_keys(name, keys));
            }
        }
    }
    for name in required.iter().filter(|n| n.ends_with(".md")) {
        validators.push(min_length(name, MIN_MARKDOWN_CHARS));
    }
    validators.push(placeholder_text());
    validators
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactMap;
    use crate::validation::IssueSeverity;

    fn single(name: &str, content: &str) -> ArtifactMap {
        let mut map = ArtifactMap::new();
        map.insert(name.to_string(), content.to_string());
        map
    }

    #[test]
    fn test_required_artifacts_missing_and_blank() {
        let validator = required_artifacts(&["a.md".to_string(), "b.json".to_string()]);
        let issues = validator.run(&single("a.md", "   "));
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("empty"));
        assert!(issues[1].message.contains("b.json"));
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn test_markdown_heading() {
        let validator = markdown_heading("PRD.md");
        assert!(validator.run(&single("PRD.md", "# Title\nbody")).is_empty());
        assert!(validator.run(&single("PRD.md", "intro\n\n## Goals")).is_empty());
        let issues = validator.run(&single("PRD.md", "no heading here"));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("Missing heading"));
        // Absence is the presence validator's job.
        assert!(validator.run(&ArtifactMap::new()).is_empty());
    }

    #[test]
    fn test_json_parseable() {
        let validator = json_parseable("stack.json");
        assert!(validator.run(&single("stack.json", r#"{"a": 1}"#)).is_empty());
        let issues = validator.run(&single("stack.json", "{ nope"));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.starts_with("Invalid JSON"));
    }

    #[test]
    fn test_json_keys() {
        let validator = json_keys("stack.json", &["frontend", "backend"]);
        let issues = validator.run(&single("stack.json", r#"{"frontend": "react"}"#));
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("backend"));

        let issues = validator.run(&single("stack.json", "[1, 2]"));
        assert!(issues[0].message.contains("JSON object"));

        assert!(validator.run(&single("stack.json", "{ nope")).is_empty());
    }

    #[test]
    fn test_min_length_is_warning() {
        let validator = min_length("PRD.md", 50);
        let issues = validator.run(&single("PRD.md", "# Short"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert!(validator.run(&single("PRD.md", &"x".repeat(50))).is_empty());
    }

    #[test]
    fn test_placeholder_text() {
        let validator = placeholder_text();
        let issues = validator.run(&single("PRD.md", "# PRD\nLorem ipsum dolor"));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert!(validator.run(&single("PRD.md", "# PRD\ntodos app")).is_empty());
    }

    #[test]
    fn test_defaults_for_mixed_artifacts() {
        let required = vec!["stack-analysis.md".to_string(), "stack.json".to_string()];
        let names: Vec<_> = defaults_for(&required)
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "required_artifacts",
                "markdown_heading",
                "json_parseable",
                "json_keys",
                "min_length",
                "placeholder_text",
            ]
        );
        assert!(defaults_for(&[]).is_empty());
    }
}
