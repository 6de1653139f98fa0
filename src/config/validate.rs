//! Raw config file checks used by `zeptocord config check`.
//!
//! Works on the untyped JSON so that misspelled keys, which serde would
//! silently ignore under `#[serde(default)]`, are reported.

use serde_json::Value;

/// Known sections and the keys each accepts.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    (
        "provider",
        &[
            "api_base",
            "api_key",
            "model",
            "api_version",
            "temperature",
            "max_tokens",
        ],
    ),
    (
        "discord",
        &[
            "enabled",
            "token",
            "allow_from",
            "thread_name",
            "thread_auto_archive_minutes",
        ],
    ),
    (
        "conversation",
        &[
            "storage_dir",
            "lock_lease_secs",
            "max_tool_rounds",
            "stream_idle_timeout_secs",
        ],
    ),
    ("reply", &["chunk_size", "flush_interval_ms", "edit_interval_ms"]),
    ("music", &["autoplay_history"]),
    ("logging", &["format", "level"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Warn,
    Error,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Edit distance, used for "did you mean" hints.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut row = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            row[j + 1] = (prev[j + 1] + 1).min(row[j] + 1).min(prev[j] + cost);
        }
        prev = row;
    }
    prev[b.len()]
}

/// Closest known key within distance 3.
pub fn suggest_field<'a>(unknown: &str, known: &[&'a str]) -> Option<&'a str> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| k)
}

fn unknown_key(path: String, key: &str, known: &[&str]) -> Diagnostic {
    let message = match suggest_field(key, known) {
        Some(hint) => format!("Unknown field '{}', did you mean '{}'?", key, hint),
        None => format!("Unknown field '{}'", key),
    };
    Diagnostic {
        level: DiagnosticLevel::Error,
        path,
        message,
    }
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let Some(obj) = raw.as_object() else {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Error,
            path: String::new(),
            message: "Config must be a JSON object".to_string(),
        });
        return diagnostics;
    };

    let section_names: Vec<&str> = KNOWN_SECTIONS.iter().map(|(name, _)| *name).collect();

    for (key, value) in obj {
        let Some((_, fields)) = KNOWN_SECTIONS.iter().find(|(name, _)| name == key) else {
            diagnostics.push(unknown_key(key.clone(), key, &section_names));
            continue;
        };
        let Some(section) = value.as_object() else {
            diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Error,
                path: key.clone(),
                message: "Section must be a JSON object".to_string(),
            });
            continue;
        };
        for field in section.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_key(format!("{}.{}", key, field), field, fields));
            }
        }
    }

    let allow_from_empty = obj
        .get("discord")
        .and_then(|d| d.get("allow_from"))
        .and_then(|a| a.as_array())
        .map_or(true, |a| a.is_empty());
    if allow_from_empty {
        diagnostics.push(Diagnostic {
            level: DiagnosticLevel::Warn,
            path: "discord.allow_from".to_string(),
            message: "Empty, anyone who mentions the bot can start a conversation".to_string(),
        });
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("model", "model"), 0);
        assert_eq!(levenshtein("modle", "model"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
    }

    #[test]
    fn test_suggest_field() {
        assert_eq!(suggest_field("provder", &["provider", "reply"]), Some("provider"));
        assert_eq!(suggest_field("zzzzzzzz", &["provider"]), None);
    }

    #[test]
    fn test_valid_config_has_no_errors() {
        let raw = json!({
            "provider": {"model": "gpt-4o"},
            "discord": {"token": "t", "allow_from": ["1"]},
            "reply": {"chunk_size": 2000}
        });
        assert!(validate_config(&raw).is_empty());
    }

    #[test]
    fn test_unknown_section_and_field() {
        let raw = json!({
            "provder": {},
            "reply": {"chunk_sise": 10}
        });
        let diags = validate_config(&raw);
        assert!(diags
            .iter()
            .any(|d| d.path == "provder" && d.message.contains("'provider'")));
        assert!(diags
            .iter()
            .any(|d| d.path == "reply.chunk_sise" && d.message.contains("'chunk_size'")));
    }

    #[test]
    fn test_empty_allowlist_warns() {
        let diags = validate_config(&json!({}));
        assert!(diags
            .iter()
            .any(|d| d.level == DiagnosticLevel::Warn && d.path == "discord.allow_from"));
    }

    #[test]
    fn test_not_an_object() {
        let diags = validate_config(&json!("nope"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].level, DiagnosticLevel::Error);
    }
}
