//! Pulls a JSON value out of free-text model output.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Outcome of scanning model output for structured data.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    NoStructuredData,
    /// A well-formed JSON value of unknown shape.
    Parsed(Value),
}

fn embedded_json_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Greedy and dot-matches-newline: first `{` or `[` through the last matching closer.
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}|\[.*\]").expect("static regex is valid"))
}

/// Parses `text` as JSON, falling back to the first brace/bracket-delimited
/// substring when the model wrapped its answer in prose or code fences.
pub fn extract_json(text: &str) -> Extracted {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Extracted::Parsed(value);
    }

    let Some(candidate) = embedded_json_pattern().find(text) else {
        debug!("No JSON-like literal found in {} chars of model output", text.len());
        return Extracted::NoStructuredData;
    };

    match serde_json::from_str::<Value>(candidate.as_str()) {
        Ok(value) => Extracted::Parsed(value),
        Err(e) => {
            debug!("Embedded JSON candidate failed to parse: {e}");
            Extracted::NoStructuredData
        }
    }
}
