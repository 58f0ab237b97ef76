//! Opportunity Normalizer: turns extracted JSON into canonical `Opportunity` records.
//!
//! Scores supplied by the analysis model are kept (clamped to 0–100). When the
//! model omits a score, a pluggable `FallbackScorer` computes one so that no
//! item is ever dropped for lack of a score.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::search::extractor::Extracted;

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// One scored candidate result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub title: String,
    pub summary: String,
    pub source: String,
    /// Always `Some` after normalization; kept optional so ranking and
    /// rendering have a defined behavior for unscored records.
    pub score: Option<f64>,
}

/// Result of shape-checking the extracted value.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Empty,
    Items(Vec<Opportunity>),
}

impl Normalized {
    pub fn into_vec(self) -> Vec<Opportunity> {
        match self {
            Normalized::Empty => Vec::new(),
            Normalized::Items(items) => items,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Fallback scoring
// ────────────────────────────────────────────────────────────────────────────

/// Computes a score for an item the analysis model left unscored.
pub trait FallbackScorer: Send + Sync {
    fn score(&self, title: &str, summary: &str) -> f64;
}

/// Keyword boosts applied on top of `BASE_SCORE`. Each keyword counts once.
const DEFAULT_KEYWORD_BOOSTS: &[(&str, f64)] = &[
    ("market", 10.0),
    ("growth", 10.0),
    ("revenue", 10.0),
    ("ai", 5.0),
    ("partnership", 5.0),
    ("expansion", 5.0),
];
const BASE_SCORE: f64 = 50.0;

/// Default scorer: a base score plus a boost for each keyword present as a
/// case-insensitive substring of title + summary, capped at `MAX_SCORE`.
#[derive(Debug, Clone)]
pub struct KeywordScorer {
    base: f64,
    boosts: Vec<(String, f64)>,
}

impl KeywordScorer {
    pub fn new<'a>(base: f64, boosts: impl IntoIterator<Item = (&'a str, f64)>) -> Self {
        Self {
            base,
            boosts: boosts
                .into_iter()
                .map(|(keyword, boost)| (keyword.to_lowercase(), boost))
                .collect(),
        }
    }
}

impl Default for KeywordScorer {
    fn default() -> Self {
        Self::new(BASE_SCORE, DEFAULT_KEYWORD_BOOSTS.iter().copied())
    }
}

impl FallbackScorer for KeywordScorer {
    fn score(&self, title: &str, summary: &str) -> f64 {
        let text = format!("{summary} {title}").to_lowercase();
        let boosts: f64 = self
            .boosts
            .iter()
            .filter(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, boost)| boost)
            .sum();
        (self.base + boosts).min(MAX_SCORE)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

/// Validates that the extracted value is `{"opportunities": [...]}` and maps each
/// object item to an `Opportunity`. Any other shape yields `Normalized::Empty`.
pub fn normalize(extracted: Extracted, scorer: &dyn FallbackScorer) -> Normalized {
    let value = match extracted {
        Extracted::NoStructuredData => return Normalized::Empty,
        Extracted::Parsed(value) => value,
    };

    let Some(raw_items) = value.get("opportunities").and_then(Value::as_array) else {
        warn!("Analysis output has no 'opportunities' list; treating as empty");
        return Normalized::Empty;
    };

    let items: Vec<Opportunity> = raw_items
        .iter()
        .filter_map(|raw| match raw.as_object() {
            Some(fields) => Some(normalize_item(fields, scorer)),
            None => {
                debug!("Skipping non-object opportunity item: {raw}");
                None
            }
        })
        .collect();

    if items.is_empty() {
        Normalized::Empty
    } else {
        Normalized::Items(items)
    }
}

fn normalize_item(fields: &Map<String, Value>, scorer: &dyn FallbackScorer) -> Opportunity {
    let title = coerce_text(fields.get("title"));
    let summary = coerce_text(fields.get("summary"));
    let source = coerce_text(fields.get("source"));

    let score = match coerce_score(fields.get("score")) {
        // `+ 0.0` folds a negative zero into zero so it ranks and renders as 0
        Some(score) => score.clamp(MIN_SCORE, MAX_SCORE) + 0.0,
        None => scorer.score(&title, &summary),
    };

    Opportunity {
        title,
        summary,
        source,
        score: Some(score),
    }
}

/// Missing and null become the empty string; scalars use their JSON text.
fn coerce_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

/// Numbers and numeric strings are accepted. Anything else counts as "no score
/// provided": booleans are not read as 1/0, and non-finite values are dropped.
fn coerce_score(value: Option<&Value>) -> Option<f64> {
    let score = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    score.is_finite().then_some(score)
}
