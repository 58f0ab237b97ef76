//! Per-query state threaded through the pipeline, and the deltas stages return.

use serde::{Deserialize, Serialize};

use crate::search::normalizer::Opportunity;

/// The record one pipeline run accumulates. Each optional field is written
/// by exactly one stage; `steps` only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub query: String,
    pub steps: Vec<String>,
    pub research_raw: Option<String>,
    pub analysis_raw: Option<String>,
    pub opportunities: Option<Vec<Opportunity>>,
    pub result_markdown: Option<String>,
}

impl RunState {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Merges a stage's output. Fields absent from the delta are left untouched.
    pub fn apply(&mut self, delta: &StateDelta) {
        if let Some(query) = &delta.query {
            self.query = query.clone();
        }
        if let Some(research_raw) = &delta.research_raw {
            self.research_raw = Some(research_raw.clone());
        }
        if let Some(analysis_raw) = &delta.analysis_raw {
            self.analysis_raw = Some(analysis_raw.clone());
        }
        if let Some(opportunities) = &delta.opportunities {
            self.opportunities = Some(opportunities.clone());
        }
        if let Some(result_markdown) = &delta.result_markdown {
            self.result_markdown = Some(result_markdown.clone());
        }
        self.steps.push(delta.step.clone());
    }
}

/// The fields one stage wrote, plus the progress note it appended.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDelta {
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opportunities: Option<Vec<Opportunity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_markdown: Option<String>,
}

impl StateDelta {
    pub fn step(note: impl Into<String>) -> Self {
        Self {
            step: note.into(),
            ..Self::default()
        }
    }
}
