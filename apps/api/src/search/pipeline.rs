//! Search pipeline: a fixed, linear state machine over `RunState`.
//!
//! Flow: input → research → analyze → aggregate → finalize.
//!
//! Each stage reads the state written by earlier stages and returns a
//! `StateDelta`; the controller merges the delta and advances its cursor.
//! `run_search` drives the machine to completion; `stream_search` yields one
//! event per stage and stops as soon as the consumer drops the stream.

use std::fmt;
use std::sync::Arc;

use async_stream::stream;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::llm_client::ServiceError;
use crate::search::collaborators::{Analyst, Researcher};
use crate::search::extractor::extract_json;
use crate::search::normalizer::{normalize, FallbackScorer, KeywordScorer};
use crate::search::ranker::rank;
use crate::search::report::render_report;
use crate::search::run_state::{RunState, StateDelta};

// ────────────────────────────────────────────────────────────────────────────
// Stages
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Input,
    Research,
    Analyze,
    Aggregate,
    Finalize,
}

/// Execution order. There is no branching and no revisiting.
pub const STAGES: [Stage; 5] = [
    Stage::Input,
    Stage::Research,
    Stage::Analyze,
    Stage::Aggregate,
    Stage::Finalize,
];

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Input => "input",
            Stage::Research => "research",
            Stage::Analyze => "analyze",
            Stage::Aggregate => "aggregate",
            Stage::Finalize => "finalize",
        }
    }

    /// The progress note appended to `steps` when this stage completes.
    pub fn note(&self) -> &'static str {
        match self {
            Stage::Input => "Received query",
            Stage::Research => "Completed research",
            Stage::Analyze => "Analyzed and structured opportunities via OpenAI API",
            Stage::Aggregate => "Aggregated and scored opportunities",
            Stage::Finalize => "Compiled final results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors and events
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(String),

    /// An upstream call failed. `partial` holds everything completed before it.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: ServiceError,
        partial: Box<RunState>,
    },
}

/// One unit of streamed progress.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchEvent {
    Step { stage: Stage, delta: StateDelta },
    Final { state: RunState },
    Error { message: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

/// Stateless pipeline definition. Cheap to clone; every query gets its own `PipelineRun`.
#[derive(Clone)]
pub struct SearchPipeline {
    researcher: Arc<dyn Researcher>,
    analyst: Arc<dyn Analyst>,
    scorer: Arc<dyn FallbackScorer>,
}

impl SearchPipeline {
    pub fn new(researcher: Arc<dyn Researcher>, analyst: Arc<dyn Analyst>) -> Self {
        Self {
            researcher,
            analyst,
            scorer: Arc::new(KeywordScorer::default()),
        }
    }

    /// Validates the query and returns a run positioned before the input stage.
    pub fn start(&self, query: &str) -> Result<PipelineRun, PipelineError> {
        if query.trim().is_empty() {
            return Err(PipelineError::Validation(
                "query cannot be empty".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        info!("[{run_id}] Starting search for {:?}", query.trim());

        Ok(PipelineRun {
            pipeline: self.clone(),
            run_id,
            state: RunState::new(query),
            cursor: 0,
        })
    }

    /// Runs every stage and returns the final state.
    pub async fn run_search(&self, query: &str) -> Result<RunState, PipelineError> {
        let mut run = self.start(query)?;
        while run.advance().await?.is_some() {}
        Ok(run.into_state())
    }

    /// Lazily runs the pipeline, yielding a `Step` event per stage and then a
    /// single `Final` (or `Error`) event. Dropping the stream cancels the run
    /// before the next stage starts.
    pub fn stream_search(
        &self,
        query: &str,
    ) -> Result<impl Stream<Item = SearchEvent> + Send + 'static, PipelineError> {
        let mut run = self.start(query)?;

        Ok(stream! {
            loop {
                match run.advance().await {
                    Ok(Some((stage, delta))) => yield SearchEvent::Step { stage, delta },
                    Ok(None) => {
                        yield SearchEvent::Final { state: run.state().clone() };
                        break;
                    }
                    Err(e) => {
                        yield SearchEvent::Error { message: e.to_string() };
                        break;
                    }
                }
            }
        })
    }

    async fn execute(&self, stage: Stage, state: &RunState) -> Result<StateDelta, ServiceError> {
        let note = StateDelta::step(stage.note());

        let delta = match stage {
            Stage::Input => StateDelta {
                query: Some(state.query.trim().to_string()),
                ..note
            },
            Stage::Research => {
                let research_raw = self.researcher.research(&state.query).await?;
                StateDelta {
                    research_raw: Some(research_raw),
                    ..note
                }
            }
            Stage::Analyze => {
                let research_raw = state.research_raw.as_deref().unwrap_or_default();
                let analysis_raw = self.analyst.analyze(research_raw).await?;
                StateDelta {
                    analysis_raw: Some(analysis_raw),
                    ..note
                }
            }
            Stage::Aggregate => {
                let analysis_raw = state.analysis_raw.as_deref().unwrap_or_default();
                let normalized = normalize(extract_json(analysis_raw), self.scorer.as_ref());
                StateDelta {
                    opportunities: Some(rank(normalized.into_vec())),
                    ..note
                }
            }
            Stage::Finalize => {
                let opportunities = state.opportunities.as_deref().unwrap_or_default();
                StateDelta {
                    result_markdown: Some(render_report(opportunities)),
                    ..note
                }
            }
        };

        Ok(delta)
    }
}

/// One in-flight execution: the state so far and a cursor into `STAGES`.
pub struct PipelineRun {
    pipeline: SearchPipeline,
    run_id: Uuid,
    state: RunState,
    cursor: usize,
}

impl PipelineRun {
    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn into_state(self) -> RunState {
        self.state
    }

    pub fn next_stage(&self) -> Option<Stage> {
        STAGES.get(self.cursor).copied()
    }

    /// Executes the next stage and merges its delta.
    /// Returns `Ok(None)` once every stage has run. A failed stage ends the run.
    pub async fn advance(&mut self) -> Result<Option<(Stage, StateDelta)>, PipelineError> {
        let Some(stage) = self.next_stage() else {
            return Ok(None);
        };

        let outcome = self.pipeline.execute(stage, &self.state).await;
        match outcome {
            Ok(delta) => {
                self.state.apply(&delta);
                self.cursor += 1;
                info!("[{}] Stage {stage} complete", self.run_id);
                if stage == Stage::Aggregate {
                    let count = delta.opportunities.as_ref().map_or(0, Vec::len);
                    if count == 0 {
                        warn!("[{}] No opportunities could be extracted", self.run_id);
                    } else {
                        info!("[{}] Ranked {count} opportunities", self.run_id);
                    }
                }
                Ok(Some((stage, delta)))
            }
            Err(source) => {
                warn!("[{}] Stage {stage} failed: {source}", self.run_id);
                self.cursor = STAGES.len();
                Err(PipelineError::Stage {
                    stage,
                    source,
                    partial: Box::new(self.state.clone()),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const EV_RESEARCH: &str = r#"Here are the results:
[
  {"title": "A", "url": "https://x.com", "snippet": "market growth"},
  {"title": "B", "url": "https://b.com", "snippet": "charging network"},
  {"title": "C", "url": "https://c.com", "snippet": "fleet depots"},
  {"title": "D", "url": "https://d.com", "snippet": "grid services"},
  {"title": "E", "url": "https://e.com", "snippet": "home chargers"},
  {"title": "F", "url": "https://f.com", "snippet": "battery swap"}
]"#;

    const EV_ANALYSIS: &str = r#"{"opportunities": [
        {"title": "A", "summary": "market growth", "source": "x.com", "score": null},
        {"title": "B", "summary": "Highway charging network", "source": "b.com", "score": 62},
        {"title": "C", "summary": "Fleet depot charging", "source": "c.com", "score": 58},
        {"title": "D", "summary": "Vehicle-to-grid services", "source": "d.com", "score": "45"},
        {"title": "E", "summary": "Home charger installs", "source": "e.com", "score": 40},
        {"title": "F", "summary": "Battery swapping", "source": "f.com", "score": 35}
    ]}"#;

    struct StubResearcher {
        reply: Option<&'static str>,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl StubResearcher {
        fn replying(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(text),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Researcher for StubResearcher {
        async fn research(&self, query: &str) -> Result<String, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(query.to_string());
            self.reply.map(str::to_string).ok_or(ServiceError::Api {
                provider: "stub".to_string(),
                status: 502,
                message: "upstream down".to_string(),
            })
        }
    }

    struct StubAnalyst {
        reply: &'static str,
        seen: Mutex<Vec<String>>,
    }

    impl StubAnalyst {
        fn replying(text: &'static str) -> Arc<Self> {
            Arc::new(Self {
                reply: text,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Analyst for StubAnalyst {
        async fn analyze(&self, research_text: &str) -> Result<String, ServiceError> {
            self.seen.lock().unwrap().push(research_text.to_string());
            Ok(self.reply.to_string())
        }
    }

    fn ev_pipeline() -> SearchPipeline {
        SearchPipeline::new(
            StubResearcher::replying(EV_RESEARCH),
            StubAnalyst::replying(EV_ANALYSIS),
        )
    }

    #[test]
    fn test_stage_order_is_fixed() {
        let names: Vec<_> = STAGES.iter().map(Stage::as_str).collect();
        assert_eq!(
            names,
            vec!["input", "research", "analyze", "aggregate", "finalize"]
        );
    }

    #[tokio::test]
    async fn test_run_search_end_to_end() {
        let state = ev_pipeline().run_search("EV charging startups").await.unwrap();

        assert_eq!(state.query, "EV charging startups");
        assert_eq!(state.research_raw.as_deref(), Some(EV_RESEARCH));
        assert_eq!(state.analysis_raw.as_deref(), Some(EV_ANALYSIS));

        let opportunities = state.opportunities.as_ref().unwrap();
        assert_eq!(opportunities.len(), 6);
        assert_eq!(opportunities[0].title, "A");
        assert_eq!(opportunities[0].score, Some(70.0));

        let report = state.result_markdown.as_deref().unwrap();
        let first_entry = report.lines().find(|l| l.starts_with("1. ")).unwrap();
        assert_eq!(first_entry, "1. A (Score: 70)");

        assert_eq!(
            state.steps,
            STAGES.iter().map(|s| s.note()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_query_is_trimmed_before_research() {
        let researcher = StubResearcher::replying(EV_RESEARCH);
        let pipeline = SearchPipeline::new(researcher.clone(), StubAnalyst::replying("{}"));

        let state = pipeline.run_search("  EV charging startups \n").await.unwrap();
        assert_eq!(state.query, "EV charging startups");
        assert_eq!(
            *researcher.seen.lock().unwrap(),
            vec!["EV charging startups".to_string()]
        );
    }

    #[tokio::test]
    async fn test_analyst_receives_research_output() {
        let analyst = StubAnalyst::replying(EV_ANALYSIS);
        let pipeline = SearchPipeline::new(StubResearcher::replying(EV_RESEARCH), analyst.clone());

        pipeline.run_search("EV charging startups").await.unwrap();
        assert_eq!(*analyst.seen.lock().unwrap(), vec![EV_RESEARCH.to_string()]);
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected_before_any_stage() {
        let researcher = StubResearcher::replying(EV_RESEARCH);
        let pipeline = SearchPipeline::new(researcher.clone(), StubAnalyst::replying("{}"));

        assert!(matches!(
            pipeline.run_search("   ").await,
            Err(PipelineError::Validation(_))
        ));
        assert!(matches!(
            pipeline.stream_search(""),
            Err(PipelineError::Validation(_))
        ));
        assert_eq!(researcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_analysis_still_produces_report() {
        let pipeline = SearchPipeline::new(
            StubResearcher::replying(EV_RESEARCH),
            StubAnalyst::replying("Sorry, I cannot help with that."),
        );

        let state = pipeline.run_search("EV charging startups").await.unwrap();
        assert_eq!(state.opportunities, Some(vec![]));
        assert_eq!(
            state.result_markdown.as_deref(),
            Some("# NaviSmart AI Opportunity Search Results\n")
        );
        assert_eq!(state.steps.len(), STAGES.len());
    }

    #[tokio::test]
    async fn test_research_failure_keeps_partial_state() {
        let pipeline =
            SearchPipeline::new(StubResearcher::failing(), StubAnalyst::replying(EV_ANALYSIS));

        match pipeline.run_search("EV charging startups").await {
            Err(PipelineError::Stage { stage, partial, .. }) => {
                assert_eq!(stage, Stage::Research);
                assert_eq!(partial.steps, vec!["Received query"]);
                assert_eq!(partial.query, "EV charging startups");
                assert!(partial.research_raw.is_none());
            }
            other => panic!("expected research stage failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_run_does_not_continue() {
        let pipeline =
            SearchPipeline::new(StubResearcher::failing(), StubAnalyst::replying(EV_ANALYSIS));
        let mut run = pipeline.start("topic").unwrap();

        assert!(run.advance().await.unwrap().is_some());
        assert!(run.advance().await.is_err());
        assert!(run.next_stage().is_none());
        assert!(run.advance().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_emits_five_steps_then_final() {
        let events: Vec<SearchEvent> = ev_pipeline()
            .stream_search("EV charging startups")
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 6);
        for (event, expected) in events.iter().zip(STAGES.iter()) {
            match event {
                SearchEvent::Step { stage, delta } => {
                    assert_eq!(stage, expected);
                    assert_eq!(delta.step, expected.note());
                }
                other => panic!("expected step event, got {other:?}"),
            }
        }
        assert!(matches!(events[5], SearchEvent::Final { .. }));
    }

    #[tokio::test]
    async fn test_stream_final_state_matches_run_search() {
        let pipeline = ev_pipeline();
        let direct = pipeline.run_search("EV charging startups").await.unwrap();

        let events: Vec<SearchEvent> = pipeline
            .stream_search("EV charging startups")
            .unwrap()
            .collect()
            .await;
        let Some(SearchEvent::Final { state }) = events.last() else {
            panic!("stream did not end with a final event");
        };

        assert_eq!(state.opportunities, direct.opportunities);
        assert_eq!(state.result_markdown, direct.result_markdown);
        assert_eq!(state.steps, direct.steps);
    }

    #[tokio::test]
    async fn test_stream_step_deltas_carry_only_stage_fields() {
        let events: Vec<SearchEvent> = ev_pipeline()
            .stream_search("EV charging startups")
            .unwrap()
            .collect()
            .await;

        let SearchEvent::Step { delta, .. } = &events[1] else {
            panic!("expected research step");
        };
        assert!(delta.research_raw.is_some());
        assert!(delta.query.is_none());
        assert!(delta.analysis_raw.is_none());
        assert!(delta.opportunities.is_none());
    }

    #[tokio::test]
    async fn test_stream_error_event_after_failed_stage() {
        let pipeline =
            SearchPipeline::new(StubResearcher::failing(), StubAnalyst::replying(EV_ANALYSIS));
        let events: Vec<SearchEvent> = pipeline.stream_search("topic").unwrap().collect().await;

        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            SearchEvent::Step {
                stage: Stage::Input,
                ..
            }
        ));
        match &events[1] {
            SearchEvent::Error { message } => assert!(message.contains("research")),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dropping_stream_stops_remaining_stages() {
        let researcher = StubResearcher::replying(EV_RESEARCH);
        let pipeline = SearchPipeline::new(researcher.clone(), StubAnalyst::replying(EV_ANALYSIS));

        let first: Vec<SearchEvent> = pipeline
            .stream_search("topic")
            .unwrap()
            .take(1)
            .collect()
            .await;

        assert_eq!(first.len(), 1);
        assert_eq!(researcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_event_wire_format() {
        let event = SearchEvent::Step {
            stage: Stage::Research,
            delta: StateDelta::step("Completed research"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "step");
        assert_eq!(value["stage"], "research");
        assert_eq!(value["delta"]["step"], "Completed research");

        let value = serde_json::to_value(SearchEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["message"], "boom");
    }
}
