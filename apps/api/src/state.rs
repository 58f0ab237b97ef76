use crate::search::pipeline::SearchPipeline;

/// Shared application state injected into all route handlers via Axum extractors.
/// Holds no per-query data; each request starts its own pipeline run.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: SearchPipeline,
}
