//! Axum route handlers for the Search API.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    Json,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::errors::AppError;
use crate::search::normalizer::Opportunity;
use crate::search::pipeline::{SearchEvent, SearchPipeline};
use crate::search::run_state::RunState;
use crate::state::AppState;

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub steps: Vec<String>,
    pub opportunities: Vec<Opportunity>,
    pub result_markdown: String,
}

impl From<RunState> for SearchResponse {
    fn from(state: RunState) -> Self {
        Self {
            query: state.query,
            steps: state.steps,
            opportunities: state.opportunities.unwrap_or_default(),
            result_markdown: state.result_markdown.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub q: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// POST /api/search
///
/// Runs the full pipeline and returns the final state.
pub async fn handle_search(
    State(state): State<AppState>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    let outcome = state.pipeline.run_search(&request.query).await?;
    Ok(Json(SearchResponse::from(outcome)))
}

/// GET /ws
///
/// Streams pipeline progress. The query comes from `?q=` or, failing that,
/// the first text message (`{"query": "..."}` or raw text).
pub async fn handle_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    ws.on_upgrade(move |socket| stream_search_over_socket(socket, state.pipeline, params.q))
}

async fn stream_search_over_socket(
    socket: WebSocket,
    pipeline: SearchPipeline,
    query_param: Option<String>,
) {
    let (mut sender, mut receiver) = socket.split();
    relay_search(&mut sender, &mut receiver, &pipeline, query_param).await;
}

/// Drives one streamed search between a client's outgoing sink and incoming
/// frames: ack first, then every pipeline event until the terminal one. A
/// close frame or dropped connection stops the run. The sink is always closed.
async fn relay_search<S, R, E>(
    sender: &mut S,
    receiver: &mut R,
    pipeline: &SearchPipeline,
    query_param: Option<String>,
) where
    S: Sink<Message> + Unpin,
    R: Stream<Item = Result<Message, E>> + Unpin,
{
    let query = match query_param.filter(|q| !q.trim().is_empty()) {
        Some(q) => q.trim().to_string(),
        None => match receiver.next().await {
            Some(Ok(Message::Text(text))) => query_from_message(&text),
            _ => String::new(),
        },
    };

    let events = match pipeline.stream_search(&query) {
        Ok(events) => events,
        Err(e) => {
            info!("Rejecting stream request: {e}");
            send_json(sender, &json!({"type": "error", "message": "Missing query"})).await;
            let _ = sender.close().await;
            return;
        }
    };

    if !send_json(sender, &json!({"type": "ack", "query": query})).await {
        let _ = sender.close().await;
        return;
    }

    let mut events = Box::pin(events);
    loop {
        tokio::select! {
            // Disconnects are checked first so a closed client never starts another stage.
            biased;

            incoming = receiver.next() => {
                if matches!(incoming, None | Some(Err(_)) | Some(Ok(Message::Close(_)))) {
                    info!("Stream listener disconnected; stopping search");
                    break;
                }
            }
            event = events.next() => {
                let Some(event) = event else { break };
                let terminal = !matches!(event, SearchEvent::Step { .. });
                if !send_json(sender, &event).await {
                    info!("Stream listener went away; stopping search");
                    break;
                }
                if terminal {
                    break;
                }
            }
        }
    }

    let _ = sender.close().await;
}

/// Serializes `payload` as one text frame. Returns whether it was delivered.
async fn send_json<S, T>(sender: &mut S, payload: &T) -> bool
where
    S: Sink<Message> + Unpin,
    T: Serialize,
{
    match serde_json::to_string(payload) {
        Ok(text) => sender.send(Message::Text(text)).await.is_ok(),
        Err(e) => {
            warn!("Failed to serialize stream payload: {e}");
            false
        }
    }
}

/// A JSON object's `query` field if the message is one, otherwise the raw text.
fn query_from_message(text: &str) -> String {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(fields)) => fields
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        _ => text.trim().to_string(),
    }
}
