mod config;
mod errors;
mod llm_client;
mod routes;
mod search;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::{ChatClient, Provider};
use crate::routes::build_router;
use crate::search::collaborators::{ChatAnalyst, ChatResearcher, FallbackResearcher};
use crate::search::pipeline::SearchPipeline;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing API keys)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_PKG_NAME").replace('-', "_"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Opportunity Search API v{}", env!("CARGO_PKG_VERSION"));

    let pipeline = build_pipeline(&config)?;
    let state = AppState { pipeline };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Wires the production collaborators: Perplexity research with OpenAI as the
/// fallback researcher, and OpenAI for analysis.
fn build_pipeline(config: &Config) -> Result<SearchPipeline> {
    let timeout = Duration::from_secs(config.http_timeout_secs);

    let openai = ChatClient::new(
        Provider::openai(&config.openai_api_key, &config.openai_model),
        timeout,
    )?;
    let perplexity = ChatClient::new(
        Provider::perplexity(&config.perplexity_api_key, &config.perplexity_model),
        timeout,
    )?;
    info!(
        "LLM clients initialized (research: {} → {}, analysis: {})",
        config.perplexity_model, config.openai_model, config.openai_model
    );

    let researcher = FallbackResearcher::new(
        Arc::new(ChatResearcher::perplexity(perplexity)),
        Arc::new(ChatResearcher::openai(openai.clone())),
    );
    let analyst = ChatAnalyst::new(openai);

    Ok(SearchPipeline::new(Arc::new(researcher), Arc::new(analyst)))
}
