//! External collaborators of the search pipeline.
//!
//! The pipeline only sees two text-in/text-out traits. Production wiring uses
//! chat-completion backed implementations; tests substitute in-memory stubs.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::llm_client::prompts::{ANALYSIS_SYSTEM, RESEARCH_PROMPT_TEMPLATE, RESEARCH_SYSTEM};
use crate::llm_client::{ChatClient, ChatMessage, ServiceError};

/// Given a topic, returns free text (ideally a JSON array of candidate items).
#[async_trait]
pub trait Researcher: Send + Sync {
    async fn research(&self, query: &str) -> Result<String, ServiceError>;
}

/// Given prior research text, returns free text (ideally `{"opportunities": [...]}`).
#[async_trait]
pub trait Analyst: Send + Sync {
    async fn analyze(&self, research_text: &str) -> Result<String, ServiceError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Two-tier research strategy
// ────────────────────────────────────────────────────────────────────────────

/// Tries the primary researcher; on any failure tries the secondary.
/// The secondary's error is what the caller sees when both fail.
pub struct FallbackResearcher {
    primary: Arc<dyn Researcher>,
    secondary: Arc<dyn Researcher>,
}

impl FallbackResearcher {
    pub fn new(primary: Arc<dyn Researcher>, secondary: Arc<dyn Researcher>) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl Researcher for FallbackResearcher {
    async fn research(&self, query: &str) -> Result<String, ServiceError> {
        match self.primary.research(query).await {
            Ok(text) => Ok(text),
            Err(e) => {
                warn!("Primary research provider failed, falling back: {e}");
                self.secondary.research(query).await
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Chat-completion backed implementations
// ────────────────────────────────────────────────────────────────────────────

/// Research via a chat-completion provider.
/// Perplexity gets the bare user prompt; OpenAI additionally gets a system prompt.
pub struct ChatResearcher {
    client: ChatClient,
    system: Option<&'static str>,
}

impl ChatResearcher {
    pub fn perplexity(client: ChatClient) -> Self {
        Self {
            client,
            system: None,
        }
    }

    pub fn openai(client: ChatClient) -> Self {
        Self {
            client,
            system: Some(RESEARCH_SYSTEM),
        }
    }
}

#[async_trait]
impl Researcher for ChatResearcher {
    async fn research(&self, query: &str) -> Result<String, ServiceError> {
        let prompt = RESEARCH_PROMPT_TEMPLATE.replace("{topic}", query);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = self.system {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(&prompt));

        info!("Requesting research from {}", self.client.provider().name);
        self.client.complete(&messages).await
    }
}

/// Structures and scores research output via a chat-completion provider.
pub struct ChatAnalyst {
    client: ChatClient,
}

impl ChatAnalyst {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Analyst for ChatAnalyst {
    async fn analyze(&self, research_text: &str) -> Result<String, ServiceError> {
        let messages = [
            ChatMessage::system(ANALYSIS_SYSTEM),
            ChatMessage::user(research_text),
        ];
        info!("Requesting analysis from {}", self.client.provider().name);
        self.client.complete(&messages).await
    }
}
