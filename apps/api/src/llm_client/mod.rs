//! LLM Client: the single point of entry for all chat-completion calls.
//!
//! Both providers used by the search pipeline (OpenAI and Perplexity) speak the
//! OpenAI-compatible `/chat/completions` wire format, so one client type serves
//! both; a `ChatClient` is bound to exactly one provider endpoint and model.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const PERPLEXITY_API_URL: &str = "https://api.perplexity.ai/chat/completions";
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Failure of an upstream research or analysis service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{provider} API error (status {status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Failed to decode {provider} response: {source}")]
    Decode {
        provider: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{provider} rate limited after {retries} retries")]
    RateLimited { provider: String, retries: u32 },

    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),
}

/// One upstream chat-completion endpoint.
#[derive(Debug, Clone)]
pub struct Provider {
    /// Human-readable label used in logs and error messages.
    pub name: String,
    pub url: String,
    pub api_key: String,
    pub model: String,
}

impl Provider {
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "OpenAI".to_string(),
            url: OPENAI_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn perplexity(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: "Perplexity".to_string(),
            url: PERPLEXITY_API_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage<'a> {
    pub role: &'a str,
    pub content: &'a str,
}

impl<'a> ChatMessage<'a> {
    pub fn system(content: &'a str) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    pub fn user(content: &'a str) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    temperature: f32,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<Choice>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub struct Choice {
    pub message: Option<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl ChatResponse {
    /// Extracts the message content of the first choice.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.as_ref())
            .and_then(|m| m.content.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

/// Chat-completion client bound to a single provider.
/// Retries rate limits and server errors with exponential backoff.
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    provider: Provider,
    backoff: Duration,
}

impl ChatClient {
    pub fn new(provider: Provider, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::ClientBuild(e.to_string()))?;
        Ok(Self {
            client,
            provider,
            backoff: INITIAL_BACKOFF,
        })
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    /// Sends the conversation and returns the first choice's text.
    /// A response without content yields an empty string rather than an error.
    pub async fn complete(&self, messages: &[ChatMessage<'_>]) -> Result<String, ServiceError> {
        let response = self.call(messages).await?;
        match response.text() {
            Some(text) => Ok(text.to_string()),
            None => {
                warn!("{} returned no message content", self.provider.name);
                Ok(String::new())
            }
        }
    }

    /// Makes a raw call to the provider, returning the full response object.
    pub async fn call(&self, messages: &[ChatMessage<'_>]) -> Result<ChatResponse, ServiceError> {
        let request_body = ChatRequest {
            model: &self.provider.model,
            messages,
            temperature: 0.0,
        };

        let mut last_error: Option<ServiceError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = self.backoff * 2u32.pow(attempt - 1);
                warn!(
                    "{} call attempt {} failed, retrying after {}ms...",
                    self.provider.name,
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&self.provider.url)
                .bearer_auth(&self.provider.api_key)
                .header("accept", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(ServiceError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("{} API returned {}: {}", self.provider.name, status, body);
                last_error = Some(ServiceError::Api {
                    provider: self.provider.name.clone(),
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ServiceError::Api {
                    provider: self.provider.name.clone(),
                    status: status.as_u16(),
                    message: api_error_message(body),
                });
            }

            let body = response.text().await?;
            let chat_response: ChatResponse =
                serde_json::from_str(&body).map_err(|source| ServiceError::Decode {
                    provider: self.provider.name.clone(),
                    source,
                })?;

            if let Some(usage) = &chat_response.usage {
                debug!(
                    "{} call succeeded: prompt_tokens={}, completion_tokens={}",
                    self.provider.name, usage.prompt_tokens, usage.completion_tokens
                );
            }

            return Ok(chat_response);
        }

        Err(last_error.unwrap_or(ServiceError::RateLimited {
            provider: self.provider.name.clone(),
            retries: MAX_RETRIES,
        }))
    }
}

/// Pulls `error.message` out of an OpenAI-style error body, falling back to the raw body.
fn api_error_message(body: String) -> String {
    serde_json::from_str::<ApiErrorEnvelope>(&body)
        .map(|e| e.error.message)
        .unwrap_or(body)
}
