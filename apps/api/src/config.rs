use anyhow::{Context, Result};

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_PERPLEXITY_MODEL: &str = "llama-3.1-sonar-large-128k-online";

/// Application configuration loaded from environment variables.
/// Fails at startup if a provider API key is missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub openai_api_key: String,
    pub openai_model: String,
    pub perplexity_api_key: String,
    pub perplexity_model: String,
    pub http_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            openai_api_key: require_env("OPENAI_API_KEY")?,
            openai_model: optional_env("OPENAI_MODEL", DEFAULT_OPENAI_MODEL),
            perplexity_api_key: require_env("PERPLEXITY_API_KEY")?,
            perplexity_model: optional_env("PERPLEXITY_MODEL", DEFAULT_PERPLEXITY_MODEL),
            http_timeout_secs: optional_env("HTTP_TIMEOUT_SECS", "60")
                .parse::<u64>()
                .context("HTTP_TIMEOUT_SECS must be a whole number of seconds")?,
            port: optional_env("PORT", "8080")
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: optional_env("RUST_LOG", "info"),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("Missing required environment variable: {key}"))
}

fn optional_env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}
