pub mod claude;
pub mod gemini;
pub mod openai;

use crate::embedding::{self, Embedder, Embedding};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub model: String,
}

/// Produces text for a single prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Model provider. Dispatches to Gemini, OpenAI-compatible or Claude backends.
#[derive(Debug, Clone)]
pub enum Provider {
    Gemini(gemini::GeminiConfig),
    OpenAi(openai::OpenAiConfig),
    Claude(claude::ClaudeConfig),
    Ollama(openai::OpenAiConfig),
}

impl Provider {
    pub fn gemini(api_key: String) -> Self {
        Provider::Gemini(gemini::GeminiConfig {
            api_key,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        })
    }

    pub fn openai(api_key: String) -> Self {
        Provider::OpenAi(openai::OpenAiConfig {
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        })
    }

    pub fn claude(api_key: String) -> Self {
        Provider::Claude(claude::ClaudeConfig {
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
        })
    }

    pub fn ollama(host: String) -> Self {
        Provider::Ollama(openai::OpenAiConfig {
            api_key: String::new(),
            base_url: format!("{}/v1", host),
        })
    }

    /// Build a provider from its configured name. An empty `base_url` keeps the vendor default.
    pub fn from_name(name: &str, api_key: String, base_url: &str) -> Result<Self, LlmError> {
        let mut provider = match name {
            "gemini" => Provider::gemini(api_key),
            "openai" => Provider::openai(api_key),
            "claude" => Provider::claude(api_key),
            "ollama" => {
                let host = if base_url.is_empty() {
                    "http://localhost:11434"
                } else {
                    base_url
                };
                return Ok(Provider::ollama(host.trim_end_matches('/').to_string()));
            }
            other => return Err(LlmError::Unsupported(format!("unknown provider '{other}'"))),
        };

        if !base_url.is_empty() {
            let base_url = base_url.trim_end_matches('/').to_string();
            match &mut provider {
                Provider::Gemini(config) => config.base_url = base_url,
                Provider::OpenAi(config) | Provider::Ollama(config) => config.base_url = base_url,
                Provider::Claude(config) => config.base_url = base_url,
            }
        }
        Ok(provider)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Provider::Gemini(_) => "gemini",
            Provider::OpenAi(_) => "openai",
            Provider::Claude(_) => "claude",
            Provider::Ollama(_) => "ollama",
        }
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        match self {
            Provider::Gemini(config) => gemini::chat(config, request).await,
            Provider::OpenAi(config) | Provider::Ollama(config) => {
                openai::chat(config, request).await
            }
            Provider::Claude(config) => claude::chat(config, request).await,
        }
    }

    pub async fn embed(&self, model: &str, text: &str) -> Result<Embedding, LlmError> {
        match self {
            Provider::Gemini(config) => gemini::embed(config, model, text).await,
            Provider::OpenAi(config) | Provider::Ollama(config) => {
                embedding::generate_embeddings(config, &[text.to_string()], model)
                    .await?
                    .into_iter()
                    .next()
                    .ok_or_else(|| LlmError::Parse("no embedding returned".to_string()))
            }
            Provider::Claude(_) => Err(LlmError::Unsupported(
                "Anthropic does not offer an embeddings API".to_string(),
            )),
        }
    }
}

/// A provider bound to the models used for answering and for embeddings.
#[derive(Debug, Clone)]
pub struct LlmBackend {
    pub provider: Provider,
    pub chat_model: String,
    pub embedding_model: String,
}

#[async_trait]
impl TextGenerator for LlmBackend {
    async fn generate(&self, prompt: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            messages: vec![ChatMessage::user(prompt)],
            model: self.chat_model.clone(),
        };
        Ok(self.provider.chat(&request).await?.content)
    }
}

#[async_trait]
impl Embedder for LlmBackend {
    async fn embed(&self, text: &str) -> Result<Embedding, LlmError> {
        self.provider.embed(&self.embedding_model, text).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
}
