//! Chat orchestration: rate limit, domain gate, retrieval, generation, log.
//!
//! ```text
//! Received -> RateLimitChecked -> DomainGated -> Retrieved -> Generated -> Persisted -> Returned
//!                   |                  |
//!                Rejected           Rejected
//! ```
//!
//! The rate limit and the domain gate reject precisely. Generation failures
//! never reach the caller: they turn into the domain's fallback response.
//! Storage failures propagate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::models::{ChatExchange, Document};
use crate::embedding::{rank_documents, Embedder};
use crate::llm::TextGenerator;
use crate::query_gate::DomainGate;
use crate::rate_limit::RateLimiter;
use crate::{Error, Result};

/// Read access to the document collection.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn list_documents(&self) -> Result<Vec<Document>>;
}

/// Append-only store of chat exchanges.
#[async_trait]
pub trait ExchangeLog: Send + Sync {
    async fn append_exchange(&self, exchange: &ChatExchange) -> Result<()>;

    async fn conversation(&self, user_id: &str, conversation_id: &str) -> Result<Vec<ChatExchange>>;
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub top_k: usize,
    pub similarity_threshold: f32,
    pub upstream_timeout: Duration,
    /// Characters of context kept on the stored exchange.
    pub stored_context_chars: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            similarity_threshold: 0.7,
            upstream_timeout: Duration::from_secs(30),
            stored_context_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub response: String,
    #[serde(rename = "chatId")]
    pub conversation_id: String,
    pub timestamp: DateTime<Utc>,
}

pub struct ChatService {
    rate_limiter: Arc<dyn RateLimiter>,
    knowledge: Arc<dyn KnowledgeBase>,
    exchanges: Arc<dyn ExchangeLog>,
    generator: Arc<dyn TextGenerator>,
    embedder: Arc<dyn Embedder>,
    gate: DomainGate,
    settings: RagSettings,
}

impl ChatService {
    pub fn new(
        rate_limiter: Arc<dyn RateLimiter>,
        knowledge: Arc<dyn KnowledgeBase>,
        exchanges: Arc<dyn ExchangeLog>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
        gate: DomainGate,
        settings: RagSettings,
    ) -> Self {
        Self {
            rate_limiter,
            knowledge,
            exchanges,
            generator,
            embedder,
            gate,
            settings,
        }
    }

    /// Answer one chat message for `user_id`.
    pub async fn respond(
        &self,
        user_id: &str,
        message: &str,
        conversation_id: Option<String>,
    ) -> Result<ChatReply> {
        let now = Utc::now().trunc_subsecs(3);

        let admission = self.rate_limiter.admit(user_id, now).await?;
        if !admission.allowed {
            info!(user_id, reset_at = %admission.reset_at, "chat request rate limited");
            return Err(Error::RateLimited {
                reset_at: admission.reset_at,
            });
        }
        debug!(user_id, remaining = admission.remaining, "rate limit checked");

        let query = message.trim();
        if query.is_empty() {
            return Err(Error::InvalidInput("Message is required".to_string()));
        }

        if let Err(e) = self
            .gate
            .ensure_in_domain(query, self.generator.as_ref())
            .await
        {
            info!(user_id, "chat request rejected as out of domain");
            return Err(e);
        }
        debug!(user_id, "domain gate passed");

        let documents = self.knowledge.list_documents().await?;
        let context = if documents.is_empty() {
            String::new()
        } else {
            self.retrieve_context(query, &documents).await?
        };
        debug!(user_id, context_chars = context.chars().count(), "context retrieved");

        let response = self.generate_answer(query, &context).await;

        let conversation_id = conversation_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let exchange = ChatExchange {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            message: message.to_string(),
            response: response.clone(),
            context: truncate_chars(&context, self.settings.stored_context_chars),
            timestamp: now,
            conversation_id: conversation_id.clone(),
        };
        self.exchanges.append_exchange(&exchange).await?;
        debug!(user_id, conversation_id = %conversation_id, "exchange persisted");

        Ok(ChatReply {
            response,
            conversation_id,
            timestamp: now,
        })
    }

    /// Exchanges of one conversation, oldest first.
    pub async fn history(&self, user_id: &str, conversation_id: &str) -> Result<Vec<ChatExchange>> {
        self.exchanges.conversation(user_id, conversation_id).await
    }

    /// Space-joined content of the best matching documents.
    ///
    /// An unavailable embedder costs the answer its context, not the request.
    async fn retrieve_context(&self, message: &str, documents: &[Document]) -> Result<String> {
        let query = match tokio::time::timeout(
            self.settings.upstream_timeout,
            self.embedder.embed(message),
        )
        .await
        {
            Ok(Ok(query)) => query,
            Ok(Err(e)) => {
                warn!(error = %e, "query embedding failed, answering without context");
                return Ok(String::new());
            }
            Err(_) => {
                warn!("query embedding timed out, answering without context");
                return Ok(String::new());
            }
        };

        // Vectors of another dimension cannot be compared.
        let comparable: Vec<Document> = documents
            .iter()
            .filter(|d| d.embedding.as_ref().is_some_and(|e| e.len() == query.len()))
            .cloned()
            .collect();
        let skipped = documents.iter().filter(|d| d.embedding.is_some()).count() - comparable.len();
        if skipped > 0 {
            warn!(skipped, dimension = query.len(), "skipping documents with mismatched embedding dimension");
        }

        let ranked = rank_documents(&query, &comparable, self.settings.similarity_threshold)?;
        Ok(ranked
            .iter()
            .take(self.settings.top_k)
            .map(|r| r.document.content.as_str())
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn generate_answer(&self, message: &str, context: &str) -> String {
        let prompt = self.gate.config().render_answer_prompt(message, context);
        match tokio::time::timeout(self.settings.upstream_timeout, self.generator.generate(&prompt))
            .await
        {
            Ok(Ok(answer)) if !answer.trim().is_empty() => answer,
            Ok(Ok(_)) => {
                warn!("generation returned an empty answer, using fallback response");
                self.gate.config().fallback_response.clone()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "generation failed, using fallback response");
                self.gate.config().fallback_response.clone()
            }
            Err(_) => {
                warn!("generation timed out, using fallback response");
                self.gate.config().fallback_response.clone()
            }
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
