use std::sync::Arc;

use crate::config::{Config, RateLimiterKind};
use crate::db::Database;
use crate::embedding::Embedder;
use crate::llm::{LlmBackend, Provider, TextGenerator};
use crate::query_gate::{DomainConfig, DomainGate};
use crate::rag::ChatService;
use crate::rate_limit::{MemoryRateLimiter, PersistentRateLimiter, RateLimiter};
use crate::{Error, Result};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub chat: Arc<ChatService>,
    /// Also used by document ingestion.
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    /// Open the database and bind the configured model provider.
    pub fn from_config(mut config: Config) -> Result<Self> {
        config.ensure_jwt_secret();
        let db = Arc::new(Database::new(&config.database_path)?);
        let provider = Provider::from_name(
            &config.llm_provider,
            config.llm_api_key.clone(),
            &config.llm_base_url,
        )
        .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let backend = Arc::new(LlmBackend {
            provider,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
        });
        Ok(Self::assemble(config, db, backend.clone(), backend))
    }

    pub fn assemble(
        config: Config,
        db: Arc<Database>,
        generator: Arc<dyn TextGenerator>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let policy = config.rate_limit_policy();
        let rate_limiter: Arc<dyn RateLimiter> = match config.rate_limiter {
            RateLimiterKind::Sqlite => Arc::new(PersistentRateLimiter::new(db.clone(), policy)),
            RateLimiterKind::Memory => Arc::new(MemoryRateLimiter::new(policy)),
        };

        let chat = ChatService::new(
            rate_limiter,
            db.clone(),
            db.clone(),
            generator,
            embedder.clone(),
            DomainGate::new(DomainConfig::cricket(), config.upstream_timeout()),
            config.rag_settings(),
        );

        Self {
            config: Arc::new(config),
            db,
            chat: Arc::new(chat),
            embedder,
        }
    }
}
