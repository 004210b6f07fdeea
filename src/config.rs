use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::rag::RagSettings;
use crate::rate_limit::RateLimitPolicy;

/// Where per-user request counters live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimiterKind {
    /// Counters on the user row. Safe with several server processes.
    Sqlite,
    /// Process-local counters.
    Memory,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// HS256 signing secret. A random one is generated when empty.
    #[serde(default)]
    pub jwt_secret: String,

    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: u64,

    #[serde(default = "default_rate_limit_max_requests")]
    pub rate_limit_max_requests: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    #[serde(default = "default_rate_limiter")]
    pub rate_limiter: RateLimiterKind,

    /// One of `gemini`, `openai`, `ollama`, `claude`.
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,

    #[serde(default)]
    pub llm_api_key: String,

    /// Empty keeps the provider's default endpoint.
    #[serde(default)]
    pub llm_base_url: String,

    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Bound on each model call (classifier, embedding, generation).
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,

    /// Bound on a whole HTTP request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            port: default_port(),
            database_path: default_database_path(),
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
            rate_limit_max_requests: default_rate_limit_max_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limiter: default_rate_limiter(),
            llm_provider: default_llm_provider(),
            llm_api_key: String::new(),
            llm_base_url: String::new(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            similarity_threshold: default_similarity_threshold(),
            top_k: default_top_k(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Config {
    /// Load from `.env`, an optional `cricket-chat` config file and
    /// `CRICKET_CHAT__*` environment variables, in increasing precedence.
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let builder = config::Config::builder()
            .add_source(config::File::with_name("cricket-chat").required(false))
            .add_source(config::Environment::with_prefix("CRICKET_CHAT").separator("__"));

        let config: Config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Fill in a random signing secret when none is configured.
    pub fn ensure_jwt_secret(&mut self) {
        if self.jwt_secret.is_empty() {
            tracing::warn!("No jwt_secret configured, tokens will not survive a restart");
            self.jwt_secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );
        }
    }

    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.bind_addr, self.port);
        Ok(addr_str.parse()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_hours * 3600)
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            limit: self.rate_limit_max_requests,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }

    pub fn rag_settings(&self) -> RagSettings {
        RagSettings {
            top_k: self.top_k,
            similarity_threshold: self.similarity_threshold,
            upstream_timeout: self.upstream_timeout(),
            ..RagSettings::default()
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/cricket-chat.db")
}

fn default_token_ttl_hours() -> u64 {
    24 * 7
}

fn default_rate_limit_max_requests() -> u32 {
    20
}

fn default_rate_limit_window_secs() -> u64 {
    3600
}

fn default_rate_limiter() -> RateLimiterKind {
    RateLimiterKind::Sqlite
}

fn default_llm_provider() -> String {
    "gemini".to_string()
}

fn default_chat_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_embedding_model() -> String {
    "embedding-001".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    90
}

fn default_similarity_threshold() -> f32 {
    0.7
}

fn default_top_k() -> usize {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}
