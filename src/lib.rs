//! Cricket question-answering backend.
//!
//! Signed-up users chat with a retrieval-augmented model that only answers
//! questions about cricket. Requests are rate limited per user over a fixed
//! window, off-topic questions are rejected before retrieval, and every
//! exchange is persisted.

pub mod auth;
pub mod commands;
pub mod config;
pub mod db;
pub mod doc_processor;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod middleware;
pub mod query_gate;
pub mod rag;
pub mod rate_limit;
pub mod state;

pub use config::Config;
pub use error::{Error, Result};
pub use state::AppState;

use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::commands::{auth as auth_routes, chat, health_check, knowledge};
use crate::middleware::{log_requests, require_auth};

/// Build the router.
///
/// `/health` and the auth routes are public. Chat and document routes need a
/// bearer token.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(auth_routes::signup))
        .route("/api/auth/login", post(auth_routes::login));

    let protected_routes = Router::new()
        .route("/api/chat", post(chat::send_message))
        .route("/api/chat/{chat_id}", get(chat::get_messages))
        .route(
            "/api/documents",
            get(knowledge::list_documents).post(knowledge::upload_document),
        )
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.request_timeout(),
        ))
        .layer(cors)
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `log_level`.
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Serve until SIGTERM or Ctrl+C.
pub async fn start_server(config: Config) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let state = AppState::from_config(config)?;

    tracing::info!(
        %addr,
        provider = %state.config.llm_provider,
        chat_model = %state.config.chat_model,
        rate_limiter = ?state.config.rate_limiter,
        rate_limit = state.config.rate_limit_max_requests,
        window_secs = state.config.rate_limit_window_secs,
        "Starting cricket-chat server"
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
