use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth;
use crate::state::AppState;
use crate::Error;

/// Id of the user a verified bearer token belongs to.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

/// Bearer token authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, Error> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            Error::Unauthenticated("Provide a token in the 'Authorization: Bearer <token>' header".to_string())
        })?;

    let user_id = auth::verify_token(token, &state.config.jwt_secret)?;
    request.extensions_mut().insert(AuthUser(user_id));

    Ok(next.run(request).await)
}

/// Logging middleware
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status,
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );

    response
}
