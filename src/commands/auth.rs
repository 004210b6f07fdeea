use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::{hash_password, issue_token, verify_password};
use crate::state::AppState;
use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    fn validated(self) -> Result<(String, String)> {
        let email = self.email.trim().to_lowercase();
        if email.is_empty() || self.password.is_empty() {
            return Err(Error::InvalidInput(
                "Email and password are required".to_string(),
            ));
        }
        Ok((email, self.password))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub message: String,
    pub token: String,
    pub user_id: String,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthResponse>> {
    let (email, password) = body.validated()?;

    // bcrypt is CPU bound.
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| Error::Internal(e.to_string()))??;

    let user = state.db.create_user(&email, &password_hash)?;
    let token = issue_token(&user.id, &state.config.jwt_secret, state.config.token_ttl())?;
    tracing::info!(user_id = %user.id, "user signed up");

    Ok(Json(AuthResponse {
        message: "User created successfully".to_string(),
        token,
        user_id: user.id,
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<Credentials>,
) -> Result<Json<AuthResponse>> {
    let (email, password) = body.validated()?;
    let invalid = || Error::Unauthenticated("Invalid email or password".to_string());

    let user = state.db.get_user_by_email(&email)?.ok_or_else(invalid)?;
    let hash = user.password_hash.clone();
    let matches = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;
    if !matches {
        tracing::info!(user_id = %user.id, "login rejected");
        return Err(invalid());
    }

    let token = issue_token(&user.id, &state.config.jwt_secret, state.config.token_ttl())?;
    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        token,
        user_id: user.id,
    }))
}
