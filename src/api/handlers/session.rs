//! Login, token rotation, logout and the current identity.

use super::utils::{bearer_token, valid_email};
use crate::api::state::AuthState;
use crate::directory::{normalize_email, Identity};
use crate::session::{TokenError, TokenKind, TokenPair};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl From<TokenPair> for TokenResponse {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: "Bearer".to_string(),
        }
    }
}

pub(super) fn token_error_response(err: &TokenError) -> (StatusCode, String) {
    match err {
        TokenError::Malformed | TokenError::WrongKind { .. } => {
            (StatusCode::UNAUTHORIZED, "Invalid token".to_string())
        }
        TokenError::Expired => (StatusCode::UNAUTHORIZED, "Token expired".to_string()),
        TokenError::Revoked => (StatusCode::UNAUTHORIZED, "Token revoked".to_string()),
        TokenError::UnknownIdentity => (StatusCode::UNAUTHORIZED, "Unknown user".to_string()),
        TokenError::DirectoryUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable".to_string(),
        ),
        TokenError::Encoding(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Token issuance failed".to_string(),
        ),
    }
}

fn missing_token() -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, "Missing bearer token".to_string()).into_response()
}

/// Exchange email and password for an access/refresh token pair.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Authenticated", body = TokenResponse),
        (status = 400, description = "Invalid payload", body = String),
        (status = 401, description = "Invalid credentials", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "Invalid credentials format".to_string())
            .into_response();
    }

    let identity = match auth_state
        .directory()
        .verify_password(&email, &request.password)
        .await
    {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            return (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string()).into_response()
        }
        Err(err) => {
            error!("Failed to verify credentials: {err}");
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            )
                .into_response();
        }
    };

    match auth_state.sessions().login(&identity.email) {
        Ok(pair) => (StatusCode::OK, Json(TokenResponse::from(pair))).into_response(),
        Err(err) => token_error_response(&err).into_response(),
    }
}

/// Rotate a refresh token. The presented token stops working.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    params(
        ("Authorization" = String, Header, description = "Bearer refresh token")
    ),
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token", body = String)
    ),
    tag = "auth"
)]
pub async fn refresh(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return missing_token();
    };

    match auth_state.sessions().refresh(token).await {
        Ok(pair) => (StatusCode::OK, Json(TokenResponse::from(pair))).into_response(),
        Err(err) => token_error_response(&err).into_response(),
    }
}

/// End every session of the refresh token's owner.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    params(
        ("Authorization" = String, Header, description = "Bearer refresh token")
    ),
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Invalid, expired or revoked token", body = String)
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return missing_token();
    };

    match auth_state.sessions().logout(token).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => token_error_response(&err).into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Current identity", body = Identity),
        (status = 401, description = "Invalid, expired or revoked token", body = String)
    ),
    tag = "auth"
)]
pub async fn me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = bearer_token(&headers) else {
        return missing_token();
    };

    match auth_state.sessions().validate(token, TokenKind::Access).await {
        Ok(identity) => (StatusCode::OK, Json(identity)).into_response(),
        Err(err) => token_error_response(&err).into_response(),
    }
}
