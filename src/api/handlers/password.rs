//! Password reset endpoints.

use super::utils::{extract_client_ip, valid_email};
use crate::api::state::{AuthState, RateLimitDisclosure};
use crate::codes::CodeError;
use crate::directory::normalize_email;
use axum::{
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tracing::{error, warn};
use utoipa::ToSchema;

pub const MIN_PASSWORD_LEN: usize = 8;

const GENERIC_RESET_MESSAGE: &str =
    "If an account exists for this email, a reset code has been sent.";

#[derive(ToSchema, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub email: String,
    pub code: String,
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

fn generic_reset_response() -> axum::response::Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: GENERIC_RESET_MESSAGE.to_string(),
        }),
    )
        .into_response()
}

/// Map a redemption failure to a status and a message safe to show the caller.
pub(super) fn code_error_response(err: &CodeError) -> (StatusCode, String) {
    match err {
        CodeError::InvalidCode => (StatusCode::BAD_REQUEST, "Invalid code".to_string()),
        CodeError::AlreadyUsed => (StatusCode::BAD_REQUEST, "Code already used".to_string()),
        CodeError::Expired => (StatusCode::BAD_REQUEST, "Code expired".to_string()),
        CodeError::TooManyAttempts => (
            StatusCode::BAD_REQUEST,
            "Too many attempts, request a new code".to_string(),
        ),
        CodeError::RateLimited(_) => (
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests, try again later".to_string(),
        ),
        CodeError::StorageUnavailable => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service unavailable".to_string(),
        ),
        CodeError::DeliveryFailed | CodeError::Hashing(_) | CodeError::Action(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Request failed".to_string(),
        ),
    }
}

/// Request a reset code. The answer never reveals whether the account exists.
#[utoipa::path(
    post,
    path = "/v1/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Request accepted", body = MessageResponse),
        (status = 400, description = "Invalid payload", body = String),
        (status = 429, description = "Rate limited", body = String)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let client_ip = extract_client_ip(&headers, peer);
    match auth_state
        .password_reset()
        .request_reset(&email, client_ip.as_deref())
        .await
    {
        Ok(_) => generic_reset_response(),
        Err(err @ CodeError::RateLimited(_))
            if auth_state.disclosure() == RateLimitDisclosure::Distinct =>
        {
            code_error_response(&err).into_response()
        }
        Err(CodeError::RateLimited(scope)) => {
            warn!(?scope, "Reset request rate limited");
            generic_reset_response()
        }
        Err(err) => {
            error!("Reset request failed: {err}");
            generic_reset_response()
        }
    }
}

/// Redeem a reset code and set a new password. Ends every session of the account.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid, used or expired code", body = String),
        (status = 503, description = "Storage unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.code.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string()).into_response();
    }
    if request.new_password.chars().count() < MIN_PASSWORD_LEN {
        return (
            StatusCode::BAD_REQUEST,
            format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        )
            .into_response();
    }

    match auth_state
        .password_reset()
        .reset_password(&request.email, &request.code, &request.new_password)
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Password has been reset".to_string(),
            }),
        )
            .into_response(),
        Err(err) => code_error_response(&err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::{fixture, fixture_with};
    use crate::directory::IdentityDirectory;
    use axum::http::HeaderValue;

    fn forwarded(ip: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(ip));
        headers
    }

    fn forgot(email: &str) -> Option<Json<ForgotPasswordRequest>> {
        Some(Json(ForgotPasswordRequest {
            email: email.to_string(),
        }))
    }

    #[tokio::test]
    async fn unknown_email_gets_generic_success() {
        let fixture = fixture().await;
        let response = forgot_password(
            None,
            forwarded("203.0.113.1"),
            Extension(fixture.state.clone()),
            forgot("nobody@example.com"),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(fixture.sender.sent().is_empty());
    }

    #[tokio::test]
    async fn rate_limit_disclosure_policy() {
        let fixture = fixture().await;
        let first = forgot_password(
            None,
            forwarded("203.0.113.1"),
            Extension(fixture.state.clone()),
            forgot("alice@example.com"),
        )
        .await
        .into_response();
        assert_eq!(first.status(), StatusCode::OK);

        let second = forgot_password(
            None,
            forwarded("203.0.113.2"),
            Extension(fixture.state.clone()),
            forgot("alice@example.com"),
        )
        .await
        .into_response();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let generic = fixture_with(RateLimitDisclosure::Generic).await;
        for ip in ["203.0.113.1", "203.0.113.2"] {
            let response = forgot_password(
                None,
                forwarded(ip),
                Extension(generic.state.clone()),
                forgot("alice@example.com"),
            )
            .await
            .into_response();
            assert_eq!(response.status(), StatusCode::OK);
        }
        assert_eq!(generic.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn direct_client_is_limited_by_peer_address() {
        let fixture = fixture().await;
        fixture
            .directory
            .insert("bob@example.com", "battery staple")
            .await
            .expect("seed bob");
        let peer: SocketAddr = "198.51.100.20:52000".parse().expect("addr");

        let mut statuses = Vec::new();
        for email in ["alice@example.com", "bob@example.com"] {
            let response = forgot_password(
                Some(ConnectInfo(peer)),
                HeaderMap::new(),
                Extension(fixture.state.clone()),
                forgot(email),
            )
            .await
            .into_response();
            statuses.push(response.status());
        }

        assert_eq!(statuses, [StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]);
        assert_eq!(fixture.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn reset_password_with_emailed_code() {
        let fixture = fixture().await;
        forgot_password(
            None,
            HeaderMap::new(),
            Extension(fixture.state.clone()),
            forgot("alice@example.com"),
        )
        .await;
        let code = fixture
            .sender
            .last_code_for("alice@example.com")
            .expect("code sent");

        let short = reset_password(
            Extension(fixture.state.clone()),
            Some(Json(ResetPasswordRequest {
                email: "alice@example.com".to_string(),
                code: code.clone(),
                new_password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(short.status(), StatusCode::BAD_REQUEST);

        let response = reset_password(
            Extension(fixture.state.clone()),
            Some(Json(ResetPasswordRequest {
                email: "alice@example.com".to_string(),
                code: code.to_lowercase(),
                new_password: "a brand new password".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(fixture
            .directory
            .verify_password("alice@example.com", "a brand new password")
            .await
            .expect("verify")
            .is_some());

        let replay = reset_password(
            Extension(fixture.state.clone()),
            Some(Json(ResetPasswordRequest {
                email: "alice@example.com".to_string(),
                code,
                new_password: "yet another password".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(replay.status(), StatusCode::BAD_REQUEST);
    }
}
