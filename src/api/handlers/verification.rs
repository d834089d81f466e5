//! Email verification endpoints.

use super::password::code_error_response;
use super::utils::valid_email;
use crate::api::state::AuthState;
use crate::directory::normalize_email;
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize, Debug)]
pub struct SendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

/// Send a verification code (always returns 204 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/v1/auth/send-verification",
    request_body = SendVerificationRequest,
    responses(
        (status = 204, description = "Request accepted")
    ),
    tag = "auth"
)]
pub async fn send_verification(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SendVerificationRequest>>,
) -> impl IntoResponse {
    let Some(Json(request)) = payload else {
        return StatusCode::NO_CONTENT;
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::NO_CONTENT;
    }

    if let Err(err) = auth_state.verification().send_code(&email).await {
        error!("Failed to send verification code: {err}");
    }
    StatusCode::NO_CONTENT
}

/// Redeem a verification code and mark the email verified.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid, used or expired code", body = String),
        (status = 503, description = "Storage unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if request.code.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "Missing code".to_string()).into_response();
    }

    match auth_state
        .verification()
        .verify_email(&request.email, &request.code)
        .await
    {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => code_error_response(&err).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::test_support::fixture;
    use crate::directory::IdentityDirectory;

    #[tokio::test]
    async fn send_verification_is_always_no_content() {
        let fixture = fixture().await;
        for email in ["nobody@example.com", "not-an-email", "alice@example.com"] {
            let response = send_verification(
                Extension(fixture.state.clone()),
                Some(Json(SendVerificationRequest {
                    email: email.to_string(),
                })),
            )
            .await
            .into_response();
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        let response = send_verification(Extension(fixture.state.clone()), None)
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(fixture.sender.sent().len(), 1);
    }

    #[tokio::test]
    async fn verify_email_marks_identity_verified() {
        let fixture = fixture().await;
        send_verification(
            Extension(fixture.state.clone()),
            Some(Json(SendVerificationRequest {
                email: "alice@example.com".to_string(),
            })),
        )
        .await;
        let code = fixture
            .sender
            .last_code_for("alice@example.com")
            .expect("code sent");

        let wrong = verify_email(
            Extension(fixture.state.clone()),
            Some(Json(VerifyEmailRequest {
                email: "alice@example.com".to_string(),
                code: "not-it".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(wrong.status(), StatusCode::BAD_REQUEST);

        let response = verify_email(
            Extension(fixture.state.clone()),
            Some(Json(VerifyEmailRequest {
                email: "alice@example.com".to_string(),
                code,
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let identity = fixture
            .directory
            .find_by_email("alice@example.com")
            .await
            .expect("lookup")
            .expect("present");
        assert!(identity.email_verified);
    }
}
