use audit_core::error::{Error, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::env;
use tracing::{error, warn};

/// Wraps `audit_core::Error` for HTTP responses: sanitizes server-error
/// detail in production, annotates the response with the request's
/// correlation id, and routes security-relevant errors to a distinct log
/// target.
#[derive(Debug)]
pub struct ApiError {
    error: Error,
    request_id: Option<String>,
    environment: String,
}

impl ApiError {
    pub fn new(error: Error) -> Self {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        Self { error, request_id: None, environment }
    }

    pub fn with_request_id(mut self, request_id: String) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Errors worth a dedicated audit trail of their own: cross-org access
    /// attempts, tampering, and the legacy auth/rate-limit codes the error
    /// taxonomy still carries from the starting workspace.
    fn is_security_relevant(&self) -> bool {
        matches!(
            self.error.code,
            ErrorCode::Forbidden
                | ErrorCode::IntegrityMismatch
                | ErrorCode::AuthenticationFailed
                | ErrorCode::AuthorizationFailed
                | ErrorCode::PermissionDenied
                | ErrorCode::SecurityPolicyViolation
                | ErrorCode::RateLimitExceeded
                | ErrorCode::TooManyRequests
        )
    }

    fn log_error(&self) {
        let status_code =
            StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match status_code.as_u16() {
            500..=599 => {
                error!(
                    error_code = %self.error.code,
                    error_id = %self.error.context.error_id,
                    request_id = ?self.request_id,
                    severity = ?self.error.severity,
                    "internal server error: {}", self.error
                );
            }
            400..=499 => {
                if self.is_security_relevant() {
                    warn!(target: "security_audit",
                        error_code = %self.error.code,
                        error_id = %self.error.context.error_id,
                        request_id = ?self.request_id,
                        "security-relevant client error: {}", self.error
                    );
                } else {
                    tracing::debug!(
                        error_code = %self.error.code,
                        request_id = ?self.request_id,
                        "client error: {}", self.error
                    );
                }
            }
            _ => {
                tracing::info!(
                    error_code = %self.error.code,
                    request_id = ?self.request_id,
                    "informational response: {}", self.error
                );
            }
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self::new(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        self.log_error();

        let mut response_json = self.error.to_api_response_with_environment(&self.environment);
        if let Some(request_id) = &self.request_id {
            if let Some(error_obj) = response_json.get_mut("error") {
                error_obj["requestId"] = json!(request_id);
            }
        }

        if self.environment == "production" && status_code.is_server_error() {
            response_json = json!({
                "error": {
                    "code": self.error.code,
                    "message": "An internal error occurred. Please try again later.",
                    "errorId": self.error.context.error_id,
                    "requestId": self.request_id,
                    "timestamp": self.error.context.timestamp,
                }
            });
        }

        (status_code, Json(response_json)).into_response()
    }
}
