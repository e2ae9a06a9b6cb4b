//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{AuthenticationError, DomainError};
use payments::CallbackError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Provider callback could not be verified or parsed.
    Callback(CallbackError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Domain(err) => domain_error_to_response(err),
            ApiError::Callback(err) => callback_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: DomainError) -> (StatusCode, String) {
    let status = match &err {
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::Authentication(_) => StatusCode::UNAUTHORIZED,
        DomainError::Authorization(_) => StatusCode::FORBIDDEN,
        DomainError::OrderNotFound(_) | DomainError::ProviderRefNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        DomainError::InvalidTransition(_) | DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::GatewayRejected(_) => StatusCode::BAD_GATEWAY,
        DomainError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        DomainError::Store(_) | DomainError::Serialization(_) => {
            tracing::error!(error = %err, "internal server error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    (status, err.to_string())
}

fn callback_error_to_response(err: CallbackError) -> (StatusCode, String) {
    if err.is_verification_failure() {
        tracing::warn!(error = %err, "callback verification failed");
        (StatusCode::UNAUTHORIZED, err.to_string())
    } else {
        (StatusCode::BAD_REQUEST, err.to_string())
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<AuthenticationError> for ApiError {
    fn from(err: AuthenticationError) -> Self {
        ApiError::Domain(DomainError::Authentication(err))
    }
}

impl From<CallbackError> for ApiError {
    fn from(err: CallbackError) -> Self {
        ApiError::Callback(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
