//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::{DomainError, OrderError, SessionError};
use pipeline::{PipelineError, ProviderError};
use status::StatusError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// The caller is not the session's owner.
    Forbidden(String),
    /// Domain logic error.
    Domain(DomainError),
    /// Pipeline error, including provider failures.
    Pipeline(PipelineError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            ApiError::Domain(err) => domain_error_to_response(&err),
            ApiError::Pipeline(err) => pipeline_error_to_response(&err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message, "code": code });
        (status, axum::Json(body)).into_response()
    }
}

fn domain_error_to_response(err: &DomainError) -> (StatusCode, &'static str, String) {
    match err {
        DomainError::Session(e) => session_error_to_response(e),
        DomainError::Order(e) => order_error_to_response(e),
        DomainError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found", err.to_string()),
        DomainError::EventStore(e) if e.is_conflict() => {
            (StatusCode::CONFLICT, "conflict", "concurrent update, retry".to_string())
        }
        _ => {
            tracing::error!(error = %err, "domain failure");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal server error".to_string(),
            )
        }
    }
}

fn session_error_to_response(err: &SessionError) -> (StatusCode, &'static str, String) {
    let (status, code) = match err {
        SessionError::AlreadyCreated => (StatusCode::CONFLICT, "already_created"),
        SessionError::EmptyPrompt => (StatusCode::BAD_REQUEST, "empty_prompt"),
        SessionError::StageMismatch { .. }
        | SessionError::InvalidTransition { .. }
        | SessionError::Terminal { .. }
        | SessionError::DuplicateAsset { .. } => (StatusCode::CONFLICT, "stage_conflict"),
        SessionError::AssetNotFound { .. } => (StatusCode::NOT_FOUND, "asset_not_found"),
        SessionError::NotFailed { .. } => (StatusCode::CONFLICT, "not_failed"),
        SessionError::RetryLimitExceeded { .. } => {
            (StatusCode::CONFLICT, "retry_limit_exceeded")
        }
        SessionError::OwnerMismatch => (StatusCode::FORBIDDEN, "owner_mismatch"),
        SessionError::NotReady { .. } => (StatusCode::CONFLICT, "not_ready"),
        SessionError::ConsentRequired => (StatusCode::UNPROCESSABLE_ENTITY, "consent_required"),
        SessionError::Abandoned => (StatusCode::GONE, "abandoned"),
        SessionError::ApprovalAlreadyConsumed => (StatusCode::CONFLICT, "approval_consumed"),
        SessionError::InvalidApproval => (StatusCode::UNAUTHORIZED, "invalid_approval"),
    };
    (status, code, err.to_string())
}

fn order_error_to_response(err: &OrderError) -> (StatusCode, &'static str, String) {
    if let Some(reason) = err.reason_code() {
        let status = match err {
            OrderError::InvalidAddress { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::CONFLICT,
        };
        return (status, reason.as_str(), err.to_string());
    }

    let (status, code) = match err {
        OrderError::NoItems
        | OrderError::InvalidQuantity { .. }
        | OrderError::InvalidPrice { .. }
        | OrderError::NonPositiveTotal { .. }
        | OrderError::InvalidRefund { .. }
        | OrderError::UncoveredIncrease { .. } => (StatusCode::BAD_REQUEST, "invalid_order"),
        OrderError::ItemNotFound { .. } => (StatusCode::NOT_FOUND, "item_not_found"),
        _ => (StatusCode::CONFLICT, "order_conflict"),
    };
    (status, code, err.to_string())
}

fn pipeline_error_to_response(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::Domain(e) => domain_error_to_response(e),
        PipelineError::SessionNotFound(_) | PipelineError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, "not_found", err.to_string())
        }
        PipelineError::InvalidApprovalToken => {
            (StatusCode::UNAUTHORIZED, "invalid_approval", err.to_string())
        }
        PipelineError::CheckoutMismatch { .. } => {
            (StatusCode::CONFLICT, "checkout_mismatch", err.to_string())
        }
        PipelineError::Provider(
            ProviderError::InvalidSignature | ProviderError::MalformedPayload(_),
        ) => (StatusCode::BAD_REQUEST, "invalid_webhook", "invalid webhook".to_string()),
        PipelineError::Provider(e) => {
            // Raw provider text stays in the logs.
            tracing::warn!(error = %e, "provider call failed");
            let reason = e.reason_code();
            (StatusCode::BAD_GATEWAY, reason.as_str(), reason.default_message().to_string())
        }
        PipelineError::InvalidSecret => {
            tracing::error!("signing secret rejected");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
                "internal server error".to_string(),
            )
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Domain(err)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl From<StatusError> for ApiError {
    fn from(err: StatusError) -> Self {
        match err {
            StatusError::SessionNotFound(id) => ApiError::NotFound(format!("Session {id} not found")),
            StatusError::OrderNotFound(id) => ApiError::NotFound(format!("Order {id} not found")),
            StatusError::Domain(e) => ApiError::Domain(e),
        }
    }
}
