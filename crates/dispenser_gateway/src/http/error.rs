use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::domain::DomainError;
use serde_json::json;
use tracing::error;

/// HTTP status for a domain error
pub fn error_status(error: &DomainError) -> StatusCode {
    match error {
        DomainError::MissingField(_)
        | DomainError::IllegalType(_)
        | DomainError::InvalidPayload(_)
        | DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,

        DomainError::Unauthenticated => StatusCode::UNAUTHORIZED,

        DomainError::OverCapacity { .. } | DomainError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }

        // Local, transient: the device may resend
        DomainError::RegistryTimeout(_)
        | DomainError::VersionConflict(_)
        | DomainError::RelayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,

        DomainError::RepositoryError(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert domain error to an HTTP response with a `{"error": ...}` body
pub fn domain_error_to_response(error: DomainError) -> Response {
    let status = error_status(&error);
    let message = match &error {
        DomainError::RepositoryError(err) => {
            error!(error = %err, "internal error while handling request");
            "Internal error".to_string()
        }
        other => other.to_string(),
    };

    (status, Json(json!({ "error": message }))).into_response()
}
