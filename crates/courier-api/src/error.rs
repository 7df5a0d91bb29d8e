//! HTTP error mapping.
//!
//! Handlers return [`ApiError`]; the `IntoResponse` impl turns the core
//! error taxonomy into status codes and a stable JSON body so clients can
//! branch on `code` without parsing messages.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use courier_core::CoreError;
use serde::Serialize;

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError(pub CoreError);

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable description.
    pub error: String,
    /// Machine-readable code, stable across releases.
    pub code: &'static str,
    /// Whether retrying the same request can succeed.
    pub retryable: bool,
    /// Suggested back-off in seconds, when one applies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl From<CoreError> for ApiError {
    fn from(error: CoreError) -> Self {
        Self(error)
    }
}

fn status_for(error: &CoreError) -> StatusCode {
    match error {
        CoreError::InvalidRecipient(_)
        | CoreError::MissingVariable(_)
        | CoreError::UnsupportedChannel(_)
        | CoreError::InvalidSchedule(_)
        | CoreError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CoreError::SignatureInvalid(_) => StatusCode::UNAUTHORIZED,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        CoreError::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let retry_after = self.0.retry_after_secs();
        let body = ErrorResponse {
            error: self.0.to_string(),
            code: self.0.code(),
            retryable: self.0.is_retryable(),
            retry_after_secs: retry_after,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overloaded_carries_retry_after_header() {
        let response = ApiError(CoreError::Overloaded { retry_after_secs: 5 }).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "5");
    }

    #[test]
    fn admission_failures_are_bad_requests() {
        let response = ApiError(CoreError::InvalidRecipient("abc".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError(CoreError::QuotaExceeded).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
