use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the Ingress API (§4.1/§7). Each variant maps to a
/// fixed HTTP status so handlers can `?`-propagate without re-deriving
/// the status code at the call site.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("invalid JWT signature")]
    Unauthorized,
    #[error("invalid request body: {field}: {reason}")]
    InvalidBody { field: String, reason: String },
    #[error("failed to serialize envelope")]
    Serialization,
    #[error("queue broker unavailable")]
    BrokerUnavailable,
}

impl IngressError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        IngressError::InvalidBody {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            IngressError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": self.to_string() }),
            ),
            IngressError::InvalidBody { field, reason } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "field": field, "reason": reason }),
            ),
            IngressError::Serialization => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": self.to_string() }),
            ),
            IngressError::BrokerUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error": self.to_string() }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/// Why the Normalizer rejected or partially accepted a dict (§4.4/§7).
/// Bad-input errors are terminal: the caller logs and acks rather than
/// retrying.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("{field}: {reason}")]
    Field { field: String, reason: String },
    #[error("packet must carry a callsign or serial identity")]
    NoIdentifier,
}

impl NormalizeError {
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        NormalizeError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
