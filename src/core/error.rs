//! Typed error handling for the REST layer
//!
//! Every failure a request can run into is a [`RestError`] variant. Each
//! variant knows its HTTP status and a stable error code, so handlers can
//! simply return `Result<_, RestError>` and let [`IntoResponse`] render it.
//!
//! | Variant | HTTP status | Code |
//! |---------|-------------|------|
//! | `NotFound` | 404 | `MODEL_NOT_FOUND` |
//! | `UnknownModel` | 404 | `UNKNOWN_MODEL` |
//! | `RouteNotFound` | 404 | `ROUTE_NOT_FOUND` |
//! | `Validation` | 422 | `VALIDATION_ERROR` |
//! | `Authentication` | 401 | `LOGIN_FAILED` |
//! | `Unauthenticated` | 401 | `INVALID_TOKEN` |
//! | `AccessDenied` | 401 | `AUTHORIZATION_REQUIRED` |
//! | `NotAcceptable` | 406 | `NOT_ACCEPTABLE` |
//! | `Conflict` | 409 | `CONFLICT` |
//! | `DuplicateModel` | 500 | `DUPLICATE_MODEL` |
//! | `Internal` | 500 | `INTERNAL_ERROR` |

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Convenience alias used across the crate
pub type RestResult<T> = std::result::Result<T, RestError>;

/// The main error type of the REST layer
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    /// A model instance does not exist
    #[error("{model} with id '{id}' not found")]
    NotFound { model: String, id: String },

    /// No model is registered under this name or plural
    #[error("Unknown model: {name}")]
    UnknownModel { name: String },

    /// The path does not match any route of the model
    #[error("No route for {method} {path}")]
    RouteNotFound { method: String, path: String },

    /// The payload of a create/update is malformed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Login failed: unknown user or wrong password
    #[error("Login failed: {message}")]
    Authentication { message: String },

    /// The presented access token is missing, expired or revoked
    #[error("Invalid or expired access token")]
    Unauthenticated,

    /// The route's auth policy rejected the request context
    #[error("Authorization required for {operation} on {model}")]
    AccessDenied { model: String, operation: String },

    /// None of the supported media types is acceptable to the client
    #[error("None of the supported media types matches Accept: {accept}")]
    NotAcceptable { accept: String },

    /// An instance with the same id already exists
    #[error("{model} with id '{id}' already exists")]
    Conflict { model: String, id: String },

    /// A model with the same name is already registered
    #[error("Model '{name}' is already registered")]
    DuplicateModel { name: String },

    /// Unexpected fault; the message is logged but never sent to clients
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while checking a payload against a model's property schema
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// A single field is invalid
    #[error("Validation error for field '{field}': {message}")]
    FieldError { field: String, message: String },

    /// Several fields are invalid
    #[error("Validation errors: {}", format_field_errors(.0))]
    FieldErrors(Vec<FieldValidationError>),

    /// The body is not a JSON object
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },
}

/// A single field validation error
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldValidationError {
    pub field: String,
    pub message: String,
}

impl FieldValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

fn format_field_errors(errors: &[FieldValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationError {
    /// Collapse a list of field errors into the most specific variant
    pub fn from_fields(mut errors: Vec<FieldValidationError>) -> Self {
        if errors.len() == 1 {
            let e = errors.remove(0);
            ValidationError::FieldError {
                field: e.field,
                message: e.message,
            }
        } else {
            ValidationError::FieldErrors(errors)
        }
    }
}

/// Error body sent to clients
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling
    pub code: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RestError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            RestError::NotFound { .. } => StatusCode::NOT_FOUND,
            RestError::UnknownModel { .. } => StatusCode::NOT_FOUND,
            RestError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            RestError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            RestError::Authentication { .. } => StatusCode::UNAUTHORIZED,
            RestError::Unauthenticated => StatusCode::UNAUTHORIZED,
            RestError::AccessDenied { .. } => StatusCode::UNAUTHORIZED,
            RestError::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            RestError::Conflict { .. } => StatusCode::CONFLICT,
            RestError::DuplicateModel { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            RestError::NotFound { .. } => "MODEL_NOT_FOUND",
            RestError::UnknownModel { .. } => "UNKNOWN_MODEL",
            RestError::RouteNotFound { .. } => "ROUTE_NOT_FOUND",
            RestError::Validation(_) => "VALIDATION_ERROR",
            RestError::Authentication { .. } => "LOGIN_FAILED",
            RestError::Unauthenticated => "INVALID_TOKEN",
            RestError::AccessDenied { .. } => "AUTHORIZATION_REQUIRED",
            RestError::NotAcceptable { .. } => "NOT_ACCEPTABLE",
            RestError::Conflict { .. } => "CONFLICT",
            RestError::DuplicateModel { .. } => "DUPLICATE_MODEL",
            RestError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether this error is an unexpected fault rather than a client error
    pub fn is_internal(&self) -> bool {
        matches!(self, RestError::Internal(_) | RestError::DuplicateModel { .. })
    }

    /// Convert to an error response
    pub fn to_response(&self) -> ErrorResponse {
        let message = if self.is_internal() {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        ErrorResponse {
            code: self.error_code().to_string(),
            message,
            details: self.details(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            RestError::NotFound { model, id } => Some(serde_json::json!({
                "model": model,
                "id": id
            })),
            RestError::Validation(ValidationError::FieldError { field, message }) => {
                Some(serde_json::json!({
                    "fields": [{ "field": field, "message": message }]
                }))
            }
            RestError::Validation(ValidationError::FieldErrors(errors)) => {
                Some(serde_json::json!({ "fields": errors }))
            }
            _ => None,
        }
    }
}

impl From<anyhow::Error> for RestError {
    fn from(err: anyhow::Error) -> Self {
        RestError::Internal(format!("{:#}", err))
    }
}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self.to_response());
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_422() {
        let err = RestError::from(ValidationError::FieldError {
            field: "name".to_string(),
            message: "is required".to_string(),
        });
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_from_fields_single_collapses() {
        let err = ValidationError::from_fields(vec![FieldValidationError::new("a", "bad")]);
        assert!(matches!(err, ValidationError::FieldError { .. }));

        let err = ValidationError::from_fields(vec![
            FieldValidationError::new("a", "bad"),
            FieldValidationError::new("b", "worse"),
        ]);
        assert_eq!(err.to_string(), "Validation errors: a: bad, b: worse");
    }

    #[test]
    fn test_internal_message_is_hidden() {
        let err = RestError::Internal("lock poisoned at store.rs:42".to_string());
        let body = err.to_response();
        assert_eq!(body.code, "INTERNAL_ERROR");
        assert_eq!(body.message, "Internal server error");
    }

    #[test]
    fn test_anyhow_converts_to_internal() {
        let err: RestError = anyhow::anyhow!("boom").into();
        assert!(err.is_internal());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found_details() {
        let err = RestError::NotFound {
            model: "MyModel".to_string(),
            id: "1".to_string(),
        };
        let body = err.to_response();
        assert_eq!(body.details.unwrap()["id"], "1");
        assert_eq!(err.to_string(), "MyModel with id '1' not found");
    }
}
