use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use credit_ledger::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Standard API error response structure
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Unique error ID for tracking
    pub error_id: String,
    pub error_type: String,
    /// Message safe to show next to the triggering control
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

/// Standard API success response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

/// Main API error enum
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Missing professional context: {message}")]
    Unauthorized { message: String },

    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Resource not found: {resource_type}")]
    NotFound { resource_type: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Ledger(err) => match err {
                LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
                LedgerError::InsufficientCredits { .. }
                | LedgerError::InvalidTransition { .. }
                | LedgerError::ConfirmationRequired => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::InactiveProfessional(_) => StatusCode::FORBIDDEN,
                LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
                LedgerError::Conflict(_) => StatusCode::CONFLICT,
                LedgerError::ExternalService(_) => StatusCode::BAD_GATEWAY,
                LedgerError::Storage(_)
                | LedgerError::Database(_)
                | LedgerError::Migration(_)
                | LedgerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string
    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Unauthorized { .. } => "unauthorized",
            ApiError::Forbidden { .. } => "forbidden",
            ApiError::NotFound { .. } => "not_found",
            ApiError::Ledger(err) => match err {
                LedgerError::Validation(_) => "validation_error",
                LedgerError::InsufficientCredits { .. } => "insufficient_credits",
                LedgerError::InvalidTransition { .. } => "invalid_transition",
                LedgerError::ConfirmationRequired => "confirmation_required",
                LedgerError::InactiveProfessional(_) => "professional_inactive",
                LedgerError::NotFound { .. } => "not_found",
                LedgerError::Conflict(_) => "conflict",
                LedgerError::ExternalService(_) => "external_service_error",
                LedgerError::Storage(_) | LedgerError::Database(_) | LedgerError::Migration(_) => {
                    "storage_error"
                }
                LedgerError::Config(_) => "configuration_error",
            },
            ApiError::Internal { .. } => "internal_error",
            ApiError::BadRequest { .. } => "bad_request",
        }
    }

    /// Get suggested actions for resolving the error
    pub fn suggestions(&self) -> Option<Vec<String>> {
        match self {
            ApiError::Ledger(LedgerError::InsufficientCredits { .. }) => Some(vec![
                "Record the patient's payment before scheduling".to_string(),
                "Book fewer sessions".to_string(),
            ]),
            ApiError::Ledger(LedgerError::ConfirmationRequired) => {
                Some(vec!["Resend the request with \"confirmed\": true".to_string()])
            }
            ApiError::Unauthorized { .. } => Some(vec![
                "Send the X-Professional-Id header of a registered professional".to_string(),
            ]),
            ApiError::Ledger(LedgerError::InactiveProfessional(_)) => {
                Some(vec!["Reactivate the professional in the registry".to_string()])
            }
            _ => None,
        }
    }

    /// Message for the response body; storage details never leave the server
    fn public_message(&self) -> String {
        match self {
            ApiError::Ledger(err) => err.user_message(),
            ApiError::Internal { .. } => "Could not save. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_id = Uuid::new_v4().to_string();
        let status_code = self.status_code();

        if status_code.is_server_error() {
            error!(
                error_id = %error_id,
                error_type = %self.error_type(),
                status_code = %status_code.as_u16(),
                error = %self,
                "API error occurred"
            );
        } else {
            warn!(
                error_id = %error_id,
                error_type = %self.error_type(),
                status_code = %status_code.as_u16(),
                error = %self,
                "Request rejected"
            );
        }

        let error_response = ApiErrorResponse {
            error_id,
            error_type: self.error_type().to_string(),
            message: self.public_message(),
            timestamp: chrono::Utc::now(),
            suggestions: self.suggestions(),
        };

        (status_code, Json(error_response)).into_response()
    }
}

/// Helper function to create successful API responses
pub fn api_success<T>(data: T) -> ApiResponse<T> {
    ApiResponse {
        success: true,
        data,
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest {
            message: format!("Invalid JSON: {}", rejection.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest {
            message: format!("Invalid query: {}", rejection.body_text()),
        }
    }
}

/// Convert anyhow errors to API errors
impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        ApiError::Internal {
            message: error.to_string(),
        }
    }
}

/// Type alias for API results
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_errors_map_to_statuses() {
        let short = ApiError::from(LedgerError::InsufficientCredits {
            requested: 2,
            available: 0,
        });
        assert_eq!(short.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(short.error_type(), "insufficient_credits");

        let storage = ApiError::from(LedgerError::Storage("disk full".to_string()));
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.public_message(), "Could not save. Please try again.");
    }

    #[test]
    fn inactive_professional_is_forbidden() {
        let err = ApiError::from(LedgerError::InactiveProfessional(Uuid::nil()));
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_type(), "professional_inactive");
        assert!(err.suggestions().is_some());
    }
}
