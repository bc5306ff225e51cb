use crate::api::ApiResponse;
use axum::{http::StatusCode, response::Json};
use tracing::{error, info, warn};

/// Centralized error types for consistent API error handling
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("No questions match the selected criteria")]
    NoQuestionsMatch,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Permission denied: {0}")]
    Forbidden(String),

    #[error("Resource already exists: {0}")]
    DuplicateResource(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] anyhow::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Error context for structured logging
#[derive(Debug)]
pub struct ErrorContext {
    pub operation: String,
    pub resource_id: Option<String>,
    pub resource_type: String,
    pub user_friendly_message: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str, resource_type: &str) -> Self {
        Self {
            operation: operation.to_string(),
            resource_id: None,
            resource_type: resource_type.to_string(),
            user_friendly_message: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn with_user_message(mut self, message: &str) -> Self {
        self.user_friendly_message = Some(message.to_string());
        self
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ValidationError(_) | ApiError::NoQuestionsMatch | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::DuplicateResource(_) => StatusCode::CONFLICT,
            ApiError::DatabaseError(_) | ApiError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Convert API error to HTTP response with consistent structure and logging
    pub fn to_response_with_context(
        self,
        context: ErrorContext,
    ) -> (StatusCode, Json<ApiResponse<()>>) {
        let status = self.status_code();
        let message = match &self {
            ApiError::NotFound(_) => {
                info!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Resource not found"
                );
                context
                    .user_friendly_message
                    .unwrap_or_else(|| format!("{} not found", context.resource_type))
            }
            ApiError::Unauthorized | ApiError::Forbidden(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Authorization failure"
                );
                self.to_string()
            }
            ApiError::ValidationError(_)
            | ApiError::NoQuestionsMatch
            | ApiError::BadRequest(_)
            | ApiError::DuplicateResource(_) => {
                warn!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Rejected request"
                );
                context
                    .user_friendly_message
                    .unwrap_or_else(|| self.to_string())
            }
            ApiError::DatabaseError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Database error"
                );
                context
                    .user_friendly_message
                    .unwrap_or_else(|| format!("Failed to {}. Please try again.", humanize(&context.operation)))
            }
            ApiError::InternalError(_) => {
                error!(
                    operation = %context.operation,
                    resource_type = %context.resource_type,
                    resource_id = ?context.resource_id,
                    error = %self,
                    "Internal server error"
                );
                "An internal error occurred. Please try again.".to_string()
            }
        };

        (status, Json(ApiResponse::error(message)))
    }

    /// Simple conversion without context
    pub fn to_response(self) -> (StatusCode, Json<ApiResponse<()>>) {
        let context = ErrorContext::new("unknown", "resource");
        self.to_response_with_context(context)
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::DatabaseError(anyhow::Error::from(err))
    }
}

/// `create_session` -> `create session`
fn humanize(operation: &str) -> String {
    operation.replace('_', " ")
}

/// Helper function to detect error types from anyhow error messages
pub fn classify_database_error(error: anyhow::Error) -> ApiError {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("unique constraint") {
        ApiError::DuplicateResource("Resource already exists".to_string())
    } else if error_str.contains("foreign key constraint") {
        ApiError::ValidationError("Referenced resource does not exist".to_string())
    } else if error_str.contains("not null constraint") {
        ApiError::ValidationError("Required field is missing or invalid".to_string())
    } else {
        ApiError::DatabaseError(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_context_creation() {
        let context = ErrorContext::new("create_session", "session")
            .with_id("123")
            .with_user_message("Custom message");

        assert_eq!(context.operation, "create_session");
        assert_eq!(context.resource_type, "session");
        assert_eq!(context.resource_id, Some("123".to_string()));
        assert_eq!(
            context.user_friendly_message,
            Some("Custom message".to_string())
        );
    }

    #[test]
    fn test_error_classification() {
        let duplicate = anyhow::anyhow!("UNIQUE constraint failed: categories.name");
        assert!(matches!(
            classify_database_error(duplicate),
            ApiError::DuplicateResource(_)
        ));

        let missing_fk = anyhow::anyhow!("FOREIGN KEY constraint failed");
        assert!(matches!(
            classify_database_error(missing_fk),
            ApiError::ValidationError(_)
        ));

        let other = anyhow::anyhow!("disk I/O error");
        assert!(matches!(
            classify_database_error(other),
            ApiError::DatabaseError(_)
        ));
    }

    #[test]
    fn test_api_error_status_mapping() {
        let context = ErrorContext::new("get_session", "session").with_id("123");
        let (status, _) = ApiError::NotFound("session".to_string()).to_response_with_context(context);
        assert_eq!(status, StatusCode::NOT_FOUND);

        assert_eq!(ApiError::NoQuestionsMatch.to_response().0, StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.to_response().0, StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::Forbidden("admin only".to_string()).to_response().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::DuplicateResource("x".to_string()).to_response().0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::DatabaseError(anyhow::anyhow!("boom")).to_response().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_bad_request_prefers_user_message() {
        let (status, Json(body)) = ApiError::BadRequest("invalid UUID length".to_string())
            .to_response_with_context(
                ErrorContext::new("parse_path", "path parameter")
                    .with_user_message("Invalid identifier in request path"),
            );
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!body.success);
        assert_eq!(body.error.as_deref(), Some("Invalid identifier in request path"));

        let (_, Json(body)) = ApiError::BadRequest("missing field `question_count`".to_string())
            .to_response_with_context(ErrorContext::new("parse_body", "request body"));
        assert_eq!(
            body.error.as_deref(),
            Some("Bad request: missing field `question_count`")
        );
    }

    #[test]
    fn test_database_error_message_is_generic() {
        let context = ErrorContext::new("complete_session", "session");
        let (_, Json(body)) =
            ApiError::DatabaseError(anyhow::anyhow!("no such table: quiz_sessions"))
                .to_response_with_context(context);

        assert_eq!(
            body.error.as_deref(),
            Some("Failed to complete session. Please try again.")
        );
    }
}
