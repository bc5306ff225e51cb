use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::Json,
};
use uuid::Uuid;

use crate::api::ApiResponse;
use crate::errors::{ApiError, ErrorContext};

/// Header carrying the authenticated user's id, set by the auth gateway.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the authenticated user's role, set by the auth gateway.
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    fn from_header(value: Option<&str>) -> Option<Self> {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            None => Some(Role::User),
            Some(v) if v.is_empty() || v == "user" => Some(Role::User),
            Some(v) if v == "admin" => Some(Role::Admin),
            Some(_) => None,
        }
    }
}

/// The caller of an `/api` handler. Extraction fails with 401 when the
/// gateway did not forward a valid identity.
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser {
    pub id: Uuid,
    pub role: Role,
}

impl CurrentUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("administrator role required".to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ApiResponse<()>>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| parts.headers.get(name).and_then(|v| v.to_str().ok());

        let id = header(USER_ID_HEADER).and_then(|raw| Uuid::parse_str(raw.trim()).ok());
        let role = Role::from_header(header(USER_ROLE_HEADER));

        match (id, role) {
            (Some(id), Some(role)) => Ok(CurrentUser { id, role }),
            _ => Err(ApiError::Unauthorized
                .to_response_with_context(ErrorContext::new("authenticate", "user"))),
        }
    }
}
