use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;
use crate::state::AppState;

/// Header set by the upstream authentication provider.
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated caller. This service never authenticates on its own;
/// it trusts the identifier forwarded by the provider in front of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
}

/// Returns 401 when no identifier was forwarded.
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        user_id_from_parts(parts)
            .map(|id| CurrentUser { id })
            .ok_or(AppError::Unauthorized)
    }
}

fn user_id_from_parts(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
