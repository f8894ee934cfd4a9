use axum::http::HeaderMap;

use crate::error::AppError;
use crate::server::AppState;
use crate::server::util::session_token;
use crate::users::User;

/// The caller behind a bearer token or session cookie.
pub async fn require_user(headers: &HeaderMap, app_state: &AppState) -> Result<User, AppError> {
    let Some(token) = session_token(headers) else {
        return Err(AppError::Unauthorized("Authentication required".into()));
    };
    match app_state.sessions.resolve(&token).await? {
        Some(user) => Ok(user),
        None => Err(AppError::Unauthorized("Authentication required".into())),
    }
}

pub async fn require_admin(headers: &HeaderMap, app_state: &AppState) -> Result<User, AppError> {
    let user = require_user(headers, app_state).await?;
    if !user.is_admin() {
        tracing::warn!(user_id = %user.id, "admin route denied");
        return Err(AppError::Forbidden("Admin access required".into()));
    }
    Ok(user)
}
