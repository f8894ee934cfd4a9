use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Deserialize;

use super::auth::require_admin;
use crate::error::AppError;
use crate::server::AppState;
use crate::users::{User, UserRole};

#[derive(Debug, Deserialize)]
pub struct UpdateRolePayload {
    #[serde(default)]
    pub role: String,
}

pub async fn list_users(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<User>>, AppError> {
    require_admin(&headers, &app_state).await?;
    Ok(Json(app_state.users.list_users().await?))
}

pub async fn update_role(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<UpdateRolePayload>,
) -> Result<Json<User>, AppError> {
    let admin = require_admin(&headers, &app_state).await?;
    let Some(role) = UserRole::parse(payload.role.trim()) else {
        return Err(AppError::BadRequest(
            "Invalid role. Must be 'user' or 'admin'".into(),
        ));
    };
    if admin.id == id && role != UserRole::Admin {
        return Err(AppError::BadRequest(
            "Admins cannot remove their own admin role".into(),
        ));
    }
    match app_state.users.set_role(&id, role).await? {
        Some(user) => {
            tracing::info!(
                admin_id = %admin.id,
                user_id = %user.id,
                role = role.as_str(),
                "user role updated"
            );
            Ok(Json(user))
        }
        None => Err(AppError::NotFound("User not found".into())),
    }
}
