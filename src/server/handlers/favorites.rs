use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Serialize;

use super::auth::require_user;
use crate::error::AppError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct FavoriteStatus {
    pub prompt_id: String,
    pub favorited: bool,
    pub favorites_count: i64,
}

async fn set_favorite(
    app_state: &AppState,
    headers: &HeaderMap,
    prompt_id: String,
    favorite: bool,
) -> Result<Json<FavoriteStatus>, AppError> {
    let user = require_user(headers, app_state).await?;
    let Some(count) = app_state
        .favorites
        .set_favorite(&user.id, &prompt_id, favorite)
        .await?
    else {
        return Err(AppError::NotFound("Prompt not found".into()));
    };
    Ok(Json(FavoriteStatus {
        prompt_id,
        favorited: favorite,
        favorites_count: count,
    }))
}

pub async fn add_favorite(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FavoriteStatus>, AppError> {
    set_favorite(&app_state, &headers, id, true).await
}

pub async fn remove_favorite(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<FavoriteStatus>, AppError> {
    set_favorite(&app_state, &headers, id, false).await
}

pub async fn my_favorites(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<String>>, AppError> {
    let user = require_user(&headers, &app_state).await?;
    Ok(Json(app_state.favorites.list_favorites(&user.id).await?))
}
