use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
};

use super::auth::{require_admin, require_user};
use crate::error::AppError;
use crate::llm_config::{CreateLlmConfigPayload, LlmConfiguration, UpdateLlmConfigPayload};
use crate::server::AppState;

fn not_found() -> AppError {
    AppError::NotFound("LLM configuration not found".into())
}

pub async fn list_configs(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<LlmConfiguration>>, AppError> {
    require_admin(&headers, &app_state).await?;
    Ok(Json(app_state.llm_configs.list_configs().await?))
}

pub async fn create_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateLlmConfigPayload>,
) -> Result<(StatusCode, Json<LlmConfiguration>), AppError> {
    let admin = require_admin(&headers, &app_state).await?;
    let (new, activate) = payload.validate()?;
    let cfg = app_state.llm_configs.create_config(&new, activate).await?;
    tracing::info!(
        admin_id = %admin.id,
        config_id = %cfg.id,
        api_type = cfg.api_type.as_str(),
        active = cfg.is_active,
        "LLM configuration created"
    );
    Ok((StatusCode::CREATED, Json(cfg)))
}

pub async fn update_config(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<UpdateLlmConfigPayload>,
) -> Result<Json<LlmConfiguration>, AppError> {
    require_admin(&headers, &app_state).await?;
    let (changes, active) = payload.validate()?;
    let store = &app_state.llm_configs;
    if store.get_config(&id).await?.is_none() {
        return Err(not_found());
    }
    if !changes.is_empty() && store.update_config(&id, &changes).await?.is_none() {
        return Err(not_found());
    }
    match active {
        Some(true) => {
            if !store.set_active(&id).await? {
                return Err(not_found());
            }
        }
        Some(false) => {
            store.deactivate(&id).await?;
        }
        None => {}
    }
    let cfg = store.get_config(&id).await?.ok_or_else(not_found)?;
    tracing::info!(config_id = %cfg.id, active = cfg.is_active, "LLM configuration updated");
    Ok(Json(cfg))
}

pub async fn delete_config(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    require_admin(&headers, &app_state).await?;
    let Some(cfg) = app_state.llm_configs.get_config(&id).await? else {
        return Err(not_found());
    };
    if cfg.is_active || !app_state.llm_configs.delete_config(&id).await? {
        return Err(AppError::Conflict(
            "Cannot delete the active LLM configuration. Activate another one first.".into(),
        ));
    }
    tracing::info!(config_id = %id, "LLM configuration deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn activate_config(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LlmConfiguration>, AppError> {
    require_admin(&headers, &app_state).await?;
    if !app_state.llm_configs.set_active(&id).await? {
        return Err(not_found());
    }
    let cfg = app_state
        .llm_configs
        .get_config(&id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(cfg))
}

pub async fn get_active_config(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<LlmConfiguration>, AppError> {
    require_user(&headers, &app_state).await?;
    match app_state.llm_configs.get_active_config().await? {
        Some(cfg) => Ok(Json(cfg)),
        None => Err(AppError::NotFound(
            "No active LLM configuration found.".into(),
        )),
    }
}
