use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::Deserialize;

use super::auth::{require_admin, require_user};
use crate::error::AppError;
use crate::prompts::{
    CreateGroupPayload, CreateSubgroupPayload, Group, GroupWithSubgroups, Subgroup,
    SubgroupDetails,
};
use crate::server::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct SubgroupQuery {
    #[serde(default)]
    pub group_id: Option<String>,
}

pub async fn list_groups(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<GroupWithSubgroups>>, AppError> {
    require_user(&headers, &app_state).await?;
    Ok(Json(app_state.taxonomy.list_groups().await?))
}

pub async fn list_subgroups(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<SubgroupQuery>,
) -> Result<Json<Vec<Subgroup>>, AppError> {
    require_user(&headers, &app_state).await?;
    let group_id = q.group_id.as_deref().map(str::trim).filter(|s| !s.is_empty());
    Ok(Json(app_state.taxonomy.list_subgroups(group_id).await?))
}

pub async fn subgroup_details(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<SubgroupDetails>, AppError> {
    require_user(&headers, &app_state).await?;
    app_state
        .taxonomy
        .subgroup_details(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Subgroup not found".into()))
}

pub async fn create_group(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateGroupPayload>,
) -> Result<(StatusCode, Json<Group>), AppError> {
    require_admin(&headers, &app_state).await?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Group name is required".into()));
    }
    let group = app_state.taxonomy.create_group(name, payload.order_id).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn create_subgroup(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSubgroupPayload>,
) -> Result<(StatusCode, Json<Subgroup>), AppError> {
    require_admin(&headers, &app_state).await?;
    let name = payload.name.trim();
    if name.is_empty() || payload.group_id.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Missing required fields: group_id, name".into(),
        ));
    }
    match app_state
        .taxonomy
        .create_subgroup(payload.group_id.trim(), name, payload.order_id)
        .await?
    {
        Some(sub) => Ok((StatusCode::CREATED, Json(sub))),
        None => Err(AppError::NotFound("Group not found".into())),
    }
}
