use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use serde::{Deserialize, Serialize};

use super::auth::require_user;
use crate::error::AppError;
use crate::prompts::{PromptDraft, PromptTemplate};
use crate::server::AppState;
use crate::server::payload::PromptPayload;

#[derive(Debug, Deserialize, Default)]
pub struct PromptListQuery {
    #[serde(default)]
    pub subgroup_id: Option<String>,
}

/// A prompt together with the variables its body declares.
#[derive(Debug, Serialize)]
pub struct PromptDetail {
    #[serde(flatten)]
    pub prompt: PromptTemplate,
    pub variables: Vec<String>,
}

impl From<PromptTemplate> for PromptDetail {
    fn from(prompt: PromptTemplate) -> Self {
        let variables = prompt.variables();
        Self { prompt, variables }
    }
}

pub(crate) async fn load_prompt(app_state: &AppState, id: &str) -> Result<PromptTemplate, AppError> {
    app_state
        .prompts
        .get_prompt(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Prompt not found".into()))
}

async fn ensure_subgroup(app_state: &AppState, draft: &PromptDraft) -> Result<(), AppError> {
    if app_state
        .taxonomy
        .get_subgroup(&draft.subgroup_id)
        .await?
        .is_none()
    {
        return Err(AppError::NotFound("Subgroup not found".into()));
    }
    Ok(())
}

pub async fn list_prompts(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<PromptListQuery>,
) -> Result<Json<Vec<PromptTemplate>>, AppError> {
    require_user(&headers, &app_state).await?;
    let subgroup = q
        .subgroup_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    Ok(Json(app_state.prompts.list_prompts(subgroup).await?))
}

pub async fn get_prompt(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PromptDetail>, AppError> {
    require_user(&headers, &app_state).await?;
    Ok(Json(load_prompt(&app_state, &id).await?.into()))
}

pub async fn create_prompt(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: PromptPayload,
) -> Result<(StatusCode, Json<PromptDetail>), AppError> {
    let user = require_user(&headers, &app_state).await?;
    let (draft, files) = payload.into_draft()?;
    ensure_subgroup(&app_state, &draft).await?;
    let prompts = &app_state.prompts;
    let (draft, user_id) = (&draft, user.id.as_str());
    let prompt = app_state
        .uploads
        .save_with(&files, |documents| async move {
            Ok::<_, AppError>(prompts.create_prompt(draft, &documents, user_id).await?)
        })
        .await?;
    tracing::info!(
        prompt_id = %prompt.id,
        user_id = %user.id,
        documents = prompt.documents.len(),
        "prompt created"
    );
    Ok((StatusCode::CREATED, Json(prompt.into())))
}

pub async fn update_prompt(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: PromptPayload,
) -> Result<Json<PromptDetail>, AppError> {
    let user = require_user(&headers, &app_state).await?;
    let existing = load_prompt(&app_state, &id).await?;
    if !existing.editable_by(&user) {
        return Err(AppError::Forbidden(
            "Only the creator or an admin can edit this prompt".into(),
        ));
    }
    let (draft, files) = payload.into_draft()?;
    ensure_subgroup(&app_state, &draft).await?;
    let prompts = &app_state.prompts;
    let (id, draft) = (id.as_str(), &draft);
    let prompt = app_state
        .uploads
        .save_with(&files, |documents| async move {
            prompts
                .update_prompt(id, draft, &documents)
                .await?
                .ok_or_else(|| AppError::NotFound("Prompt not found".into()))
        })
        .await?;
    tracing::info!(prompt_id = %prompt.id, user_id = %user.id, "prompt updated");
    Ok(Json(prompt.into()))
}

pub async fn delete_prompt(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, AppError> {
    let user = require_user(&headers, &app_state).await?;
    let existing = load_prompt(&app_state, &id).await?;
    if !existing.editable_by(&user) {
        return Err(AppError::Forbidden(
            "Only the creator or an admin can delete this prompt".into(),
        ));
    }
    if !app_state.prompts.delete_prompt(&id).await? {
        return Err(AppError::NotFound("Prompt not found".into()));
    }
    tracing::info!(prompt_id = %id, user_id = %user.id, "prompt deleted");
    Ok(StatusCode::NO_CONTENT)
}
