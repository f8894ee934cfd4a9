use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::HeaderMap,
};
use serde::Serialize;

use super::auth::require_user;
use super::prompts::load_prompt;
use crate::error::AppError;
use crate::runner::RunOutcome;
use crate::server::AppState;
use crate::server::payload::RunPayload;

#[derive(Debug, Serialize)]
pub struct PromptVariables {
    pub prompt_id: String,
    pub variables: Vec<String>,
}

pub async fn prompt_variables(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<PromptVariables>, AppError> {
    require_user(&headers, &app_state).await?;
    let prompt = load_prompt(&app_state, &id).await?;
    Ok(Json(PromptVariables {
        variables: prompt.variables(),
        prompt_id: prompt.id,
    }))
}

/// Validation and missing-configuration rejections come back as errors; a gateway
/// failure is a normal `failure` outcome.
pub async fn run_prompt(
    Path(id): Path<String>,
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: RunPayload,
) -> Result<Json<RunOutcome>, AppError> {
    let user = require_user(&headers, &app_state).await?;
    let prompt = load_prompt(&app_state, &id).await?;
    let request = payload.into_run_request()?;
    let outcome = app_state
        .runner
        .run(&prompt, Some(&user.id), request)
        .await?;
    Ok(Json(outcome))
}
