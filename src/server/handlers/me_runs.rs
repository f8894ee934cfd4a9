use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::auth::require_user;
use crate::error::AppError;
use crate::server::AppState;
use crate::stats::UserStatsSnapshot;
use crate::usage::RunLogEntry;

const MAX_RUN_LIMIT: i64 = 200;
const DEFAULT_RUN_LIMIT: i64 = 50;

#[derive(Debug, Deserialize, Default)]
pub struct MyRunsQuery {
    #[serde(default)]
    pub limit: Option<i64>,
    /// Last id already seen; only older entries are returned.
    #[serde(default)]
    pub cursor: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MyRunsResponse {
    pub data: Vec<RunLogEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<i64>,
}

pub async fn my_runs(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<MyRunsQuery>,
) -> Result<Json<MyRunsResponse>, AppError> {
    let user = require_user(&headers, &app_state).await?;
    let limit = q.limit.unwrap_or(DEFAULT_RUN_LIMIT).clamp(1, MAX_RUN_LIMIT);
    let data = app_state
        .usage_logs
        .list_runs_by_user(&user.id, limit, q.cursor)
        .await?;
    // 满页才给下一页游标
    let next_cursor = if data.len() as i64 == limit {
        data.last().and_then(|e| e.id)
    } else {
        None
    };
    Ok(Json(MyRunsResponse { data, next_cursor }))
}

pub async fn my_stats(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UserStatsSnapshot>, AppError> {
    let user = require_user(&headers, &app_state).await?;
    let today = Utc::now().date_naive();
    Ok(Json(app_state.stats.snapshot(&user.id, today).await?))
}
