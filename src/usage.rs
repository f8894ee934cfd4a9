use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "failure" => Some(RunStatus::Failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    pub variables: BTreeMap<String, String>,
    pub final_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RunOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One run attempt. Written once, never updated.
///
/// The prompt is referenced by id *and* name so the entry stays readable after
/// the prompt is deleted.
#[derive(Debug, Clone, Serialize)]
pub struct RunLogEntry {
    pub id: Option<i64>,
    pub prompt_id: Option<String>,
    pub prompt_name: String,
    pub user_id: Option<String>,
    pub config_id: Option<String>,
    pub input: RunInput,
    pub output: RunOutput,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[async_trait]
pub trait UsageLogStore: Send + Sync {
    /// Appends the entry and returns its row id.
    async fn insert_run_log(&self, entry: &RunLogEntry) -> rusqlite::Result<i64>;
    async fn count_runs_by_user(&self, user_id: &str) -> rusqlite::Result<i64>;
    /// Newest first; `before_id` is the last id the caller has already seen.
    async fn list_runs_by_user(
        &self,
        user_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> rusqlite::Result<Vec<RunLogEntry>>;
}

#[derive(Clone)]
pub struct UsageLogger {
    store: Arc<dyn UsageLogStore>,
}

impl UsageLogger {
    pub fn new(store: Arc<dyn UsageLogStore>) -> Self {
        Self { store }
    }

    pub async fn record(&self, entry: &RunLogEntry) -> rusqlite::Result<i64> {
        match self.store.insert_run_log(entry).await {
            Ok(id) => {
                tracing::debug!(
                    log_id = id,
                    prompt_id = entry.prompt_id.as_deref().unwrap_or("-"),
                    status = entry.status.as_str(),
                    "run log written"
                );
                Ok(id)
            }
            Err(e) => {
                tracing::error!(
                    prompt_id = entry.prompt_id.as_deref().unwrap_or("-"),
                    status = entry.status.as_str(),
                    error = %e,
                    "failed to write run log"
                );
                Err(e)
            }
        }
    }

    pub async fn count_by_user(&self, user_id: &str) -> rusqlite::Result<i64> {
        self.store.count_runs_by_user(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings() {
        assert_eq!(RunStatus::parse("success"), Some(RunStatus::Success));
        assert_eq!(RunStatus::Failure.as_str(), "failure");
        assert!(RunStatus::parse("pending").is_none());
        assert_eq!(
            serde_json::to_value(RunStatus::Failure).unwrap(),
            serde_json::json!("failure")
        );
    }

    #[test]
    fn output_omits_absent_fields() {
        let out = RunOutput {
            response: Some("hi".into()),
            error: None,
        };
        assert_eq!(
            serde_json::to_value(&out).unwrap(),
            serde_json::json!({"response": "hi"})
        );
    }
}
