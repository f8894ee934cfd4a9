//! Executes a prompt against the active LLM configuration.
//!
//! A run moves `Idle -> Validating -> Invoking -> {Succeeded, Failed}`. Only runs
//! that reach `Invoking` produce a usage log entry, and they produce exactly one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::AppError;
use crate::gateway::{GatewayFailure, GatewayRequest, LlmGateway};
use crate::llm_config::{LlmConfigStore, LlmConfiguration};
use crate::prompts::PromptTemplate;
use crate::template;
use crate::usage::{RunInput, RunLogEntry, RunOutput, RunStatus, UsageLogger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Invoking,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::Validating => "validating",
            RunState::Invoking => "invoking",
            RunState::Succeeded => "succeeded",
            RunState::Failed => "failed",
        }
    }
}

/// Values for one run, already pulled out of whatever request body carried them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    pub variables: BTreeMap<String, String>,
    /// Shallow-merged over the configuration's default parameters.
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub rendered_prompt: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_error: Option<String>,
}

/// Rejections that happen before anything is invoked or logged.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Missing values for variables: {}", .missing.join(", "))]
    Validation { missing: Vec<String> },

    #[error("No active LLM configuration")]
    NoActiveConfiguration,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<RunError> for AppError {
    fn from(e: RunError) -> Self {
        match e {
            RunError::Validation { missing } => AppError::Validation { missing },
            RunError::NoActiveConfiguration => AppError::NoActiveConfiguration,
            RunError::Storage(e) => AppError::Db(e),
        }
    }
}

/// Looks a credential up by environment variable name.
pub type CredentialLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub fn env_credentials() -> CredentialLookup {
    Arc::new(|name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}

/// Names from `names` with no value, or only whitespace, in `values`.
pub fn missing_variables(names: &[String], values: &BTreeMap<String, String>) -> Vec<String> {
    names
        .iter()
        .filter(|n| values.get(*n).is_none_or(|v| v.trim().is_empty()))
        .cloned()
        .collect()
}

/// Call values win over configuration defaults. Not recursive.
pub fn merge_parameters(
    defaults: Option<&Map<String, Value>>,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut merged = defaults.cloned().unwrap_or_default();
    for (k, v) in overrides {
        merged.insert(k.clone(), v.clone());
    }
    merged
}

#[derive(Clone)]
pub struct RunOrchestrator {
    gateway: Arc<dyn LlmGateway>,
    configs: Arc<dyn LlmConfigStore>,
    usage: UsageLogger,
    credentials: CredentialLookup,
    timeout: Duration,
}

impl RunOrchestrator {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        configs: Arc<dyn LlmConfigStore>,
        usage: UsageLogger,
        timeout: Duration,
    ) -> Self {
        Self {
            gateway,
            configs,
            usage,
            credentials: env_credentials(),
            timeout,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialLookup) -> Self {
        self.credentials = credentials;
        self
    }

    pub async fn run(
        &self,
        prompt: &PromptTemplate,
        user_id: Option<&str>,
        request: RunRequest,
    ) -> Result<RunOutcome, RunError> {
        let mut state = RunState::Idle;
        tracing::debug!(prompt_id = %prompt.id, state = state.as_str(), "run requested");

        let names = template::extract_variables(&prompt.body);
        if !names.is_empty() {
            state = RunState::Validating;
            let missing = missing_variables(&names, &request.variables);
            if !missing.is_empty() {
                tracing::info!(
                    prompt_id = %prompt.id,
                    state = state.as_str(),
                    missing = ?missing,
                    "run rejected"
                );
                return Err(RunError::Validation { missing });
            }
        }

        let values: HashMap<String, String> = request
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let rendered = template::substitute(&prompt.body, &values);

        // 配置快照：本次运行只使用此刻的激活配置
        let Some(config) = self.configs.get_active_config().await? else {
            tracing::warn!(prompt_id = %prompt.id, "run rejected: no active LLM configuration");
            return Err(RunError::NoActiveConfiguration);
        };

        state = RunState::Invoking;
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::debug!(
            prompt_id = %prompt.id,
            config_id = %config.id,
            state = state.as_str(),
            "invoking LLM"
        );

        let result = self.invoke(&config, &rendered, &request.parameters).await;

        let elapsed = clock.elapsed();
        let finished_at = started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());
        let duration_ms = i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX);

        let (status, output) = match result {
            Ok(text) => {
                state = RunState::Succeeded;
                (
                    RunStatus::Success,
                    RunOutput {
                        response: Some(text),
                        error: None,
                    },
                )
            }
            Err(failure) => {
                state = RunState::Failed;
                (
                    RunStatus::Failure,
                    RunOutput {
                        response: None,
                        error: Some(failure.to_string()),
                    },
                )
            }
        };

        tracing::info!(
            prompt_id = %prompt.id,
            config_id = %config.id,
            state = state.as_str(),
            status = status.as_str(),
            duration_ms,
            "run finished"
        );

        let entry = RunLogEntry {
            id: None,
            prompt_id: Some(prompt.id.clone()),
            prompt_name: prompt.title.clone(),
            user_id: user_id.map(str::to_string),
            config_id: Some(config.id.clone()),
            input: RunInput {
                variables: request.variables,
                final_prompt: rendered.clone(),
            },
            output: output.clone(),
            status,
            started_at,
            finished_at,
            duration_ms,
        };
        let (log_id, log_error) = match self.usage.record(&entry).await {
            Ok(id) => (Some(id), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(RunOutcome {
            status,
            output: output.response,
            error: output.error,
            rendered_prompt: rendered,
            started_at,
            finished_at,
            duration_ms,
            log_id,
            log_error,
        })
    }

    async fn invoke(
        &self,
        config: &LlmConfiguration,
        rendered: &str,
        overrides: &Map<String, Value>,
    ) -> Result<String, GatewayFailure> {
        let credential = (self.credentials)(&config.api_key_env_var);
        if credential.is_none() && config.api_type.requires_credential() {
            return Err(GatewayFailure::MissingCredential {
                env_var: config.api_key_env_var.clone(),
            });
        }
        let request = GatewayRequest {
            kind: config.api_type,
            base_url: config.api_base_url.clone(),
            model: config.model_name.clone(),
            credential,
            parameters: merge_parameters(config.default_parameters.as_ref(), overrides),
            prompt: rendered.to_string(),
        };
        match tokio::time::timeout(self.timeout, self.gateway.invoke(&request)).await {
            Ok(result) => result.map(|r| r.text),
            Err(_) => Err(GatewayFailure::Timeout(self.timeout)),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gateway::GatewayResponse;
    use crate::llm_config::{NewLlmConfig, ProviderKind};
    use crate::storage::Database;
    use crate::usage::UsageLogStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    /// Replays queued replies in order and records every request it sees.
    pub(crate) struct ScriptedGateway {
        replies: Mutex<VecDeque<Result<GatewayResponse, GatewayFailure>>>,
        pub(crate) calls: Mutex<Vec<GatewayRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedGateway {
        pub(crate) fn new(replies: Vec<Result<GatewayResponse, GatewayFailure>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        pub(crate) fn replying(text: &str) -> Self {
            Self::new(vec![Ok(GatewayResponse { text: text.into() })])
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl LlmGateway for ScriptedGateway {
        async fn invoke(
            &self,
            request: &GatewayRequest,
        ) -> Result<GatewayResponse, GatewayFailure> {
            self.calls.lock().await.push(request.clone());
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.replies
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Err(GatewayFailure::Network("no scripted reply".into())))
        }
    }

    struct BrokenUsageStore;

    #[async_trait]
    impl UsageLogStore for BrokenUsageStore {
        async fn insert_run_log(&self, _entry: &RunLogEntry) -> rusqlite::Result<i64> {
            Err(rusqlite::Error::InvalidQuery)
        }
        async fn count_runs_by_user(&self, _user_id: &str) -> rusqlite::Result<i64> {
            Ok(0)
        }
        async fn list_runs_by_user(
            &self,
            _user_id: &str,
            _limit: i64,
            _before_id: Option<i64>,
        ) -> rusqlite::Result<Vec<RunLogEntry>> {
            Ok(Vec::new())
        }
    }

    pub(crate) fn test_prompt(body: &str) -> PromptTemplate {
        PromptTemplate {
            id: "prompt-1".into(),
            title: "Test prompt".into(),
            body: body.into(),
            notes: None,
            created_by: None,
            creator_name: None,
            subgroup_id: "s".into(),
            group_id: "g".into(),
            favorites_count: 0,
            documents: Vec::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn vars(pairs: &[(&str, &str)]) -> RunRequest {
        RunRequest {
            variables: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            parameters: Map::new(),
        }
    }

    fn fake_env() -> CredentialLookup {
        Arc::new(|name: &str| (name == "TEST_KEY").then(|| "sk-test".to_string()))
    }

    async fn db_with_active(kind: ProviderKind, env_var: &str) -> Arc<Database> {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let mut defaults = Map::new();
        defaults.insert("temperature".into(), json!(0.7));
        defaults.insert("top_p".into(), json!(1));
        let new = NewLlmConfig {
            config_name: "primary".into(),
            api_type: kind,
            api_base_url: None,
            api_key_env_var: env_var.into(),
            model_name: "model-x".into(),
            default_parameters: Some(defaults),
        };
        let cfg = db.create_config(&new, true).await.unwrap();
        assert!(cfg.is_active);
        db
    }

    fn orchestrator(db: &Arc<Database>, gateway: Arc<dyn LlmGateway>) -> RunOrchestrator {
        RunOrchestrator::new(
            gateway,
            db.clone(),
            UsageLogger::new(db.clone()),
            Duration::from_secs(5),
        )
        .with_credentials(fake_env())
    }

    #[test]
    fn missing_treats_blank_as_absent() {
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), "x".to_string());
        values.insert("b".to_string(), "   ".to_string());
        assert_eq!(missing_variables(&names, &values), vec!["b", "c"]);
    }

    #[test]
    fn call_parameters_win_over_defaults() {
        let mut defaults = Map::new();
        defaults.insert("temperature".into(), json!(0.7));
        defaults.insert("nested".into(), json!({"a": 1, "b": 2}));
        let mut overrides = Map::new();
        overrides.insert("temperature".into(), json!(0.0));
        overrides.insert("nested".into(), json!({"a": 9}));
        let merged = merge_parameters(Some(&defaults), &overrides);
        assert_eq!(merged["temperature"], json!(0.0));
        assert_eq!(merged["nested"], json!({"a": 9}));
        assert_eq!(merge_parameters(None, &overrides).len(), 2);
    }

    #[tokio::test]
    async fn successful_run_logs_one_success_entry() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("a fine haiku"));
        let orch = orchestrator(&db, gw.clone());

        let mut req = vars(&[("topic", "rust")]);
        req.parameters.insert("temperature".into(), json!(0.1));
        let outcome = orch
            .run(&test_prompt("Haiku about {{topic}}"), Some("u1"), req)
            .await
            .unwrap();

        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.output.as_deref(), Some("a fine haiku"));
        assert_eq!(outcome.rendered_prompt, "Haiku about rust");
        assert!(outcome.duration_ms >= 0);
        assert!(outcome.finished_at >= outcome.started_at);
        assert!(outcome.log_id.is_some());

        let calls = gw.calls.lock().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].credential.as_deref(), Some("sk-test"));
        assert_eq!(calls[0].model, "model-x");
        assert_eq!(calls[0].parameters["temperature"], json!(0.1));
        assert_eq!(calls[0].parameters["top_p"], json!(1));

        let logs = db.list_runs_by_user("u1", 10, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, RunStatus::Success);
        assert_eq!(logs[0].input.final_prompt, "Haiku about rust");
        assert!(logs[0].duration_ms >= 0);
    }

    #[tokio::test]
    async fn gateway_failure_logs_one_failure_entry() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let gw = Arc::new(ScriptedGateway::new(vec![Err(GatewayFailure::Status {
            status: 500,
            message: "upstream exploded".into(),
        })]));
        let orch = orchestrator(&db, gw);

        let outcome = orch
            .run(&test_prompt("no vars"), Some("u1"), RunRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failure);
        assert!(outcome.error.as_deref().unwrap().contains("upstream exploded"));

        let logs = db.list_runs_by_user("u1", 10, None).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, RunStatus::Failure);
        assert!(logs[0].output.error.as_deref().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn validation_failure_calls_nothing_and_logs_nothing() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("unused"));
        let orch = orchestrator(&db, gw.clone());

        let err = orch
            .run(
                &test_prompt("{{a}} and {{b}}"),
                Some("u1"),
                vars(&[("a", "x"), ("b", " ")]),
            )
            .await
            .unwrap_err();
        match err {
            RunError::Validation { missing } => assert_eq!(missing, vec!["b"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(gw.calls.lock().await.is_empty());
        assert_eq!(db.count_runs_by_user("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn prompt_without_variables_goes_straight_to_invoking() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("ok"));
        let orch = orchestrator(&db, gw.clone());

        // extra unrelated values are ignored
        let outcome = orch
            .run(&test_prompt("Tell me a joke"), None, vars(&[("x", "")]))
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(gw.calls.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn no_active_configuration_is_rejected_unlogged() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let gw = Arc::new(ScriptedGateway::replying("unused"));
        let orch = orchestrator(&db, gw.clone());

        let err = orch
            .run(&test_prompt("hi"), Some("u1"), RunRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::NoActiveConfiguration));
        assert!(gw.calls.lock().await.is_empty());
        assert_eq!(db.count_runs_by_user("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn slow_gateway_times_out_and_is_logged() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("late").with_delay(Duration::from_secs(2)));
        let orch = RunOrchestrator::new(
            gw,
            db.clone(),
            UsageLogger::new(db.clone()),
            Duration::from_millis(50),
        )
        .with_credentials(fake_env());

        let outcome = orch
            .run(&test_prompt("hi"), Some("u1"), RunRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failure);
        assert!(outcome.error.as_deref().unwrap().contains("timed out"));
        assert_eq!(db.count_runs_by_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_credential_fails_without_network_call() {
        let db = db_with_active(ProviderKind::Anthropic, "UNSET_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("unused"));
        let orch = orchestrator(&db, gw.clone());

        let outcome = orch
            .run(&test_prompt("hi"), Some("u1"), RunRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Failure);
        assert!(outcome.error.as_deref().unwrap().contains("UNSET_KEY"));
        assert!(gw.calls.lock().await.is_empty());
        assert_eq!(db.count_runs_by_user("u1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn ollama_runs_without_credential() {
        let db = db_with_active(ProviderKind::Ollama, "UNSET_KEY").await;
        let gw = Arc::new(ScriptedGateway::replying("local"));
        let orch = orchestrator(&db, gw.clone());

        let outcome = orch
            .run(&test_prompt("hi"), None, RunRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Success);
        assert!(gw.calls.lock().await[0].credential.is_none());
    }

    #[tokio::test]
    async fn log_failure_does_not_mask_run_result() {
        let db = db_with_active(ProviderKind::OpenAi, "TEST_KEY").await;
        let orch = RunOrchestrator::new(
            Arc::new(ScriptedGateway::replying("still here")),
            db.clone(),
            UsageLogger::new(Arc::new(BrokenUsageStore)),
            Duration::from_secs(5),
        )
        .with_credentials(fake_env());

        let outcome = orch
            .run(&test_prompt("hi"), Some("u1"), RunRequest::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.output.as_deref(), Some("still here"));
        assert!(outcome.log_id.is_none());
        assert!(outcome.log_error.is_some());
    }
}
