use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::rust::double_option;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Ollama,
    CustomRest,
}

impl ProviderKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" | "openai-compatible" => Some(ProviderKind::OpenAi),
            "anthropic" | "anthropic-compatible" => Some(ProviderKind::Anthropic),
            "ollama" | "local" | "ollama-compatible" => Some(ProviderKind::Ollama),
            "custom_rest" | "custom-rest" | "custom" => Some(ProviderKind::CustomRest),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Ollama => "ollama",
            ProviderKind::CustomRest => "custom_rest",
        }
    }

    /// Local ollama servers normally run without a key.
    pub fn requires_credential(self) -> bool {
        !matches!(self, ProviderKind::Ollama)
    }
}

/// A provider configuration. Holds the *name* of the env var with the key, never the key.
#[derive(Debug, Clone, Serialize)]
pub struct LlmConfiguration {
    pub id: String,
    pub config_name: String,
    pub api_type: ProviderKind,
    pub api_base_url: Option<String>,
    pub api_key_env_var: String,
    pub model_name: String,
    pub default_parameters: Option<Map<String, Value>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateLlmConfigPayload {
    #[serde(default)]
    pub config_name: Option<String>,
    #[serde(default)]
    pub api_type: Option<String>,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub api_key_env_var: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub default_parameters: Option<Value>,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateLlmConfigPayload {
    pub config_name: Option<String>,
    pub api_type: Option<String>,
    /// Absent = no change, `null` or `""` = clear.
    #[serde(default, with = "double_option")]
    pub api_base_url: Option<Option<String>>,
    pub api_key_env_var: Option<String>,
    pub model_name: Option<String>,
    /// Absent = no change, `null` or `""` = clear.
    #[serde(default, with = "double_option")]
    pub default_parameters: Option<Option<Value>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewLlmConfig {
    pub config_name: String,
    pub api_type: ProviderKind,
    pub api_base_url: Option<String>,
    pub api_key_env_var: String,
    pub model_name: String,
    pub default_parameters: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Default)]
pub struct LlmConfigChanges {
    pub config_name: Option<String>,
    pub api_type: Option<ProviderKind>,
    /// `Some(None)` clears the base url.
    pub api_base_url: Option<Option<String>>,
    pub api_key_env_var: Option<String>,
    pub model_name: Option<String>,
    pub default_parameters: Option<Option<Map<String, Value>>>,
}

impl LlmConfigChanges {
    pub fn is_empty(&self) -> bool {
        self.config_name.is_none()
            && self.api_type.is_none()
            && self.api_base_url.is_none()
            && self.api_key_env_var.is_none()
            && self.model_name.is_none()
            && self.default_parameters.is_none()
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_kind(raw: &str) -> Result<ProviderKind, AppError> {
    ProviderKind::parse(raw)
        .ok_or_else(|| AppError::BadRequest(format!("Unsupported api_type: {raw}")))
}

/// Accepts a JSON object or a string holding a JSON object. `null` and `""` mean none.
pub fn normalize_default_parameters(
    value: Option<Value>,
) -> Result<Option<Map<String, Value>>, AppError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(AppError::BadRequest(
                "default_parameters must be a JSON object".into(),
            )),
            Err(_) => Err(AppError::BadRequest(
                "Invalid JSON string for default_parameters".into(),
            )),
        },
        Some(_) => Err(AppError::BadRequest(
            "default_parameters must be an object or a valid JSON string".into(),
        )),
    }
}

impl CreateLlmConfigPayload {
    pub fn validate(self) -> Result<(NewLlmConfig, bool), AppError> {
        let config_name = non_blank(self.config_name);
        let api_type = non_blank(self.api_type);
        let api_key_env_var = non_blank(self.api_key_env_var);
        let model_name = non_blank(self.model_name);
        let (Some(config_name), Some(api_type), Some(api_key_env_var), Some(model_name)) =
            (config_name, api_type, api_key_env_var, model_name)
        else {
            return Err(AppError::BadRequest(
                "Missing required fields: config_name, api_type, api_key_env_var, model_name"
                    .into(),
            ));
        };
        let new = NewLlmConfig {
            config_name,
            api_type: parse_kind(&api_type)?,
            api_base_url: non_blank(self.api_base_url),
            api_key_env_var,
            model_name,
            default_parameters: normalize_default_parameters(self.default_parameters)?,
        };
        Ok((new, self.is_active))
    }
}

impl UpdateLlmConfigPayload {
    /// Splits into field changes plus the requested active flag, if any.
    pub fn validate(self) -> Result<(LlmConfigChanges, Option<bool>), AppError> {
        let required = |field: &str, v: Option<String>| -> Result<Option<String>, AppError> {
            match v {
                None => Ok(None),
                Some(s) if s.trim().is_empty() => {
                    Err(AppError::BadRequest(format!("{field} cannot be empty")))
                }
                Some(s) => Ok(Some(s.trim().to_string())),
            }
        };
        let changes = LlmConfigChanges {
            config_name: required("config_name", self.config_name)?,
            api_type: required("api_type", self.api_type)?
                .map(|s| parse_kind(&s))
                .transpose()?,
            api_base_url: self.api_base_url.map(non_blank),
            api_key_env_var: required("api_key_env_var", self.api_key_env_var)?,
            model_name: required("model_name", self.model_name)?,
            default_parameters: self
                .default_parameters
                .map(normalize_default_parameters)
                .transpose()?,
        };
        if changes.is_empty() && self.is_active.is_none() {
            return Err(AppError::BadRequest("No fields to update".into()));
        }
        Ok((changes, self.is_active))
    }
}

#[async_trait]
pub trait LlmConfigStore: Send + Sync {
    async fn list_configs(&self) -> rusqlite::Result<Vec<LlmConfiguration>>;
    async fn get_config(&self, id: &str) -> rusqlite::Result<Option<LlmConfiguration>>;
    async fn get_active_config(&self) -> rusqlite::Result<Option<LlmConfiguration>>;
    /// Inserts the configuration. With `activate`, every other configuration is
    /// deactivated in the same transaction.
    async fn create_config(
        &self,
        new: &NewLlmConfig,
        activate: bool,
    ) -> rusqlite::Result<LlmConfiguration>;
    async fn update_config(
        &self,
        id: &str,
        changes: &LlmConfigChanges,
    ) -> rusqlite::Result<Option<LlmConfiguration>>;
    /// Deactivates every other configuration and activates `id` in one transaction.
    /// Returns `false` when `id` does not exist, in which case nothing changes.
    async fn set_active(&self, id: &str) -> rusqlite::Result<bool>;
    async fn deactivate(&self, id: &str) -> rusqlite::Result<bool>;
    /// Deletes an inactive configuration. The active one is never deleted.
    async fn delete_config(&self, id: &str) -> rusqlite::Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn provider_kind_accepts_aliases() {
        assert_eq!(ProviderKind::parse("OpenAI"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::parse("custom_rest"), Some(ProviderKind::CustomRest));
        assert_eq!(ProviderKind::parse("local"), Some(ProviderKind::Ollama));
        assert!(ProviderKind::parse("zhipu").is_none());
        for k in [
            ProviderKind::OpenAi,
            ProviderKind::Anthropic,
            ProviderKind::Ollama,
            ProviderKind::CustomRest,
        ] {
            assert_eq!(ProviderKind::parse(k.as_str()), Some(k));
            assert_eq!(serde_json::to_value(k).unwrap(), json!(k.as_str()));
        }
    }

    #[test]
    fn default_parameters_object_or_string() {
        let obj = normalize_default_parameters(Some(json!({"temperature": 0.2}))).unwrap();
        assert_eq!(obj.unwrap()["temperature"], json!(0.2));
        let s = normalize_default_parameters(Some(json!("{\"top_p\": 1}"))).unwrap();
        assert_eq!(s.unwrap()["top_p"], json!(1));
        assert!(normalize_default_parameters(Some(json!(""))).unwrap().is_none());
        assert!(normalize_default_parameters(None).unwrap().is_none());
        assert!(normalize_default_parameters(Some(json!("[1,2]"))).is_err());
        assert!(normalize_default_parameters(Some(json!("{oops"))).is_err());
        assert!(normalize_default_parameters(Some(json!(42))).is_err());
    }

    #[test]
    fn create_requires_fields() {
        let err = CreateLlmConfigPayload {
            config_name: Some("gpt".into()),
            api_type: Some("openai".into()),
            ..Default::default()
        }
        .validate()
        .unwrap_err();
        assert!(err.to_string().starts_with("Missing required fields"));

        let (new, active) = CreateLlmConfigPayload {
            config_name: Some("gpt".into()),
            api_type: Some("openai".into()),
            api_key_env_var: Some("OPENAI_API_KEY".into()),
            model_name: Some("gpt-4o-mini".into()),
            api_base_url: Some("  ".into()),
            is_active: true,
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert!(active);
        assert!(new.api_base_url.is_none());
        assert_eq!(new.api_type, ProviderKind::OpenAi);
    }

    #[test]
    fn update_null_clears_but_absent_keeps() {
        let payload: UpdateLlmConfigPayload =
            serde_json::from_value(json!({"api_base_url": null, "default_parameters": null}))
                .unwrap();
        let (changes, _) = payload.validate().unwrap();
        assert_eq!(changes.api_base_url, Some(None));
        assert_eq!(changes.default_parameters, Some(None));

        let payload: UpdateLlmConfigPayload =
            serde_json::from_value(json!({"api_base_url": "", "model_name": "m"})).unwrap();
        let (changes, _) = payload.validate().unwrap();
        assert_eq!(changes.api_base_url, Some(None));
        assert!(changes.default_parameters.is_none());

        let payload: UpdateLlmConfigPayload = serde_json::from_value(json!({
            "api_base_url": " https://proxy.test ",
            "default_parameters": "{\"top_p\": 1}"
        }))
        .unwrap();
        let (changes, _) = payload.validate().unwrap();
        assert_eq!(changes.api_base_url, Some(Some("https://proxy.test".into())));
        assert_eq!(changes.default_parameters.unwrap().unwrap()["top_p"], json!(1));

        let payload: UpdateLlmConfigPayload =
            serde_json::from_value(json!({"model_name": "m"})).unwrap();
        let (changes, _) = payload.validate().unwrap();
        assert!(changes.api_base_url.is_none());
    }

    #[test]
    fn update_rejects_empty_and_blank() {
        assert!(UpdateLlmConfigPayload::default().validate().is_err());
        assert!(UpdateLlmConfigPayload {
            model_name: Some(" ".into()),
            ..Default::default()
        }
        .validate()
        .is_err());
        let (changes, active) = UpdateLlmConfigPayload {
            is_active: Some(false),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert!(changes.is_empty());
        assert_eq!(active, Some(false));
    }
}
