//! Request bodies that may arrive as JSON or as multipart/form-data.
//!
//! Both shapes are read into [`FormPayload`] by the extractor and then validated
//! into one strict type ([`PromptDraft`] or [`RunRequest`]) before a handler
//! touches storage or the run orchestrator.

use std::collections::BTreeMap;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::AppError;
use crate::prompts::PromptDraft;
use crate::runner::RunRequest;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

#[derive(Debug, Clone, Default)]
pub struct MultipartForm {
    pub fields: BTreeMap<String, String>,
    pub files: Vec<UploadedFile>,
}

#[derive(Debug, Clone)]
pub enum FormPayload<T> {
    Json(T),
    Multipart(MultipartForm),
}

impl<S, T> FromRequest<S> for FormPayload<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !is_multipart {
            let Json(body) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::BadRequest(e.body_text()))?;
            return Ok(FormPayload::Json(body));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?;
        let mut form = MultipartForm::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AppError::BadRequest(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let content_type = field
                        .content_type()
                        .unwrap_or("application/octet-stream")
                        .to_string();
                    let bytes = field
                        .bytes()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    // 浏览器对未选择文件的 input 也会发送空的文件段
                    if file_name.is_empty() && bytes.is_empty() {
                        continue;
                    }
                    form.files.push(UploadedFile {
                        field: name,
                        file_name,
                        content_type,
                        bytes,
                    });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| AppError::BadRequest(e.body_text()))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(FormPayload::Multipart(form))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptFields {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub prompt_text: Option<String>,
    /// Older clients send the body as `content`.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub subgroup_id: Option<String>,
}

pub type PromptPayload = FormPayload<PromptFields>;

pub const DOCUMENTS_FIELD: &str = "documents";

impl PromptFields {
    fn from_form(fields: &BTreeMap<String, String>) -> Self {
        let get = |k: &str| fields.get(k).cloned();
        Self {
            title: get("title"),
            prompt_text: get("prompt_text"),
            content: get("content"),
            notes: get("notes"),
            subgroup_id: get("subgroup_id"),
        }
    }

    pub fn into_draft(self) -> Result<PromptDraft, AppError> {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let title = non_blank(self.title).map(|s| s.trim().to_string());
        let body = non_blank(self.prompt_text).or_else(|| non_blank(self.content));
        let subgroup_id = non_blank(self.subgroup_id).map(|s| s.trim().to_string());

        let mut missing = Vec::new();
        if title.is_none() {
            missing.push("title");
        }
        if body.is_none() {
            missing.push("prompt_text");
        }
        if subgroup_id.is_none() {
            missing.push("subgroup_id");
        }
        match (title, body, subgroup_id) {
            (Some(title), Some(body), Some(subgroup_id)) => Ok(PromptDraft {
                title,
                body,
                notes: non_blank(self.notes),
                subgroup_id,
            }),
            _ => Err(AppError::BadRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ))),
        }
    }
}

impl PromptPayload {
    /// The validated draft plus any attached documents.
    pub fn into_draft(self) -> Result<(PromptDraft, Vec<UploadedFile>), AppError> {
        match self {
            FormPayload::Json(fields) => Ok((fields.into_draft()?, Vec::new())),
            FormPayload::Multipart(form) => {
                let draft = PromptFields::from_form(&form.fields).into_draft()?;
                let documents = form
                    .files
                    .into_iter()
                    .filter(|f| f.field == DOCUMENTS_FIELD)
                    .collect();
                Ok((draft, documents))
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: Option<Map<String, Value>>,
}

pub type RunPayload = FormPayload<RunBody>;

impl RunPayload {
    /// Multipart text fields are variable values; a file part supplies its UTF-8
    /// text as the value of the variable named by the part, replacing any text
    /// field of the same name.
    pub fn into_run_request(self) -> Result<RunRequest, AppError> {
        match self {
            FormPayload::Json(body) => Ok(RunRequest {
                variables: body.variables,
                parameters: body.parameters.unwrap_or_default(),
            }),
            FormPayload::Multipart(form) => {
                let mut variables = form.fields;
                for file in form.files {
                    let text = String::from_utf8(file.bytes.to_vec()).map_err(|_| {
                        AppError::BadRequest(format!(
                            "File '{}' for variable '{}' is not valid UTF-8 text",
                            file.file_name, file.field
                        ))
                    })?;
                    variables.insert(file.field, text);
                }
                Ok(RunRequest {
                    variables,
                    parameters: Map::new(),
                })
            }
        }
    }
}
