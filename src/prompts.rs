use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    pub order_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Subgroup {
    pub id: String,
    pub group_id: String,
    pub name: String,
    pub order_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupWithSubgroups {
    #[serde(flatten)]
    pub group: Group,
    pub subgroups: Vec<Subgroup>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubgroupDetails {
    #[serde(flatten)]
    pub subgroup: Subgroup,
    pub prompt_count: i64,
    pub description: String,
}

impl SubgroupDetails {
    pub fn new(subgroup: Subgroup, prompt_count: i64) -> Self {
        let description = format!("Prompts for {}", subgroup.name);
        Self {
            subgroup,
            prompt_count,
            description,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateGroupPayload {
    pub name: String,
    #[serde(default)]
    pub order_id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubgroupPayload {
    pub group_id: String,
    pub name: String,
    #[serde(default)]
    pub order_id: i64,
}

/// Metadata for a file attached to a prompt. The bytes live under the uploads dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub name: String,
    /// File name under the uploads directory.
    pub stored_name: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptTemplate {
    pub id: String,
    pub title: String,
    #[serde(rename = "prompt_text")]
    pub body: String,
    pub notes: Option<String>,
    pub created_by: Option<String>,
    pub creator_name: Option<String>,
    pub subgroup_id: String,
    pub group_id: String,
    pub favorites_count: i64,
    pub documents: Vec<DocumentMeta>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PromptTemplate {
    pub fn variables(&self) -> Vec<String> {
        crate::template::extract_variables(&self.body)
    }

    pub fn editable_by(&self, user: &crate::users::User) -> bool {
        user.is_admin() || self.created_by.as_deref() == Some(user.id.as_str())
    }
}

/// A validated create/update request, independent of how it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDraft {
    pub title: String,
    pub body: String,
    pub notes: Option<String>,
    pub subgroup_id: String,
}

#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    async fn list_groups(&self) -> rusqlite::Result<Vec<GroupWithSubgroups>>;
    async fn list_subgroups(&self, group_id: Option<&str>) -> rusqlite::Result<Vec<Subgroup>>;
    async fn get_subgroup(&self, id: &str) -> rusqlite::Result<Option<Subgroup>>;
    async fn subgroup_details(&self, id: &str) -> rusqlite::Result<Option<SubgroupDetails>>;
    async fn create_group(&self, name: &str, order_id: i64) -> rusqlite::Result<Group>;
    /// Returns `None` when the parent group does not exist.
    async fn create_subgroup(
        &self,
        group_id: &str,
        name: &str,
        order_id: i64,
    ) -> rusqlite::Result<Option<Subgroup>>;
}

#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn list_prompts(&self, subgroup_id: Option<&str>) -> rusqlite::Result<Vec<PromptTemplate>>;
    async fn get_prompt(&self, id: &str) -> rusqlite::Result<Option<PromptTemplate>>;
    /// The group reference is taken from the draft's subgroup.
    async fn create_prompt(
        &self,
        draft: &PromptDraft,
        documents: &[DocumentMeta],
        created_by: &str,
    ) -> rusqlite::Result<PromptTemplate>;
    /// Replaces the text fields and appends `new_documents` to the existing list.
    async fn update_prompt(
        &self,
        id: &str,
        draft: &PromptDraft,
        new_documents: &[DocumentMeta],
    ) -> rusqlite::Result<Option<PromptTemplate>>;
    async fn delete_prompt(&self, id: &str) -> rusqlite::Result<bool>;
}

#[async_trait]
pub trait FavoriteStore: Send + Sync {
    /// Marks or clears the favorite and returns the prompt's new favorites count,
    /// or `None` when the prompt does not exist. Repeats are no-ops.
    async fn set_favorite(
        &self,
        user_id: &str,
        prompt_id: &str,
        favorite: bool,
    ) -> rusqlite::Result<Option<i64>>;
    async fn list_favorites(&self, user_id: &str) -> rusqlite::Result<Vec<String>>;
}
