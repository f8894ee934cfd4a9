use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};

use crate::prompts::{DocumentMeta, PromptDraft, PromptStore, PromptTemplate};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

const PROMPT_SELECT: &str = "SELECT p.id, p.title, p.body, p.notes, p.created_by, u.name,
        p.subgroup_id, p.group_id, p.favorites_count, p.documents, p.created_at, p.updated_at
    FROM prompts p LEFT JOIN users u ON u.id = p.created_by";

fn row_to_prompt(row: &rusqlite::Row<'_>) -> rusqlite::Result<PromptTemplate> {
    let documents_raw: String = row.get(9)?;
    let documents: Vec<DocumentMeta> = serde_json::from_str(&documents_raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(PromptTemplate {
        id: row.get(0)?,
        title: row.get(1)?,
        body: row.get(2)?,
        notes: row.get(3)?,
        created_by: row.get(4)?,
        creator_name: row.get(5)?,
        subgroup_id: row.get(6)?,
        group_id: row.get(7)?,
        favorites_count: row.get(8)?,
        documents,
        created_at: column_datetime(row, 10)?,
        updated_at: column_datetime(row, 11)?,
    })
}

fn query_prompt(conn: &Connection, id: &str) -> rusqlite::Result<Option<PromptTemplate>> {
    conn.query_row(&format!("{PROMPT_SELECT} WHERE p.id = ?1"), [id], row_to_prompt)
        .optional()
}

fn group_of_subgroup(conn: &Connection, subgroup_id: &str) -> rusqlite::Result<String> {
    conn.query_row(
        "SELECT group_id FROM prompt_subgroups WHERE id = ?1",
        [subgroup_id],
        |r| r.get(0),
    )
}

fn documents_json(documents: &[DocumentMeta]) -> rusqlite::Result<String> {
    serde_json::to_string(documents).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[async_trait]
impl PromptStore for Database {
    async fn list_prompts(&self, subgroup_id: Option<&str>) -> rusqlite::Result<Vec<PromptTemplate>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "{PROMPT_SELECT} WHERE (?1 IS NULL OR p.subgroup_id = ?1)
             ORDER BY p.created_at DESC, p.id DESC"
        ))?;
        let rows = stmt.query_map([subgroup_id], row_to_prompt)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn get_prompt(&self, id: &str) -> rusqlite::Result<Option<PromptTemplate>> {
        let conn = self.connection.lock().await;
        query_prompt(&conn, id)
    }

    async fn create_prompt(
        &self,
        draft: &PromptDraft,
        documents: &[DocumentMeta],
        created_by: &str,
    ) -> rusqlite::Result<PromptTemplate> {
        let conn = self.connection.lock().await;
        let group_id = group_of_subgroup(&conn, &draft.subgroup_id)?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_db_string(&Utc::now());
        conn.execute(
            "INSERT INTO prompts (id, title, body, notes, created_by, subgroup_id, group_id,
                                  favorites_count, documents, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)",
            rusqlite::params![
                &id,
                &draft.title,
                &draft.body,
                &draft.notes,
                created_by,
                &draft.subgroup_id,
                &group_id,
                documents_json(documents)?,
                &now,
            ],
        )?;
        query_prompt(&conn, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)
    }

    async fn update_prompt(
        &self,
        id: &str,
        draft: &PromptDraft,
        new_documents: &[DocumentMeta],
    ) -> rusqlite::Result<Option<PromptTemplate>> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let Some(existing) = query_prompt(&tx, id)? else {
            return Ok(None);
        };
        let group_id = group_of_subgroup(&tx, &draft.subgroup_id)?;
        let mut documents = existing.documents;
        documents.extend_from_slice(new_documents);
        tx.execute(
            "UPDATE prompts SET title = ?1, body = ?2, notes = ?3, subgroup_id = ?4,
                    group_id = ?5, documents = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                &draft.title,
                &draft.body,
                &draft.notes,
                &draft.subgroup_id,
                &group_id,
                documents_json(&documents)?,
                to_db_string(&Utc::now()),
                id,
            ],
        )?;
        let updated = query_prompt(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    async fn delete_prompt(&self, id: &str) -> rusqlite::Result<bool> {
        let conn = self.connection.lock().await;
        let n = conn.execute("DELETE FROM prompts WHERE id = ?1", [id])?;
        Ok(n > 0)
    }
}
