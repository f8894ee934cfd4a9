use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};

use crate::llm_config::{LlmConfigChanges, LlmConfigStore, LlmConfiguration, NewLlmConfig, ProviderKind};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

const CONFIG_COLUMNS: &str = "id, config_name, api_type, api_base_url, api_key_env_var,
    model_name, default_parameters, is_active, created_at, updated_at";

fn row_to_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<LlmConfiguration> {
    let api_type: String = row.get(2)?;
    let api_type = ProviderKind::parse(&api_type).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown api_type {api_type:?}").into(),
        )
    })?;
    let params_raw: Option<String> = row.get(6)?;
    let default_parameters = match params_raw {
        Some(raw) => Some(serde_json::from_str::<Map<String, Value>>(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(LlmConfiguration {
        id: row.get(0)?,
        config_name: row.get(1)?,
        api_type,
        api_base_url: row.get(3)?,
        api_key_env_var: row.get(4)?,
        model_name: row.get(5)?,
        default_parameters,
        is_active: row.get::<_, i64>(7)? != 0,
        created_at: column_datetime(row, 8)?,
        updated_at: column_datetime(row, 9)?,
    })
}

fn query_config(conn: &Connection, id: &str) -> rusqlite::Result<Option<LlmConfiguration>> {
    conn.query_row(
        &format!("SELECT {CONFIG_COLUMNS} FROM llm_configs WHERE id = ?1"),
        [id],
        row_to_config,
    )
    .optional()
}

fn params_json(params: &Option<Map<String, Value>>) -> rusqlite::Result<Option<String>> {
    params
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

#[async_trait]
impl LlmConfigStore for Database {
    async fn list_configs(&self) -> rusqlite::Result<Vec<LlmConfiguration>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM llm_configs ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_config)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn get_config(&self, id: &str) -> rusqlite::Result<Option<LlmConfiguration>> {
        let conn = self.connection.lock().await;
        query_config(&conn, id)
    }

    async fn get_active_config(&self) -> rusqlite::Result<Option<LlmConfiguration>> {
        let conn = self.connection.lock().await;
        conn.query_row(
            &format!("SELECT {CONFIG_COLUMNS} FROM llm_configs WHERE is_active = 1"),
            [],
            row_to_config,
        )
        .optional()
    }

    async fn create_config(
        &self,
        new: &NewLlmConfig,
        activate: bool,
    ) -> rusqlite::Result<LlmConfiguration> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = to_db_string(&Utc::now());
        if activate {
            tx.execute(
                "UPDATE llm_configs SET is_active = 0, updated_at = ?1 WHERE is_active = 1",
                [&now],
            )?;
        }
        tx.execute(
            "INSERT INTO llm_configs (id, config_name, api_type, api_base_url, api_key_env_var,
                                      model_name, default_parameters, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
            rusqlite::params![
                &id,
                &new.config_name,
                new.api_type.as_str(),
                &new.api_base_url,
                &new.api_key_env_var,
                &new.model_name,
                params_json(&new.default_parameters)?,
                activate as i64,
                &now,
            ],
        )?;
        let created = query_config(&tx, &id)?.ok_or(rusqlite::Error::QueryReturnedNoRows)?;
        tx.commit()?;
        Ok(created)
    }

    async fn update_config(
        &self,
        id: &str,
        changes: &LlmConfigChanges,
    ) -> rusqlite::Result<Option<LlmConfiguration>> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let Some(mut cfg) = query_config(&tx, id)? else {
            return Ok(None);
        };
        if let Some(v) = &changes.config_name {
            cfg.config_name = v.clone();
        }
        if let Some(v) = changes.api_type {
            cfg.api_type = v;
        }
        if let Some(v) = &changes.api_base_url {
            cfg.api_base_url = v.clone();
        }
        if let Some(v) = &changes.api_key_env_var {
            cfg.api_key_env_var = v.clone();
        }
        if let Some(v) = &changes.model_name {
            cfg.model_name = v.clone();
        }
        if let Some(v) = &changes.default_parameters {
            cfg.default_parameters = v.clone();
        }
        tx.execute(
            "UPDATE llm_configs SET config_name = ?1, api_type = ?2, api_base_url = ?3,
                    api_key_env_var = ?4, model_name = ?5, default_parameters = ?6, updated_at = ?7
             WHERE id = ?8",
            rusqlite::params![
                &cfg.config_name,
                cfg.api_type.as_str(),
                &cfg.api_base_url,
                &cfg.api_key_env_var,
                &cfg.model_name,
                params_json(&cfg.default_parameters)?,
                to_db_string(&Utc::now()),
                id,
            ],
        )?;
        let updated = query_config(&tx, id)?;
        tx.commit()?;
        Ok(updated)
    }

    async fn set_active(&self, id: &str) -> rusqlite::Result<bool> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let now = to_db_string(&Utc::now());
        // 先全部停用，再激活目标；同一事务内完成
        tx.execute(
            "UPDATE llm_configs SET is_active = 0, updated_at = ?1 WHERE is_active = 1 AND id != ?2",
            rusqlite::params![&now, id],
        )?;
        let n = tx.execute(
            "UPDATE llm_configs SET is_active = 1, updated_at = ?1 WHERE id = ?2",
            rusqlite::params![&now, id],
        )?;
        if n == 0 {
            tx.rollback()?;
            return Ok(false);
        }
        tx.commit()?;
        tracing::info!(config_id = %id, "LLM configuration activated");
        Ok(true)
    }

    async fn deactivate(&self, id: &str) -> rusqlite::Result<bool> {
        let conn = self.connection.lock().await;
        let n = conn.execute(
            "UPDATE llm_configs SET is_active = 0, updated_at = ?1 WHERE id = ?2 AND is_active = 1",
            rusqlite::params![to_db_string(&Utc::now()), id],
        )?;
        Ok(n > 0)
    }

    async fn delete_config(&self, id: &str) -> rusqlite::Result<bool> {
        let conn = self.connection.lock().await;
        let n = conn.execute(
            "DELETE FROM llm_configs WHERE id = ?1 AND is_active = 0",
            [id],
        )?;
        Ok(n > 0)
    }
}
