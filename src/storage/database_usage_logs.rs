use async_trait::async_trait;
use chrono::NaiveDate;

use crate::stats::StatsSource;
use crate::usage::{RunInput, RunLogEntry, RunOutput, RunStatus, UsageLogStore};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

fn json_column<T: serde::de::DeserializeOwned>(
    row: &rusqlite::Row<'_>,
    idx: usize,
) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunLogEntry> {
    let status: String = row.get(7)?;
    Ok(RunLogEntry {
        id: Some(row.get(0)?),
        prompt_id: row.get(1)?,
        prompt_name: row.get(2)?,
        user_id: row.get(3)?,
        config_id: row.get(4)?,
        input: json_column::<RunInput>(row, 5)?,
        output: json_column::<RunOutput>(row, 6)?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failure),
        started_at: column_datetime(row, 8)?,
        finished_at: column_datetime(row, 9)?,
        duration_ms: row.get(10)?,
    })
}

#[async_trait]
impl UsageLogStore for Database {
    async fn insert_run_log(&self, entry: &RunLogEntry) -> rusqlite::Result<i64> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO run_logs (
                prompt_id, prompt_name, user_id, config_id, input, output,
                status, started_at, finished_at, duration_ms
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                &entry.prompt_id,
                &entry.prompt_name,
                &entry.user_id,
                &entry.config_id,
                to_json(&entry.input)?,
                to_json(&entry.output)?,
                entry.status.as_str(),
                to_db_string(&entry.started_at),
                to_db_string(&entry.finished_at),
                entry.duration_ms,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn count_runs_by_user(&self, user_id: &str) -> rusqlite::Result<i64> {
        let conn = self.connection.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM run_logs WHERE user_id = ?1",
            [user_id],
            |r| r.get(0),
        )
    }

    async fn list_runs_by_user(
        &self,
        user_id: &str,
        limit: i64,
        before_id: Option<i64>,
    ) -> rusqlite::Result<Vec<RunLogEntry>> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, prompt_id, prompt_name, user_id, config_id, input, output,
                    status, started_at, finished_at, duration_ms
             FROM run_logs
             WHERE user_id = ?1 AND (?2 IS NULL OR id < ?2)
             ORDER BY id DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(rusqlite::params![user_id, before_id, limit], row_to_entry)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

#[async_trait]
impl StatsSource for Database {
    async fn count_prompts_by_creator(&self, user_id: &str) -> rusqlite::Result<i64> {
        let conn = self.connection.lock().await;
        conn.query_row(
            "SELECT COUNT(*) FROM prompts WHERE created_by = ?1",
            [user_id],
            |r| r.get(0),
        )
    }

    async fn count_favorites_received(&self, user_id: &str) -> rusqlite::Result<i64> {
        let conn = self.connection.lock().await;
        conn.query_row(
            "SELECT COALESCE(SUM(favorites_count), 0) FROM prompts WHERE created_by = ?1",
            [user_id],
            |r| r.get(0),
        )
    }

    async fn run_days_by_user(&self, user_id: &str) -> rusqlite::Result<Vec<NaiveDate>> {
        let conn = self.connection.lock().await;
        // started_at 以 UTC `Z` 格式存储，前 10 位即日期
        let mut stmt = conn.prepare(
            "SELECT DISTINCT substr(started_at, 1, 10) AS day FROM run_logs
             WHERE user_id = ?1 ORDER BY day DESC",
        )?;
        let rows = stmt.query_map([user_id], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            let raw = r?;
            match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
                Ok(day) => out.push(day),
                Err(e) => tracing::warn!(day = %raw, error = %e, "skipping unparseable run date"),
            }
        }
        Ok(out)
    }
}
