use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use crate::error::AppError;
use crate::sessions::{SessionRecord, SessionStore};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

#[async_trait]
impl SessionStore for Database {
    async fn insert_session(&self, record: &SessionRecord) -> Result<(), AppError> {
        let conn = self.connection.lock().await;
        conn.execute(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![
                &record.token_hash,
                &record.user_id,
                to_db_string(&record.created_at),
                to_db_string(&record.expires_at),
            ],
        )?;
        Ok(())
    }

    async fn get_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AppError> {
        let conn = self.connection.lock().await;
        let record = conn
            .query_row(
                "SELECT token_hash, user_id, created_at, expires_at FROM sessions WHERE token_hash = ?1",
                [token_hash],
                |row| {
                    Ok(SessionRecord {
                        token_hash: row.get(0)?,
                        user_id: row.get(1)?,
                        created_at: column_datetime(row, 2)?,
                        expires_at: column_datetime(row, 3)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn delete_session(&self, token_hash: &str) -> Result<bool, AppError> {
        let conn = self.connection.lock().await;
        let n = conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
        Ok(n > 0)
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let conn = self.connection.lock().await;
        let n = conn.execute(
            "DELETE FROM sessions WHERE expires_at <= ?1",
            [to_db_string(&now)],
        )?;
        Ok(n as u64)
    }
}
