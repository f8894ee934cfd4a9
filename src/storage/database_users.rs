use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::error::AppError;
use crate::users::{NewUser, User, UserAuthRecord, UserRole, UserStore};

use super::database::Database;
use super::time::{column_datetime, to_db_string};

const USER_COLUMNS: &str = "id, email, name, role, created_at";

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(3)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        role: UserRole::parse(&role).unwrap_or(UserRole::User),
        created_at: column_datetime(row, 4)?,
    })
}

#[async_trait]
impl UserStore for Database {
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError> {
        let mut conn = self.connection.lock().await;
        let tx = conn.transaction()?;
        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        let role = if existing == 0 {
            UserRole::Admin
        } else {
            UserRole::User
        };
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: new_user.email,
            name: new_user.name,
            role,
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO users (id, email, name, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                &user.id,
                &user.email,
                &user.name,
                &new_user.password_hash,
                role.as_str(),
                to_db_string(&user.created_at),
            ],
        )
        .map_err(|e| match e.sqlite_error_code() {
            Some(rusqlite::ErrorCode::ConstraintViolation) => {
                AppError::Conflict("Email already registered".into())
            }
            _ => AppError::Db(e),
        })?;
        tx.commit()?;
        if role == UserRole::Admin {
            tracing::info!(user_id = %user.id, "first account created, granted admin role");
        }
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError> {
        let conn = self.connection.lock().await;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    async fn find_auth_by_email(&self, email: &str) -> Result<Option<UserAuthRecord>, AppError> {
        let conn = self.connection.lock().await;
        let record = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1"),
                [email],
                |row| {
                    Ok(UserAuthRecord {
                        user: row_to_user(row)?,
                        password_hash: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    async fn email_exists(&self, email: &str) -> Result<bool, AppError> {
        let conn = self.connection.lock().await;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM users WHERE email = ?1", [email], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    async fn list_users(&self) -> Result<Vec<User>, AppError> {
        let conn = self.connection.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    async fn set_role(&self, id: &str, role: UserRole) -> Result<Option<User>, AppError> {
        let conn = self.connection.lock().await;
        let changed = conn.execute(
            "UPDATE users SET role = ?1 WHERE id = ?2",
            rusqlite::params![role.as_str(), id],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                [id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }
}
