use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

use crate::error::AppError;
use crate::users::{User, UserStore};

const SESSION_TOKEN_LEN: usize = 56;

#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert_session(&self, record: &SessionRecord) -> Result<(), AppError>;
    async fn get_session(&self, token_hash: &str) -> Result<Option<SessionRecord>, AppError>;
    async fn delete_session(&self, token_hash: &str) -> Result<bool, AppError>;
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

pub fn issue_session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

pub fn hash_session_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Issues and resolves session tokens. Only token hashes are persisted.
pub struct SessionManager {
    sessions: Arc<dyn SessionStore>,
    users: Arc<dyn UserStore>,
    ttl_hours: i64,
}

impl SessionManager {
    pub fn new(sessions: Arc<dyn SessionStore>, users: Arc<dyn UserStore>, ttl_hours: i64) -> Self {
        Self {
            sessions,
            users,
            ttl_hours,
        }
    }

    pub async fn issue(&self, user_id: &str) -> Result<IssuedSession, AppError> {
        let token = issue_session_token();
        let now = Utc::now();
        let expires_at = Duration::try_hours(self.ttl_hours)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                AppError::Internal(format!("session ttl of {}h is out of range", self.ttl_hours))
            })?;
        let record = SessionRecord {
            token_hash: hash_session_token(&token),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at,
        };
        self.sessions.insert_session(&record).await?;
        let purged = self.sessions.delete_expired_sessions(now).await?;
        if purged > 0 {
            tracing::debug!(purged, "expired sessions removed");
        }
        Ok(IssuedSession {
            token,
            expires_at: record.expires_at,
        })
    }

    /// The user behind a live token, or `None` for unknown or expired tokens.
    pub async fn resolve(&self, token: &str) -> Result<Option<User>, AppError> {
        let hash = hash_session_token(token);
        let Some(record) = self.sessions.get_session(&hash).await? else {
            return Ok(None);
        };
        if record.expires_at <= Utc::now() {
            self.sessions.delete_session(&hash).await?;
            return Ok(None);
        }
        self.users.get_user(&record.user_id).await
    }

    pub async fn revoke(&self, token: &str) -> Result<bool, AppError> {
        self.sessions.delete_session(&hash_session_token(token)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::users::NewUser;

    #[test]
    fn tokens_are_random_and_hash_is_stable() {
        let a = issue_session_token();
        let b = issue_session_token();
        assert_eq!(a.len(), SESSION_TOKEN_LEN);
        assert_ne!(a, b);
        assert_eq!(hash_session_token(&a), hash_session_token(&a));
        assert_eq!(hash_session_token(&a).len(), 64);
    }

    #[tokio::test]
    async fn issue_resolve_revoke() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let user = db
            .create_user(NewUser {
                email: "a@example.com".into(),
                name: None,
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        let mgr = SessionManager::new(db.clone(), db.clone(), 1);

        let issued = mgr.issue(&user.id).await.unwrap();
        let resolved = mgr.resolve(&issued.token).await.unwrap().unwrap();
        assert_eq!(resolved.id, user.id);
        assert!(mgr.resolve("bogus").await.unwrap().is_none());

        assert!(mgr.revoke(&issued.token).await.unwrap());
        assert!(mgr.resolve(&issued.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_ttl_fails_without_panicking() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let user = db
            .create_user(NewUser {
                email: "c@example.com".into(),
                name: None,
                password_hash: "x".into(),
            })
            .await
            .unwrap();

        for ttl_hours in [100_000_000_000, i64::MAX] {
            let mgr = SessionManager::new(db.clone(), db.clone(), ttl_hours);
            let err = mgr.issue(&user.id).await.unwrap_err();
            assert!(matches!(err, AppError::Internal(_)));
        }
    }

    #[tokio::test]
    async fn expired_session_does_not_resolve() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let user = db
            .create_user(NewUser {
                email: "b@example.com".into(),
                name: None,
                password_hash: "x".into(),
            })
            .await
            .unwrap();
        let token = issue_session_token();
        let past = Utc::now() - Duration::hours(2);
        db.insert_session(&SessionRecord {
            token_hash: hash_session_token(&token),
            user_id: user.id.clone(),
            created_at: past,
            expires_at: past + Duration::hours(1),
        })
        .await
        .unwrap();

        let mgr = SessionManager::new(db.clone(), db.clone(), 1);
        assert!(mgr.resolve(&token).await.unwrap().is_none());
    }
}
