use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(UserRole::User),
            "admin" => Some(UserRole::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: UserRole,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// Login lookup row; the only place the password hash leaves storage.
#[derive(Debug, Clone)]
pub struct UserAuthRecord {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignupPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Inserts the user. The first account ever created is promoted to admin.
    async fn create_user(&self, new_user: NewUser) -> Result<User, AppError>;
    async fn get_user(&self, id: &str) -> Result<Option<User>, AppError>;
    async fn find_auth_by_email(&self, email: &str) -> Result<Option<UserAuthRecord>, AppError>;
    async fn email_exists(&self, email: &str) -> Result<bool, AppError>;
    async fn list_users(&self) -> Result<Vec<User>, AppError>;
    async fn set_role(&self, id: &str, role: UserRole) -> Result<Option<User>, AppError>;
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("password hash failed: {e}")))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
