use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result as AppResult};
use crate::server::AppState;
use crate::server::util::{clear_session_cookie, is_secure, session_token, set_session_cookie};
use crate::users::{NewUser, SignupPayload, User, hash_password, normalize_email, verify_password};

#[derive(Debug, Deserialize)]
pub struct LoginPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: User,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

pub async fn signup(
    State(app): State<Arc<AppState>>,
    Json(payload): Json<SignupPayload>,
) -> AppResult<(StatusCode, Json<User>)> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest("Email and password are required".into()));
    }
    if app.users.email_exists(&email).await? {
        return Err(AppError::Conflict("Email already registered".into()));
    }
    let name = payload
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let user = app
        .users
        .create_user(NewUser {
            email,
            name,
            password_hash: hash_password(&payload.password)?,
        })
        .await?;
    tracing::info!(user_id = %user.id, role = user.role.as_str(), "user signed up");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<LoginPayload>,
) -> AppResult<Response> {
    let email = normalize_email(&payload.email);
    let invalid = || AppError::Unauthorized("Invalid email or password".into());
    let Some(record) = app.users.find_auth_by_email(&email).await? else {
        tracing::info!("login failed: unknown email");
        return Err(invalid());
    };
    if !verify_password(&payload.password, &record.password_hash) {
        tracing::info!(user_id = %record.user.id, "login failed: bad password");
        return Err(invalid());
    }
    let issued = app.sessions.issue(&record.user.id).await?;
    let secure = app.config.auth.cookie_secure || is_secure(&headers);
    tracing::info!(user_id = %record.user.id, secure_cookie = secure, "session issued");

    let cookie = set_session_cookie(&issued.token, issued.expires_at, secure);
    let body = LoginResponse {
        token: issued.token,
        expires_at: issued.expires_at.to_rfc3339(),
        user: record.user,
    };
    let mut resp = Json(body).into_response();
    resp.headers_mut().insert(header::SET_COOKIE, cookie);
    Ok(resp)
}

pub async fn logout(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Response> {
    if let Some(token) = session_token(&headers) {
        let revoked = app.sessions.revoke(&token).await?;
        tracing::info!(revoked, "logout");
    } else {
        tracing::info!("logout: no session");
    }
    let mut resp = Response::new(Body::empty());
    *resp.status_mut() = StatusCode::NO_CONTENT;
    resp.headers_mut()
        .insert(header::SET_COOKIE, clear_session_cookie());
    Ok(resp)
}

pub async fn get_session(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
) -> AppResult<Json<SessionInfo>> {
    let user = match session_token(&headers) {
        Some(token) => app.sessions.resolve(&token).await?,
        None => None,
    };
    tracing::debug!(valid = user.is_some(), "get_session check");
    Ok(Json(SessionInfo {
        valid: user.is_some(),
        user,
    }))
}
