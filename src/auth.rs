use crate::db::{format_ts, parse_uuid, DbConnection};
use crate::error::{AppError, Result};
use crate::state::AppState;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use bcrypt::{hash, verify};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

/// Salted one-way hashing shared by account and file passwords.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: &str) -> Result<String> {
        let password = password.to_owned();
        let cost = self.cost;
        let hashed = tokio::task::spawn_blocking(move || hash(password, cost)).await??;
        Ok(hashed)
    }

    /// Returns false on mismatch. A malformed stored hash is logged and also
    /// counts as a mismatch.
    pub async fn verify(&self, password: &str, password_hash: &str) -> bool {
        let password = password.to_owned();
        let password_hash = password_hash.to_owned();
        match tokio::task::spawn_blocking(move || verify(password, &password_hash)).await {
            Ok(Ok(matches)) => matches,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "stored password hash is malformed");
                false
            }
            Err(e) => {
                tracing::error!(error = %e, "password verification task failed");
                false
            }
        }
    }
}

/// 32 alphanumeric characters from the thread-local CSPRNG.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub async fn create_auth_token(
    conn: &DbConnection,
    user_id: &Uuid,
    now: DateTime<Utc>,
    ttl: Duration,
) -> Result<String> {
    let token = generate_token();

    conn.lock().await.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        params![
            token,
            user_id.to_string(),
            format_ts(&now),
            format_ts(&(now + ttl))
        ],
    )?;

    Ok(token)
}

/// Resolve a bearer token to its user, ignoring expired sessions.
pub async fn verify_auth_token(
    conn: &DbConnection,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<Uuid>> {
    let user_id = conn
        .lock()
        .await
        .query_row(
            "SELECT user_id FROM auth_tokens WHERE token = ? AND expires_at > ?",
            params![token, format_ts(&now)],
            |row| {
                let user_id: String = row.get(0)?;
                parse_uuid(0, &user_id)
            },
        )
        .optional()?;

    Ok(user_id)
}

pub async fn purge_expired_tokens(conn: &DbConnection, now: DateTime<Utc>) -> Result<usize> {
    let removed = conn.lock().await.execute(
        "DELETE FROM auth_tokens WHERE expires_at <= ?",
        [format_ts(&now)],
    )?;
    Ok(removed)
}

/// Extractor for handlers that require a logged-in caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Unauthorized("Missing token".to_string()))?;

        match verify_auth_token(&state.db, token, state.clock.now()).await? {
            Some(user_id) => Ok(AuthUser(user_id)),
            None => Err(AppError::Unauthorized("Invalid token".to_string())),
        }
    }
}
