use crate::db::{format_ts, parse_ts, parse_uuid, DbConnection};
use crate::error::{AppError, Result};
use crate::models::User;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, password_hash, created_at, updated_at";

fn map_user(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        email: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
        updated_at: parse_ts(4, &row.get::<_, String>(4)?)?,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

#[derive(Clone)]
pub struct UserStore {
    conn: DbConnection,
}

impl UserStore {
    pub fn new(conn: DbConnection) -> Self {
        Self { conn }
    }

    /// Insert a new account. A taken email is a validation failure.
    pub async fn create(
        &self,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: now,
        };

        let result = self.conn.lock().await.execute(
            "INSERT INTO users (id, email, password_hash, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![
                user.id.to_string(),
                user.email,
                user.password_hash,
                format_ts(&now),
                format_ts(&now)
            ],
        );

        match result {
            Ok(_) => Ok(user),
            Err(e) if is_unique_violation(&e) => {
                Err(AppError::Validation("Email already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"),
                [email],
                map_user,
            )
            .optional()?;
        Ok(user)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"),
                [id.to_string()],
                map_user,
            )
            .optional()?;
        Ok(user)
    }

    /// Change the account email. Another account holding it is a conflict.
    pub async fn update_email(&self, id: Uuid, email: &str, now: DateTime<Utc>) -> Result<User> {
        if let Some(existing) = self.find_by_email(email).await? {
            if existing.id != id {
                return Err(AppError::Conflict("Email already taken".to_string()));
            }
        }

        let result = self.conn.lock().await.execute(
            "UPDATE users SET email = ?, updated_at = ? WHERE id = ?",
            params![email, format_ts(&now), id.to_string()],
        );

        match result {
            Ok(0) => return Err(AppError::NotFound("User not found".to_string())),
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(AppError::Conflict("Email already taken".to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))
    }

    /// Remove an account. Its sessions go with it; its files become anonymous.
    pub async fn delete(&self, id: Uuid) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .await
            .execute("DELETE FROM users WHERE id = ?", [id.to_string()])?;
        Ok(removed > 0)
    }
}
