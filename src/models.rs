use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metadata for one uploaded payload.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: Uuid,
    /// Client-supplied name, display only.
    pub filename: String,
    /// Location of the bytes relative to the storage root. Never sent to clients.
    pub storage_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    /// Public share token, distinct from `id`.
    pub token: String,
    pub password_hash: Option<String>,
    pub tags: Vec<String>,
    pub uploaded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub owner_id: Option<Uuid>,
    pub download_count: i64,
}

impl FileRecord {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// A record is active strictly before its expiration instant.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub label: String,
    pub count: u64,
}
