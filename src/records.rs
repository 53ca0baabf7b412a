//! Persistence for file metadata.

use crate::db::{format_ts, parse_ts, parse_uuid, DbConnection};
use crate::error::Result;
use crate::models::FileRecord;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, filename, storage_name, size_bytes, mime_type, token, \
     password_hash, tags, uploaded_at, expires_at, owner_id, download_count";

fn parse_tags(idx: usize, value: &str) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn encode_tags(tags: &[String]) -> Result<String> {
    serde_json::to_string(tags)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)).into())
}

fn map_file(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let owner_id: Option<String> = row.get(10)?;
    Ok(FileRecord {
        id: parse_uuid(0, &row.get::<_, String>(0)?)?,
        filename: row.get(1)?,
        storage_name: row.get(2)?,
        size_bytes: row.get::<_, i64>(3)?.max(0) as u64,
        mime_type: row.get(4)?,
        token: row.get(5)?,
        password_hash: row.get(6)?,
        tags: parse_tags(7, &row.get::<_, String>(7)?)?,
        uploaded_at: parse_ts(8, &row.get::<_, String>(8)?)?,
        expires_at: parse_ts(9, &row.get::<_, String>(9)?)?,
        owner_id: owner_id.map(|s| parse_uuid(10, &s)).transpose()?,
        download_count: row.get(11)?,
    })
}

#[derive(Clone)]
pub struct FileStore {
    conn: DbConnection,
}

impl FileStore {
    pub fn new(conn: DbConnection) -> Self {
        Self { conn }
    }

    /// Persist a new record. The unique index on `token` rejects duplicates.
    pub async fn insert(&self, record: &FileRecord) -> Result<()> {
        let tags = encode_tags(&record.tags)?;
        self.conn.lock().await.execute(
            &format!("INSERT INTO files ({FILE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                record.id.to_string(),
                record.filename,
                record.storage_name,
                record.size_bytes as i64,
                record.mime_type,
                record.token,
                record.password_hash,
                tags,
                format_ts(&record.uploaded_at),
                format_ts(&record.expires_at),
                record.owner_id.map(|id| id.to_string()),
                record.download_count,
            ],
        )?;
        Ok(())
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE token = ?"),
                [token],
                map_file,
            )
            .optional()?;
        Ok(record)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?"),
                [id.to_string()],
                map_file,
            )
            .optional()?;
        Ok(record)
    }

    /// Look up a record only if `owner` owns it.
    pub async fn find_owned(&self, id: Uuid, owner: Uuid) -> Result<Option<FileRecord>> {
        let record = self
            .conn
            .lock()
            .await
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ? AND owner_id = ?"),
                params![id.to_string(), owner.to_string()],
                map_file,
            )
            .optional()?;
        Ok(record)
    }

    /// Active records of `owner`, newest upload first.
    ///
    /// `search` matches the filename case-insensitively as a substring; `tag`
    /// must equal one element of the tag list exactly.
    pub async fn find_active_by_owner(
        &self,
        owner: Uuid,
        search: Option<&str>,
        tag: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>> {
        let records = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!(
                "SELECT {FILE_COLUMNS} FROM files
                 WHERE owner_id = ?1
                   AND expires_at > ?2
                   AND (?3 IS NULL OR EXISTS (
                        SELECT 1 FROM json_each(files.tags) WHERE json_each.value = ?3))
                 ORDER BY uploaded_at DESC, rowid DESC"
            ))?;
            let rows = stmt.query_map(
                params![owner.to_string(), format_ts(&now), tag],
                map_file,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let needle = search
            .map(|s| s.to_lowercase())
            .filter(|s| !s.is_empty());
        Ok(match needle {
            Some(needle) => records
                .into_iter()
                .filter(|r| r.filename.to_lowercase().contains(&needle))
                .collect(),
            None => records,
        })
    }

    /// Records whose expiration lies strictly before `as_of`.
    pub async fn find_expired(&self, as_of: DateTime<Utc>) -> Result<Vec<FileRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files WHERE expires_at < ? ORDER BY expires_at"
        ))?;
        let rows = stmt.query_map([format_ts(&as_of)], map_file)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Tag lists of every record `owner` holds, expired or not.
    pub async fn tags_by_owner(&self, owner: Uuid) -> Result<Vec<Vec<String>>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT tags FROM files WHERE owner_id = ?")?;
        let rows = stmt.query_map([owner.to_string()], |row| {
            parse_tags(0, &row.get::<_, String>(0)?)
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Single-statement increment; concurrent downloads never lose a count.
    pub async fn increment_download_count(&self, id: Uuid) -> Result<()> {
        self.conn.lock().await.execute(
            "UPDATE files SET download_count = download_count + 1 WHERE id = ?",
            [id.to_string()],
        )?;
        Ok(())
    }

    pub async fn update_tags(&self, id: Uuid, tags: &[String]) -> Result<bool> {
        let tags = encode_tags(tags)?;
        let updated = self.conn.lock().await.execute(
            "UPDATE files SET tags = ? WHERE id = ?",
            params![tags, id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub async fn update_password(&self, id: Uuid, password_hash: Option<&str>) -> Result<bool> {
        let updated = self.conn.lock().await.execute(
            "UPDATE files SET password_hash = ? WHERE id = ?",
            params![password_hash, id.to_string()],
        )?;
        Ok(updated > 0)
    }

    pub async fn update_expiration(&self, id: Uuid, expires_at: DateTime<Utc>) -> Result<bool> {
        let updated = self.conn.lock().await.execute(
            "UPDATE files SET expires_at = ? WHERE id = ?",
            params![format_ts(&expires_at), id.to_string()],
        )?;
        Ok(updated > 0)
    }

    /// Delete a record. Returns false if it was already gone.
    pub async fn remove(&self, id: Uuid) -> Result<bool> {
        let removed = self
            .conn
            .lock()
            .await
            .execute("DELETE FROM files WHERE id = ?", [id.to_string()])?;
        Ok(removed > 0)
    }

    /// Delete a record only if it is still expired as of `as_of`. An owner who
    /// extended the expiration in the meantime keeps the record.
    pub async fn remove_expired(&self, id: Uuid, as_of: DateTime<Utc>) -> Result<bool> {
        let removed = self.conn.lock().await.execute(
            "DELETE FROM files WHERE id = ? AND expires_at < ?",
            params![id.to_string(), format_ts(&as_of)],
        )?;
        Ok(removed > 0)
    }
}
