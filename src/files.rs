//! File lifecycle: upload, token-gated access, owner mutations and history.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::auth::{generate_token, PasswordHasher};
use crate::error::{AppError, Result};
use crate::guard::UploadGuard;
use crate::models::{FileRecord, TagCount};
use crate::records::FileStore;
use crate::storage::{BlobStorage, StoredBlob};

pub const DEFAULT_EXPIRATION_DAYS: i64 = 7;
pub const MIN_EXPIRATION_DAYS: i64 = 1;
pub const MAX_EXPIRATION_DAYS: i64 = 7;
pub const MAX_TAGS: usize = 10;
pub const MAX_TAG_LEN: usize = 30;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub password: Option<String>,
    pub expiration_days: i64,
    pub tags: Vec<String>,
    /// `None` for anonymous uploads.
    pub owner: Option<Uuid>,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            password: None,
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            tags: Vec::new(),
            owner: None,
        }
    }
}

/// Bytes already on disk, waiting for the record that will own them.
#[derive(Debug)]
pub struct StagedUpload {
    blob: StoredBlob,
    filename: String,
    mime_type: String,
}

impl StagedUpload {
    pub fn size_bytes(&self) -> u64 {
        self.blob.size_bytes
    }
}

/// Public view of a shared file. Carries no storage location or hash.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub expiration_date: DateTime<Utc>,
    pub has_password: bool,
    pub is_expired: bool,
    pub tags: Vec<String>,
}

#[derive(Debug)]
pub struct Download {
    pub record: FileRecord,
    pub file: tokio::fs::File,
}

pub fn validate_expiration_days(days: i64) -> Result<()> {
    if !(MIN_EXPIRATION_DAYS..=MAX_EXPIRATION_DAYS).contains(&days) {
        return Err(AppError::Validation(format!(
            "expirationDays must be between {MIN_EXPIRATION_DAYS} and {MAX_EXPIRATION_DAYS}"
        )));
    }
    Ok(())
}

pub fn validate_tags(tags: &[String]) -> Result<()> {
    if tags.len() > MAX_TAGS {
        return Err(AppError::Validation(format!(
            "Max {MAX_TAGS} tags per file"
        )));
    }
    if tags.iter().any(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(AppError::Validation(format!(
            "Each tag max {MAX_TAG_LEN} characters"
        )));
    }
    Ok(())
}

/// Count exact tag occurrences after trimming, most frequent first.
/// Ties are broken by label so the output is stable.
pub fn count_tags<I>(tag_lists: I) -> Vec<TagCount>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut counts: HashMap<String, u64> = HashMap::new();
    for tag in tag_lists.into_iter().flatten() {
        let tag = tag.trim();
        if !tag.is_empty() {
            *counts.entry(tag.to_string()).or_default() += 1;
        }
    }

    let mut result: Vec<TagCount> = counts
        .into_iter()
        .map(|(label, count)| TagCount { label, count })
        .collect();
    result.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    result
}

#[derive(Clone)]
pub struct FileService {
    records: FileStore,
    storage: BlobStorage,
    guard: UploadGuard,
    hasher: PasswordHasher,
}

impl FileService {
    pub fn new(
        records: FileStore,
        storage: BlobStorage,
        guard: UploadGuard,
        hasher: PasswordHasher,
    ) -> Self {
        Self {
            records,
            storage,
            guard,
            hasher,
        }
    }

    pub fn records(&self) -> &FileStore {
        &self.records
    }

    pub fn storage(&self) -> &BlobStorage {
        &self.storage
    }

    /// Check the name and MIME type, then stream the bytes to storage under
    /// the size ceiling.
    pub async fn stage<R>(
        &self,
        source: R,
        filename: &str,
        declared_mime: Option<&str>,
    ) -> Result<StagedUpload>
    where
        R: AsyncRead,
    {
        let mime_type = declared_mime
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                mime_guess::from_path(filename)
                    .first_or_octet_stream()
                    .to_string()
            });

        self.guard.check_name(filename, &mime_type)?;
        let blob = self.storage.write(source, self.guard.max_bytes()).await?;

        Ok(StagedUpload {
            blob,
            filename: filename.to_string(),
            mime_type,
        })
    }

    /// Drop a staged payload that will never be committed.
    pub async fn discard(&self, staged: StagedUpload) {
        if let Err(e) = self.storage.delete(&staged.blob.name).await {
            tracing::warn!(storage_name = %staged.blob.name, error = %e, "failed to discard staged upload");
        }
    }

    /// Turn a staged payload into a persisted record. On any failure the
    /// payload is removed.
    pub async fn commit(
        &self,
        staged: StagedUpload,
        options: UploadOptions,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        if let Err(e) =
            self.guard
                .validate(&staged.filename, &staged.mime_type, staged.blob.size_bytes)
        {
            self.discard(staged).await;
            return Err(e);
        }

        match self.persist(&staged, options, now).await {
            Ok(record) => {
                tracing::info!(
                    file_id = %record.id,
                    size_bytes = record.size_bytes,
                    anonymous = record.owner_id.is_none(),
                    "file uploaded"
                );
                Ok(record)
            }
            Err(e) => {
                self.discard(staged).await;
                Err(e)
            }
        }
    }

    async fn persist(
        &self,
        staged: &StagedUpload,
        options: UploadOptions,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        let password_hash = match options.password.as_deref() {
            Some(password) => Some(self.hasher.hash(password).await?),
            None => None,
        };

        let record = FileRecord {
            id: Uuid::new_v4(),
            filename: staged.filename.clone(),
            storage_name: staged.blob.name.clone(),
            size_bytes: staged.blob.size_bytes,
            mime_type: staged.mime_type.clone(),
            token: generate_token(),
            password_hash,
            tags: options.tags,
            uploaded_at: now,
            expires_at: now + Duration::days(options.expiration_days),
            owner_id: options.owner,
            download_count: 0,
        };

        self.records.insert(&record).await?;
        Ok(record)
    }

    pub async fn upload<R>(
        &self,
        source: R,
        filename: &str,
        declared_mime: Option<&str>,
        options: UploadOptions,
        now: DateTime<Utc>,
    ) -> Result<FileRecord>
    where
        R: AsyncRead,
    {
        let staged = self.stage(source, filename, declared_mime).await?;
        self.commit(staged, options, now).await
    }

    async fn resolve(&self, token: &str) -> Result<FileRecord> {
        self.records
            .find_by_token(token)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found".to_string()))
    }

    /// Public metadata. Never requires the file password. An expired record
    /// that has not been reaped yet reports `is_expired`.
    pub async fn metadata(&self, token: &str, now: DateTime<Utc>) -> Result<FileMetadata> {
        let record = self.resolve(token).await?;
        Ok(FileMetadata {
            has_password: record.has_password(),
            is_expired: !record.is_active(now),
            name: record.filename,
            size: record.size_bytes,
            mime_type: record.mime_type,
            expiration_date: record.expires_at,
            tags: record.tags,
        })
    }

    pub async fn check_password(&self, record: &FileRecord, password: Option<&str>) -> Result<()> {
        let Some(hash) = record.password_hash.as_deref() else {
            return Ok(());
        };
        let verified = match password {
            Some(password) => self.hasher.verify(password, hash).await,
            None => false,
        };
        if !verified {
            return Err(AppError::Forbidden("Invalid password".to_string()));
        }
        Ok(())
    }

    /// Gate a download: token, expiry, then password. The counter is bumped
    /// only once the payload is open.
    pub async fn open_download(
        &self,
        token: &str,
        password: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Download> {
        let record = self.resolve(token).await?;
        if !record.is_active(now) {
            return Err(AppError::Forbidden("File expired".to_string()));
        }
        self.check_password(&record, password).await?;

        let file = self.storage.open(&record.storage_name).await?;
        self.records.increment_download_count(record.id).await?;
        tracing::debug!(file_id = %record.id, "download started");

        Ok(Download { record, file })
    }

    /// Non-owners get the same answer as for a missing record.
    async fn owned(&self, id: Uuid, owner: Uuid) -> Result<FileRecord> {
        self.records
            .find_owned(id, owner)
            .await?
            .ok_or_else(|| AppError::NotFound("File not found or not owner".to_string()))
    }

    fn gone() -> AppError {
        AppError::NotFound("File not found or not owner".to_string())
    }

    pub async fn delete(&self, id: Uuid, owner: Uuid) -> Result<()> {
        let record = self.owned(id, owner).await?;

        if let Err(e) = self.storage.delete(&record.storage_name).await {
            tracing::warn!(file_id = %record.id, error = %e, "could not delete payload");
        }
        self.records.remove(record.id).await?;
        tracing::info!(file_id = %record.id, "file deleted by owner");
        Ok(())
    }

    pub async fn update_tags(&self, id: Uuid, owner: Uuid, tags: Vec<String>) -> Result<FileRecord> {
        let mut record = self.owned(id, owner).await?;
        if !self.records.update_tags(record.id, &tags).await? {
            return Err(Self::gone());
        }
        record.tags = tags;
        Ok(record)
    }

    pub async fn update_password(
        &self,
        id: Uuid,
        owner: Uuid,
        password: &str,
    ) -> Result<FileRecord> {
        let mut record = self.owned(id, owner).await?;
        let hash = self.hasher.hash(password).await?;
        if !self.records.update_password(record.id, Some(&hash)).await? {
            return Err(Self::gone());
        }
        record.password_hash = Some(hash);
        Ok(record)
    }

    /// The new expiration counts from `now`, not from the upload time.
    pub async fn update_expiration(
        &self,
        id: Uuid,
        owner: Uuid,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<FileRecord> {
        let mut record = self.owned(id, owner).await?;
        let expires_at = now + Duration::days(days);
        if !self.records.update_expiration(record.id, expires_at).await? {
            return Err(Self::gone());
        }
        record.expires_at = expires_at;
        Ok(record)
    }

    pub async fn history(
        &self,
        owner: Uuid,
        search: Option<&str>,
        tag: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>> {
        self.records
            .find_active_by_owner(owner, search, tag, now)
            .await
    }

    /// Tag frequencies over all of the owner's files, expired ones included.
    pub async fn tag_counts(&self, owner: Uuid) -> Result<Vec<TagCount>> {
        Ok(count_tags(self.records.tags_by_owner(owner).await?))
    }
}
