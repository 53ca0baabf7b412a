use crate::auth::{create_auth_token, AuthUser};
use crate::error::{AppError, Result};
use crate::files::{validate_expiration_days, validate_tags, StagedUpload, UploadOptions};
use crate::files::{FileMetadata, DEFAULT_EXPIRATION_DAYS};
use crate::models::{FileRecord, TagCount, User};
use crate::state::AppState;
use crate::validation::ValidatedJson;
use axum::{
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::io::{ReaderStream, StreamReader};
use uuid::Uuid;
use validator::Validate;

#[derive(Deserialize, Validate)]
pub struct RegisterUser {
    #[validate(email(message = "Invalid email"))]
    email: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    password: String,
}

#[derive(Deserialize, Validate)]
pub struct LoginUser {
    #[validate(length(min = 1, message = "Email is required"))]
    email: String,
    password: String,
}

#[derive(Serialize)]
pub struct UserSummary {
    id: Uuid,
    email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct AuthToken {
    token: String,
    user: UserSummary,
}

#[derive(Deserialize, Default)]
pub struct DownloadRequest {
    password: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    search: Option<String>,
    tag: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct UpdateTags {
    #[validate(length(max = 10, message = "Max 10 tags per file"))]
    tags: Vec<String>,
}

#[derive(Deserialize, Validate)]
pub struct UpdatePassword {
    #[validate(length(min = 6, max = 255, message = "Password must be 6 to 255 characters"))]
    password: String,
}

#[derive(Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateExpiration {
    #[validate(range(min = 1, max = 7, message = "expirationDays must be between 1 and 7"))]
    expiration_days: i64,
}

#[derive(Deserialize, Validate)]
pub struct UpdateProfile {
    #[validate(email(message = "Invalid email"))]
    email: Option<String>,
}

/// Multipart option fields, collected before they are validated.
#[derive(Default, Validate)]
struct UploadForm {
    #[validate(length(min = 6, max = 255, message = "Password must be 6 to 255 characters"))]
    password: Option<String>,
    expiration_days: Option<String>,
    tags: Vec<String>,
}

impl UploadForm {
    fn into_options(self, owner: Option<Uuid>) -> Result<UploadOptions> {
        self.validate()?;

        let expiration_days = match self.expiration_days.as_deref().map(str::trim) {
            None | Some("") => DEFAULT_EXPIRATION_DAYS,
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                AppError::Validation("expirationDays must be an integer".to_string())
            })?,
        };
        validate_expiration_days(expiration_days)?;
        validate_tags(&self.tags)?;

        Ok(UploadOptions {
            password: self.password,
            expiration_days,
            tags: self.tags,
            owner,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResponse {
    id: Uuid,
    token: String,
    filename: String,
    size: u64,
    mime_type: String,
    uploaded_at: DateTime<Utc>,
    expiration_date: DateTime<Utc>,
    has_password: bool,
    tags: Vec<String>,
    download_count: i64,
    url: String,
}

impl FileResponse {
    fn new(record: FileRecord, state: &AppState) -> Self {
        Self {
            url: state.share_url(&record.token),
            has_password: record.has_password(),
            id: record.id,
            token: record.token,
            filename: record.filename,
            size: record.size_bytes,
            mime_type: record.mime_type,
            uploaded_at: record.uploaded_at,
            expiration_date: record.expires_at,
            tags: record.tags,
            download_count: record.download_count,
        }
    }
}

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct Message {
    message: &'static str,
}

/// Path ids that do not parse can never match a record.
fn parse_file_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| AppError::NotFound("File not found or not owner".to_string()))
}

/// Comma separated lists are accepted as well as repeated fields.
fn split_tags(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Build a Content-Disposition value that cannot inject headers and keeps
/// non-ASCII names intact through RFC 5987 encoding.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_control() || !c.is_ascii() => '_',
            c => c,
        })
        .collect();

    if fallback == filename {
        format!("attachment; filename=\"{}\"", filename)
    } else {
        format!(
            "attachment; filename=\"{}\"; filename*=UTF-8''{}",
            fallback,
            urlencoding::encode(filename)
        )
    }
}

pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        timestamp: state.clock.now(),
    })
}

pub async fn register_user(
    State(state): State<AppState>,
    ValidatedJson(user_data): ValidatedJson<RegisterUser>,
) -> Result<(StatusCode, Json<UserSummary>)> {
    if state.users.find_by_email(&user_data.email).await?.is_some() {
        return Err(AppError::Validation("Email already exists".to_string()));
    }

    let password_hash = state.hasher.hash(&user_data.password).await?;
    let user = state
        .users
        .create(&user_data.email, &password_hash, state.clock.now())
        .await?;
    tracing::info!(user_id = %user.id, "user registered");

    Ok((StatusCode::CREATED, Json(UserSummary::from(&user))))
}

pub async fn login_user(
    State(state): State<AppState>,
    ValidatedJson(login_data): ValidatedJson<LoginUser>,
) -> Result<Json<AuthToken>> {
    let invalid = || AppError::Unauthorized("Invalid credentials".to_string());

    let user = state
        .users
        .find_by_email(&login_data.email)
        .await?
        .ok_or_else(invalid)?;

    if !state
        .hasher
        .verify(&login_data.password, &user.password_hash)
        .await
    {
        return Err(invalid());
    }

    let token = create_auth_token(&state.db, &user.id, state.clock.now(), state.session_ttl).await?;
    Ok(Json(AuthToken {
        token,
        user: UserSummary::from(&user),
    }))
}

async fn read_upload_fields(
    state: &AppState,
    multipart: &mut Multipart,
    staged: &mut Option<StagedUpload>,
    form: &mut UploadForm,
) -> Result<()> {
    let malformed = |e: axum::extract::multipart::MultipartError| {
        AppError::Validation(format!("Malformed multipart body: {}", e))
    };

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if staged.is_some() {
                    return Err(AppError::Validation("Only one file per upload".to_string()));
                }
                let filename = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.trim().is_empty())
                    .ok_or_else(|| AppError::Validation("Missing file name".to_string()))?;
                let content_type = field.content_type().map(str::to_string);

                let reader = StreamReader::new(
                    field.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
                );
                let upload = state
                    .files
                    .stage(reader, &filename, content_type.as_deref())
                    .await?;
                tracing::debug!(size_bytes = upload.size_bytes(), "upload staged");
                *staged = Some(upload);
            }
            "password" => {
                let value = field.text().await.map_err(malformed)?;
                form.password = Some(value).filter(|p| !p.is_empty());
            }
            "expirationDays" => {
                form.expiration_days = Some(field.text().await.map_err(malformed)?);
            }
            "tags" | "tags[]" => {
                let value = field.text().await.map_err(malformed)?;
                form.tags.extend(split_tags(&value));
            }
            other => {
                tracing::debug!(field = other, "ignoring unknown upload field");
            }
        }
    }
    Ok(())
}

async fn receive_upload(
    state: &AppState,
    owner: Option<Uuid>,
    mut multipart: Multipart,
) -> Result<FileRecord> {
    let mut staged = None;
    let mut form = UploadForm::default();
    let read = read_upload_fields(state, &mut multipart, &mut staged, &mut form).await;
    let options = read.and_then(|()| form.into_options(owner));

    match (staged, options) {
        (Some(staged), Ok(options)) => state.files.commit(staged, options, state.clock.now()).await,
        (Some(staged), Err(e)) => {
            state.files.discard(staged).await;
            Err(e)
        }
        (None, Err(e)) => Err(e),
        (None, Ok(_)) => Err(AppError::Validation("No file uploaded".to_string())),
    }
}

pub async fn upload_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>)> {
    let record = receive_upload(&state, Some(user_id), multipart).await?;
    Ok((StatusCode::CREATED, Json(FileResponse::new(record, &state))))
}

pub async fn upload_anonymous(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<FileResponse>)> {
    let record = receive_upload(&state, None, multipart).await?;
    Ok((StatusCode::CREATED, Json(FileResponse::new(record, &state))))
}

pub async fn get_tags(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<TagCount>>> {
    Ok(Json(state.files.tag_counts(user_id).await?))
}

pub async fn get_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<FileResponse>>> {
    let search = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let tag = query.tag.as_deref().map(str::trim).filter(|t| !t.is_empty());

    let records = state
        .files
        .history(user_id, search, tag, state.clock.now())
        .await?;
    Ok(Json(
        records
            .into_iter()
            .map(|r| FileResponse::new(r, &state))
            .collect(),
    ))
}

pub async fn get_metadata(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<FileMetadata>> {
    Ok(Json(state.files.metadata(&token, state.clock.now()).await?))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Option<Json<DownloadRequest>>,
) -> Result<Response> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let download = state
        .files
        .open_download(&token, request.password.as_deref(), state.clock.now())
        .await?;
    let record = download.record;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(record.size_bytes));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&record.filename))
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    let body = Body::from_stream(ReaderStream::new(download.file));
    Ok((headers, body).into_response())
}

pub async fn delete_file(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Message>> {
    state.files.delete(parse_file_id(&id)?, user_id).await?;
    Ok(Json(Message {
        message: "File deleted",
    }))
}

/// `DELETE` on a path segment that is a static route, never a file id.
pub async fn delete_unknown_file(AuthUser(_): AuthUser) -> Result<Json<Message>> {
    Err(AppError::NotFound("File not found or not owner".to_string()))
}

pub async fn update_tags(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateTags>,
) -> Result<Json<FileResponse>> {
    let id = parse_file_id(&id)?;
    validate_tags(&body.tags)?;
    let record = state.files.update_tags(id, user_id, body.tags).await?;
    Ok(Json(FileResponse::new(record, &state)))
}

pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdatePassword>,
) -> Result<Json<FileResponse>> {
    let id = parse_file_id(&id)?;
    let record = state
        .files
        .update_password(id, user_id, &body.password)
        .await?;
    Ok(Json(FileResponse::new(record, &state)))
}

pub async fn update_expiration(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    ValidatedJson(body): ValidatedJson<UpdateExpiration>,
) -> Result<Json<FileResponse>> {
    let id = parse_file_id(&id)?;
    let record = state
        .files
        .update_expiration(id, user_id, body.expiration_days, state.clock.now())
        .await?;
    Ok(Json(FileResponse::new(record, &state)))
}

pub async fn get_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<User>> {
    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ValidatedJson(body): ValidatedJson<UpdateProfile>,
) -> Result<Json<User>> {
    let user = match body.email.as_deref() {
        Some(email) => {
            state
                .users
                .update_email(user_id, email, state.clock.now())
                .await?
        }
        None => state
            .users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?,
    };
    Ok(Json(user))
}

pub async fn delete_account(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<StatusCode> {
    state.users.delete(user_id).await?;
    tracing::info!(user_id = %user_id, "account deleted");
    Ok(StatusCode::NO_CONTENT)
}
