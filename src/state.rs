use std::sync::Arc;

use crate::auth::PasswordHasher;
use crate::clock::Clock;
use crate::config::Config;
use crate::db::DbConnection;
use crate::files::FileService;
use crate::guard::UploadGuard;
use crate::reaper::Reaper;
use crate::records::FileStore;
use crate::storage::BlobStorage;
use crate::users::UserStore;

/// Shared handles passed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub db: DbConnection,
    pub users: UserStore,
    pub files: FileService,
    pub hasher: PasswordHasher,
    pub clock: Arc<dyn Clock>,
    /// Base URL for share links, without trailing slash.
    pub public_url: String,
    pub session_ttl: chrono::Duration,
}

impl AppState {
    pub fn new(
        db: DbConnection,
        storage: BlobStorage,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        let hasher = PasswordHasher::new(config.auth.bcrypt_cost);
        let files = FileService::new(
            FileStore::new(db.clone()),
            storage,
            UploadGuard::new(config.storage.max_upload_bytes),
            hasher,
        );

        Self {
            users: UserStore::new(db.clone()),
            db,
            files,
            hasher,
            clock,
            public_url: config.server.public_url.trim_end_matches('/').to_string(),
            session_ttl: chrono::Duration::hours(config.auth.session_ttl_hours),
        }
    }

    /// A reaper sharing this state's database, storage and clock.
    pub fn reaper(&self) -> Reaper {
        Reaper::new(
            self.db.clone(),
            self.files.records().clone(),
            self.files.storage().clone(),
            self.clock.clone(),
        )
    }

    pub fn share_url(&self, token: &str) -> String {
        format!("{}/api/files/{}/download", self.public_url, token)
    }
}
