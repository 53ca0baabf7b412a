//! Periodic removal of expired files.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::auth::purge_expired_tokens;
use crate::clock::Clock;
use crate::db::DbConnection;
use crate::error::Result;
use crate::models::FileRecord;
use crate::records::FileStore;
use crate::storage::BlobStorage;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    pub found: usize,
    pub removed: usize,
    /// Extended or deleted by the owner after the snapshot was taken.
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct Reaper {
    db: DbConnection,
    records: FileStore,
    storage: BlobStorage,
    clock: Arc<dyn Clock>,
}

impl Reaper {
    pub fn new(
        db: DbConnection,
        records: FileStore,
        storage: BlobStorage,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            records,
            storage,
            clock,
        }
    }

    /// One sweep over the records that were expired when it started.
    ///
    /// A record is removed only after its payload is gone. Failures are logged
    /// and leave the record in place for the next sweep.
    pub async fn run_cycle(&self) -> Result<ReapReport> {
        let now = self.clock.now();
        let expired = self.records.find_expired(now).await?;

        let mut report = ReapReport {
            found: expired.len(),
            ..Default::default()
        };
        if expired.is_empty() {
            tracing::debug!("no expired files");
        } else {
            tracing::info!(count = expired.len(), "reaping expired files");
        }

        for record in &expired {
            match self.reap(record, now).await {
                Ok(true) => report.removed += 1,
                Ok(false) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(file_id = %record.id, error = %e, "failed to reap expired file");
                }
            }
        }

        match purge_expired_tokens(&self.db, now).await {
            Ok(0) => {}
            Ok(count) => tracing::info!(deleted_count = count, "purged expired sessions"),
            Err(e) => tracing::warn!(error = %e, "failed to purge expired sessions"),
        }

        if report.found > 0 {
            tracing::info!(
                removed = report.removed,
                skipped = report.skipped,
                failed = report.failed,
                "expiration sweep completed"
            );
        }
        Ok(report)
    }

    /// Returns false when the record no longer needs reaping.
    async fn reap(&self, record: &FileRecord, as_of: DateTime<Utc>) -> Result<bool> {
        match self.records.find_by_id(record.id).await? {
            Some(current) if current.expires_at < as_of => {}
            _ => {
                tracing::debug!(file_id = %record.id, "no longer expired, skipping");
                return Ok(false);
            }
        }

        if self.storage.delete(&record.storage_name).await? {
            tracing::debug!(file_id = %record.id, "payload deleted");
        }
        if !self.records.remove_expired(record.id, as_of).await? {
            tracing::warn!(file_id = %record.id, "expiration changed while reaping");
            return Ok(false);
        }
        Ok(true)
    }

    /// Run `run_cycle` forever on a fixed interval.
    pub fn spawn(self, interval: Duration, run_immediately: bool) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            if !run_immediately {
                ticker.tick().await;
            }

            loop {
                ticker.tick().await;
                if let Err(e) = self.run_cycle().await {
                    tracing::error!(error = %e, "expiration sweep failed");
                }
            }
        })
    }
}
