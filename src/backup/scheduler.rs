use std::path::PathBuf;
use std::time::Duration;

use derive_new::new;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::{BackupError, OpenFileSnafu, Uploader, BACKUP_KEY};
use crate::time;

/// Uploads the database file at `path` once per `interval`, until cancelled.
#[derive(Debug, new)]
pub struct BackupScheduler<U> {
    uploader: U,
    path: PathBuf,
    interval: Duration,
}

impl<U: Uploader> BackupScheduler<U> {
    /// Run until `cancel` fires.
    ///
    /// The first backup happens one full interval after the start. A failed backup is logged
    /// and retried on the next tick. Cancellation during an upload abandons it.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = time::ticker(self.interval);

        tracing::info!(
            path = %self.path.display(),
            interval = %humantime::format_duration(self.interval),
            key = BACKUP_KEY,
            "backup scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::warn!("shutdown requested, abandoning backup in progress");
                    break;
                }
                result = self.perform_backup() => match result {
                    Ok(bytes) => tracing::info!(bytes, "backup successful"),
                    Err(error) => tracing::error!(%error, "backup failed"),
                },
            }
        }

        tracing::info!("backup scheduler stopped");
    }

    /// Upload the current database file once. Returns the number of bytes sent.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn perform_backup(&self) -> Result<u64, BackupError> {
        let file = tokio::fs::File::open(&self.path)
            .await
            .context(OpenFileSnafu { path: &self.path })?;
        let bytes = file
            .metadata()
            .await
            .context(OpenFileSnafu { path: &self.path })?
            .len();

        self.uploader.upload(BACKUP_KEY, file).await?;

        Ok(bytes)
    }
}
