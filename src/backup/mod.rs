//! Periodic off-site copies of the stats database.
//!
//! The [BackupScheduler] owns nothing but a path and an [Uploader]; it never touches rows,
//! it streams the whole database file to a fixed key on every tick.

use std::future::Future;
use std::path::{Path, PathBuf};

use snafu::{ensure, Location, ResultExt, Snafu};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, SpacesConfig};

pub use scheduler::BackupScheduler;
pub use spaces::SpacesUploader;

mod scheduler;
mod spaces;

/// Every backup overwrites the same object.
pub const BACKUP_KEY: &str = "backups/blog.db";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackupError {
    /// Could not open the database file for reading
    OpenFile {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// The object storage rejected the upload
    #[snafu(display("could not upload {key}: {message}"))]
    Upload {
        key: String,
        message: String,
        #[snafu(implicit)]
        location: Location,
    },

    /// Backups are enabled but the storage credentials are incomplete
    Credentials {
        source: envy::Error,
        #[snafu(implicit)]
        location: Location,
    },

    /// The backup interval must be longer than zero
    ZeroInterval {
        #[snafu(implicit)]
        location: Location,
    },
}

/// Destination of backup snapshots.
pub trait Uploader {
    /// Stream `file` to `key`, replacing whatever was stored there.
    fn upload(
        &self,
        key: &str,
        file: tokio::fs::File,
    ) -> impl Future<Output = Result<(), BackupError>> + Send;
}

/// Spawn the backup task for the database at `path`.
///
/// Returns `None` when backups are disabled or misconfigured. Neither stops the service, a
/// misconfiguration is only logged.
pub fn start(config: &Config, path: &Path, cancel: CancellationToken) -> Option<JoinHandle<()>> {
    if !config.backup_enabled {
        tracing::info!("backups are not enabled, scheduler not started");
        return None;
    }

    match configure(config, path) {
        Ok(scheduler) => Some(tokio::spawn(scheduler.run(cancel))),
        Err(error) => {
            tracing::error!(%error, "backups are enabled but misconfigured, scheduler not started");
            None
        }
    }
}

fn configure(config: &Config, path: &Path) -> Result<BackupScheduler<SpacesUploader>, BackupError> {
    ensure!(!config.backup_interval.is_zero(), ZeroIntervalSnafu);

    let spaces = SpacesConfig::from_env().context(CredentialsSnafu)?;
    tracing::debug!(?spaces, "loaded backup credentials");

    let uploader = SpacesUploader::new(&spaces);

    Ok(BackupScheduler::new(
        uploader,
        path.to_path_buf(),
        config.backup_interval,
    ))
}
