use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

/// Service configuration, read from the environment (and `.env`).
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host_address")]
    pub host_address: SocketAddr,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_public_dir")]
    pub public_dir: PathBuf,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Deadline for a single ledger operation.
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "crate::time::deserialize_duration"
    )]
    pub request_timeout: Duration,

    #[serde(default)]
    pub backup_enabled: bool,
    #[serde(
        default = "default_backup_interval",
        deserialize_with = "crate::time::deserialize_duration"
    )]
    pub backup_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env::<Self>()
    }
}

/// Credentials of the S3-compatible bucket that receives backups, read from `SPACES_*`.
///
/// These are only looked up once backups are enabled.
#[derive(Deserialize, Clone)]
pub struct SpacesConfig {
    pub key: String,
    pub secret: String,
    pub endpoint: Url,
    pub region: String,
    pub bucket: String,
}

impl SpacesConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("SPACES_").from_env::<Self>()
    }
}

impl std::fmt::Debug for SpacesConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpacesConfig")
            .field("key", &self.key)
            .field("secret", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("bucket", &self.bucket)
            .finish()
    }
}

fn default_host_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_database_path() -> PathBuf {
    PathBuf::from("blog.db")
}

fn default_public_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("./assets")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_backup_interval() -> Duration {
    Duration::from_secs(60 * 60)
}
