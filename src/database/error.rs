use std::path::PathBuf;
use std::time::Duration;

use snafu::{Location, Snafu};

pub type Result<T, E = DatabaseError> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DatabaseError {
    #[snafu(display("cannot create the database directory {} at {location}: {source}", path.display()))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("cannot open the database {} at {location}: {source}", path.display()))]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to apply `PRAGMA {pragma}` at {location}: {source}"))]
    Pragma {
        pragma: &'static str,
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database is in `{mode}` journal mode, expected `wal`"))]
    JournalMode {
        mode: String,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to set up the database schema at {location}: {source}"))]
    Schema {
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to query the database at {location}: {source}"))]
    Query {
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("failed to commit the transaction at {location}: {source}"))]
    Commit {
        source: rusqlite::Error,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database worker failed at {location}: {source}"))]
    Worker {
        source: tokio::task::JoinError,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database operation did not finish within {deadline:?}"))]
    Deadline {
        deadline: Duration,
        #[snafu(implicit)]
        location: Location,
    },

    #[snafu(display("database operation was abandoned by its caller before it started"))]
    Abandoned {
        #[snafu(implicit)]
        location: Location,
    },
}

impl DatabaseError {
    /// Whether the operation ran out of time rather than failing in the store.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Deadline { .. } | Self::Abandoned { .. })
    }
}
