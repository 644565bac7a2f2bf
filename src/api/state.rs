use std::ops::Deref;
use std::time::Instant;

use derive_new::new;
use tokio_util::sync::CancellationToken;

use crate::database::Store;
use crate::ledger::Ledger;
use crate::time::Timestamp;

/// State shared by every handler.
#[derive(Debug, Clone, new)]
pub struct App {
    pub ledger: Ledger,
    pub store: Store,
    pub started: Instant,
    pub started_at: Timestamp,
    /// Cancelled when the server shuts down, ends long-lived responses.
    pub shutdown: CancellationToken,
}

impl App {
    /// State for a process that starts right now.
    pub fn starting_now(ledger: Ledger, store: Store, shutdown: CancellationToken) -> Self {
        Self::new(ledger, store, Instant::now(), crate::time::now(), shutdown)
    }
}

impl Deref for App {
    type Target = Ledger;

    fn deref(&self) -> &Self::Target {
        &self.ledger
    }
}
