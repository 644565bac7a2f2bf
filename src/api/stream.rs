use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use serde::Serialize;

use super::App;
use crate::time::{self, Timestamp};

/// How often a new snapshot is pushed to subscribers.
pub const STATS_PERIOD: Duration = Duration::from_secs(5);

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// Process-level numbers for the status page.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub uptime: String,
    /// Database file size in MiB with two decimals, `"0.00"` if it cannot be read.
    pub db_size_mb: String,
    pub started_at: Timestamp,
}

impl SystemStats {
    pub async fn collect(app: &App) -> Self {
        let db_size_mb = app
            .store
            .file_size()
            .await
            .map(|bytes| format!("{:.2}", bytes as f64 / BYTES_PER_MIB))
            .unwrap_or_else(|| "0.00".to_string());

        Self {
            uptime: time::uptime(app.started.elapsed()),
            db_size_mb,
            started_at: app.started_at,
        }
    }
}

/// `GET /api/streams/stats`, one event right away and then one every [STATS_PERIOD].
pub async fn system_stats(
    State(app): State<App>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    Sse::new(events(app)).keep_alive(KeepAlive::default())
}

/// Snapshots as server-sent events, until the server shuts down.
fn events(app: App) -> impl Stream<Item = Result<Event, Infallible>> {
    let shutdown = app.shutdown.clone().cancelled_owned();

    let mut timer = tokio::time::interval(STATS_PERIOD);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    futures::stream::unfold((app, timer), |(app, mut timer)| async move {
        timer.tick().await;

        let stats = SystemStats::collect(&app).await;
        let event = match Event::default().json_data(&stats) {
            Ok(event) => event,
            Err(error) => {
                tracing::error!(%error, "could not encode system stats");
                Event::default().comment("unavailable")
            }
        };

        Some((Ok(event), (app, timer)))
    })
    .take_until(shutdown)
}
