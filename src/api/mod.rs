use std::any::Any;
use std::path::Path;

use axum::http::{Method, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

pub use error::*;
pub use state::App;
pub use stream::{SystemStats, STATS_PERIOD};
pub use visitor::Visitor;

mod error;
mod handlers;
mod state;
mod stream;
mod visitor;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

/// Build the whole HTTP surface.
///
/// ```text
/// GET  /api/stats/:slug     counters of an article
/// POST /api/views/:slug     count a view
/// POST /api/likes/:slug     count a like
/// GET  /api/streams/stats   server-sent system stats
/// GET  /assets/*            files from `assets_dir`
/// GET  /*                   pre-rendered pages from `public_dir`
/// ```
///
/// The event stream sits outside the request logging and panic layers, it lives as long as
/// the client stays connected.
pub fn router(app: App, public_dir: &Path, assets_dir: &Path) -> Router {
    let site = Router::new()
        .route("/api/stats/:slug", get(handlers::stats))
        .route("/api/views/:slug", post(handlers::view))
        .route("/api/likes/:slug", post(handlers::like))
        .nest_service("/assets", ServeDir::new(assets_dir))
        .fallback_service(ServeDir::new(public_dir))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CatchPanicLayer::custom(handle_panic)),
        );

    let streams = Router::new()
        .route("/api/streams/stats", get(stream::system_stats))
        .layer(
            CorsLayer::new()
                .allow_origin(AnyOrigin)
                .allow_methods([Method::GET]),
        );

    streams.merge(site).with_state(app)
}

fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");

    tracing::error!(panic = message, "request handler panicked");

    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
}
