use std::net::SocketAddr;

use dotenvy::dotenv;
use snafu::ResultExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use pagecount::api::{self, App};
use pagecount::backup;
use pagecount::config::Config;
use pagecount::database::Store;
use pagecount::error::{
    ApplicationError, BindAddressSnafu, ConfigLoadSnafu, OpenDatabaseSnafu, WebServerSnafu,
};
use pagecount::ledger::Ledger;
use pagecount::logger;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    dotenv().ok();

    let config = Config::from_env().context(ConfigLoadSnafu)?;

    let _guard = logger::init(&config)?;

    let store = Store::open(&config.database_path).context(OpenDatabaseSnafu)?;
    let ledger = Ledger::new(store.clone(), config.request_timeout);

    let shutdown = CancellationToken::new();
    let backups = backup::start(&config, store.path(), shutdown.child_token());

    let app = App::starting_now(ledger, store, shutdown.clone());
    let router = api::router(app, &config.public_dir, &config.assets_dir);

    let address = config.host_address;
    let listener = TcpListener::bind(address)
        .await
        .context(BindAddressSnafu { address })?;
    tracing::info!(%address, "listening");

    let served = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await
    .context(WebServerSnafu);

    shutdown.cancel();
    if let Some(backups) = backups {
        if let Err(error) = backups.await {
            tracing::error!(%error, "backup task ended abnormally");
        }
    }

    tracing::info!("shut down");
    served
}

/// Resolves on Ctrl+C, SIGTERM, or when `shutdown` is cancelled elsewhere.
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }

        tracing::info!("received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
                tracing::info!("received terminate signal, shutting down");
            }
            Err(error) => {
                tracing::error!(%error, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    shutdown.cancel();
}
