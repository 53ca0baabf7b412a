use std::sync::Arc;
use std::time::Duration;

use datashare::clock::{Clock, SystemClock};
use datashare::config::Config;
use datashare::storage::BlobStorage;
use datashare::{db, logging, router, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("datashare: {e}");
        std::process::exit(1);
    }
}

async fn run() -> datashare::Result<()> {
    let config = Config::from_env()?;
    logging::init(&config.logging);

    let conn = db::establish_connection(&config.database.path)?;
    let storage = BlobStorage::new(&config.storage.path)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(conn, storage, clock, &config);

    let _reaper = state.reaper().spawn(
        Duration::from_secs(config.reaper.interval_secs),
        config.reaper.run_on_startup,
    );

    let app = router::create_router(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server running");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
    tracing::info!("shutting down");
}
