use challenge_tracker::clock::{Clock, SystemClock};
use challenge_tracker::reconcile::{FileMarkerStore, Reconciler};
use challenge_tracker::repository::Repository;
use challenge_tracker::store::MemoryStore;
use challenge_tracker::{AppState, ChallengeService, Config, router};
use std::{net::SocketAddr, sync::Arc};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(MemoryStore::open(config.data_path.clone(), Arc::clone(&clock)).await);
    let repo = Repository::new(store, config.defaults.clone());
    let service = ChallengeService::new(repo, Arc::clone(&clock));
    let settings = service.settings().await?;
    info!(
        status = ?settings.status(),
        day = settings.current_day,
        data_path = %config.data_path.display(),
        "loaded challenge settings"
    );

    let markers = Arc::new(FileMarkerStore::open(config.marker_path.clone()).await);
    let reconciler = Arc::new(Reconciler::new(service.clone(), markers));
    let reconcile = reconciler.spawn(config.reconcile_interval);

    let app = router(AppState::new(service));
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!("listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconcile.shutdown().await;
    info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
