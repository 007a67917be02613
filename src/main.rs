use anyhow::Context;
use challenge_spawner::{
    api::{self, AppState},
    cluster::{ClusterApi, KubeCluster},
    config::Settings,
    orchestrator::Orchestrator,
    reclaimer::Reclaimer,
    registry::Registry,
    telemetry::{self, Metrics},
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();
    let metrics = Arc::new(Metrics::default());

    info!("Starting challenge spawner");
    let settings = Arc::new(Settings::load()?);
    info!("Configuration loaded");

    let registry = Registry::open(&settings.database_path)
        .with_context(|| format!("opening registry {}", settings.database_path))?;
    info!("Registry ready at {}", settings.database_path);

    let cluster: Arc<dyn ClusterApi> = Arc::new(KubeCluster::new(&settings));
    // the client is also retried on every call, so a bad mount only degrades requests
    if let Err(e) = cluster.connect().await {
        warn!("[!] Kubernetes client unavailable at startup: {}", e);
    }

    let orchestrator = Orchestrator::new(
        registry.clone(),
        cluster.clone(),
        settings.clone(),
        metrics.clone(),
    );
    let reclaimer = Arc::new(Reclaimer::new(registry, cluster, &settings, metrics));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn({
        let reclaimer = reclaimer.clone();
        async move { reclaimer.run(shutdown_rx).await }
    });

    let app = api::router(AppState::new(orchestrator, reclaimer));
    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    info!("Listening on {}", settings.listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    let _ = shutdown_tx.send(());
    let _ = handle.await;

    Ok(())
}
