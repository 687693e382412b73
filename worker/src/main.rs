//! Main entry point for the pull worker

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use harmony_worker::config::WorkerConfig;
use harmony_worker::k8s::PodClient;
use harmony_worker::object_store::{FileObjectStore, ObjectStore};
use harmony_worker::puller::PullWorker;
use harmony_worker::query::QueryClient;
use harmony_worker::runner::ServiceExecutor;
use harmony_worker::sentinel::Sentinels;
use harmony_worker::sidecar::{SidecarRunner, WORKER_CONTAINER};
use harmony_worker::work_client::WorkClient;

const SIDECAR_READY_TIMEOUT: Duration = Duration::from_secs(180);
const SIDECAR_READY_INTERVAL: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "harmony_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env()?;
    info!(
        "Starting pull worker v{} for service {} on pod {}",
        env!("CARGO_PKG_VERSION"),
        config.harmony_service,
        config.my_pod_name
    );

    let sentinels = Sentinels::new(config.working_dir.clone());
    spawn_signal_handler(sentinels.clone());

    let pods = PodClient::new(config.kubernetes_namespace.clone())
        .await
        .context("Failed to create K8s client")?;

    // the sidecar must be up before any work is accepted
    if let Err(e) = pods
        .wait_for_container_running(
            &config.my_pod_name,
            WORKER_CONTAINER,
            SIDECAR_READY_TIMEOUT,
            SIDECAR_READY_INTERVAL,
        )
        .await
    {
        error!("Sidecar container never became ready: {}", e);
        std::process::exit(1);
    }

    let store_root =
        std::env::var("OBJECT_STORE_ROOT").unwrap_or_else(|_| "/tmp/harmony-store".to_string());
    let store: Arc<dyn ObjectStore> = Arc::new(FileObjectStore::new(store_root));

    let sidecar = SidecarRunner::new(pods, config.clone(), store.clone());
    if !config.is_query_service() {
        if let Err(e) = sidecar.prime().await {
            error!("{}", e);
            std::process::exit(1);
        }
    }

    let query = QueryClient::new(
        config.worker_port,
        &config.harmony_service,
        &config.artifact_bucket,
    );
    let executor = Arc::new(ServiceExecutor::new(
        sidecar,
        query,
        store,
        config.artifact_bucket.clone(),
    ));

    let work_client = WorkClient::new(&config)?;
    let worker = PullWorker::new(work_client, sentinels, executor, config.worker_timeout);
    worker.run().await?;

    info!("Pull worker shutdown complete");
    Ok(())
}

/// SIGTERM sets the intent to exit; the loop finishes and reports the current
/// item before honoring it.
fn spawn_signal_handler(sentinels: Sentinels) {
    tokio::spawn(async move {
        let ctrl_c = async {
            signal::ctrl_c().await.ok();
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => error!("Failed to install signal handler: {}", e),
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received; finishing in-flight work");
        sentinels.request_termination();
    });
}
