//! controller-steps demo operator
//!
//! Runs the bundled WebApp controller on top of the step engine.

use std::sync::Arc;

use kube::Client;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use controller_steps::{
    adapters::{EventSink, KubeEventRecorder, KubeTargetClient},
    config::Config,
    controllers,
    core::KubeStore,
    crd::WebApp,
    demo, metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting controller-steps operator");
    let config = Config::from_env()?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let store = Arc::new(KubeStore::<WebApp>::new(client.clone()));
    let targets = Arc::new(KubeTargetClient::new(client.clone()));
    let events: Arc<dyn EventSink> = Arc::new(KubeEventRecorder::new(client.clone(), env!("CARGO_PKG_NAME")));
    let engine = Arc::new(demo::engine(store, targets, Some(events), &config)?);

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let webapp_controller = controllers::run(client, engine, config.watch_namespace.clone());

    tokio::select! {
        result = webapp_controller => {
            if let Err(e) = result {
                error!(error = %e, "WebApp controller failed");
                return Err(e.into());
            }
            info!("WebApp controller stopped");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    info!("controller-steps operator stopped");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for SIGTERM or SIGINT
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
