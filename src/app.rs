use crate::classification::{Classifier, OrtClassifier};
use crate::config::Config;
use crate::detection::{Detector, OrtDetector};
use crate::pipeline::FramePipeline;
use crate::server::HttpServer;

use std::{error::Error, sync::Arc};
use tokio::{signal, sync::broadcast};

/// Loads both models, then serves until a shutdown signal arrives. A model
/// that fails to load aborts the whole process before any connection is
/// accepted.
pub async fn start_app(config: Config) -> Result<(), Box<dyn Error>> {
    let detector: Arc<dyn Detector> = match OrtDetector::load(&config.detector) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            tracing::error!("Failed to load detection model: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let classifier: Arc<dyn Classifier> = match OrtClassifier::load(&config.classifier) {
        Ok(classifier) => Arc::new(classifier),
        Err(e) => {
            tracing::error!("Failed to load classification model: {:?}", e);
            return Err(Box::new(e));
        }
    };

    let pipeline = Arc::new(FramePipeline::new(detector, classifier, &config.pipeline));

    let server = HttpServer::new(pipeline, &config).await?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let server_shutdown_rx = shutdown_tx.subscribe();

    let server_handle = server.run(server_shutdown_rx).await?;

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, starting graceful shutdown.");

    let _ = shutdown_tx.send(());
    let _ = server_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
