//! Stream Indexer Main Entry Point
//!
//! Consumes JSON records from Kafka and indexes them into OpenSearch.

use dotenv::dotenv;
use futures::future::join_all;
use stream_indexer::config::LogFormat;
use stream_indexer::{Dependencies, IndexerConfig, IndexingError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging.
fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stream_indexer=info,stream_indexer_repository=info"));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_thread_ids(true),
                )
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(true).pretty())
                .init();
        }
    }

    info!(
        service_name = "stream-indexer",
        service_version = env!("CARGO_PKG_VERSION"),
        format = ?format,
        "Tracing initialized"
    );
}

/// Cancel `token` on SIGINT or SIGTERM.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                        _ = terminate.recv() => info!("Received SIGTERM"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Cannot listen for SIGTERM, only SIGINT stops the indexer");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Received SIGINT");
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received SIGINT");
        }

        token.cancel();
    });
}

#[tokio::main]
async fn main() -> Result<(), IndexingError> {
    // Load environment variables from .env file
    dotenv().ok();

    init_tracing(LogFormat::from_env());

    info!("Starting stream indexer");

    let config = IndexerConfig::from_env().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let deps = match Dependencies::new(&config, &shutdown).await {
        Ok(deps) => {
            info!("Dependencies initialized successfully");
            deps
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize dependencies");
            return Err(e);
        }
    };

    let workers = deps.orchestrators.into_iter().map(|mut orchestrator| {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = orchestrator.run().await;
            // One failing worker stops the others.
            if result.is_err() {
                shutdown.cancel();
            }
            result
        })
    });

    let mut first_error: Option<IndexingError> = None;
    for joined in join_all(workers).await {
        let result = match joined {
            Ok(result) => result.map_err(IndexingError::from),
            Err(e) => Err(IndexingError::WorkerError(e.to_string())),
        };
        if let Err(e) = result {
            error!(error = %e, "Stream indexer worker failed");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        None => {
            info!("Stream indexer completed successfully");
            Ok(())
        }
        Some(e) => Err(e),
    }
}
