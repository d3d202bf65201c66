use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sensor_relay_service::{
    api::{self, AppState},
    config::Config,
    db::{self, store::PgStore, store::Store},
    ingest::{IngestService, Progress},
    push::{PushExecutor, PushScheduler},
    sink::{SinkApi, WaziupClient},
    source::{SourceApi, ThingSpeakClient},
};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let pool = db::create_pool(&config.database_url, config.ingest.max_in_flight).await?;
    db::run_migrations(&pool).await?;
    info!("Database ready");

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let progress = Arc::new(Progress::new());
    let cancel = CancellationToken::new();

    let ingest_task = if config.ingest_enabled {
        let source: Arc<dyn SourceApi> = Arc::new(ThingSpeakClient::new(&config)?);
        let service = IngestService::new(store.clone(), source, progress.clone(), config.ingest.clone());
        Some(tokio::spawn(service.run(cancel.clone())))
    } else {
        info!("Ingestion disabled");
        None
    };

    let mut push_loops = if config.push_enabled {
        let sink: Arc<dyn SinkApi> = Arc::new(WaziupClient::new(&config)?);
        let executor = PushExecutor::new(store.clone(), sink);
        Some(PushScheduler::new(store.clone(), executor).spawn(cancel.clone()))
    } else {
        info!("Push scheduler disabled");
        None
    };

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(AppState { store, progress }))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight fetches and pushes finish.
    cancel.cancel();
    if let Some(task) = ingest_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Ingestion loop ended abnormally");
        }
    }
    if let Some(loops) = push_loops.as_mut() {
        while let Some(res) = loops.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "Push timer ended abnormally");
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
