use std::sync::Arc;

use anyhow::Result;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use soil_sensor_ingest::{api, bigquery::BigQueryClient, config::Config, handler::Handler};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; Cloud Run injects the environment directly.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    // One client for the whole process; every invocation shares it.
    let bigquery = BigQueryClient::new(&config);
    info!(table = %bigquery.table(), "BigQuery sink configured");
    let handler = Handler::new(Arc::new(bigquery));

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Push endpoint listening");

    axum::serve(listener, api::router(handler))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Resolves once the platform asks the instance to stop. Cloud Run sends
/// SIGTERM; Ctrl+C covers local runs. `serve` then finishes the pushes it has
/// already accepted, so no delivery is cut off between decode and insert.
async fn shutdown_signal() {
    let signal = stop_requested().await;
    info!(signal, "Stopping push receiver, draining in-flight deliveries");
}

#[cfg(unix)]
async fn stop_requested() -> &'static str {
    use signal::unix::{signal as unix_signal, SignalKind};

    match unix_signal(SignalKind::terminate()) {
        Ok(mut sigterm) => tokio::select! {
            Ok(()) = signal::ctrl_c() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        },
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, only Ctrl+C stops the receiver");
            ctrl_c_or_never().await
        }
    }
}

#[cfg(not(unix))]
async fn stop_requested() -> &'static str {
    ctrl_c_or_never().await
}

async fn ctrl_c_or_never() -> &'static str {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Ctrl+C handler unavailable");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
