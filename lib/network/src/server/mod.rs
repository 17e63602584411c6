pub mod tcp;

use anyhow::{Context, Result};
use common::ServerConfig;
use metrics::SystemCollectors;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

pub use tcp::{MonitorServer, ServerError};

/// Serve subscribers until Ctrl-C or SIGTERM.
pub async fn start_server(config: &ServerConfig) -> Result<()> {
    info!(
        address = %config.listen().address(),
        metrics = ?config.metrics(),
        "Starting monitoring server"
    );

    let server = MonitorServer::new(config, Arc::new(SystemCollectors));
    let listener = server
        .bind()
        .await
        .context("Unable to start server")?;

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received, terminating server...");
        shutdown.cancel();
    });

    server.serve(listener).await;
    Ok(())
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(err) => warn!(error = %err, "Unable to listen for SIGTERM"),
        }
    }

    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "Unable to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
