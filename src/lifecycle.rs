//! Process lifecycle: close every connection on SIGINT/SIGTERM.

use crate::db::Diagnostics;
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::signal;
use tracing::info;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_signal() -> io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received SIGINT");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received SIGINT");
        Ok(())
    }
}

/// Run the shutdown sequence once `trigger` completes, then wait out `grace`.
pub async fn shutdown_when<F>(trigger: F, diagnostics: &Diagnostics, grace: Duration)
where
    F: Future<Output = ()>,
{
    trigger.await;
    info!("Shutdown requested");
    diagnostics.shutdown().await;
    tokio::time::sleep(grace).await;
    info!(grace_ms = grace.as_millis() as u64, "Shutdown complete");
}

/// Wait for SIGINT/SIGTERM, close every connection, then wait out `grace`.
///
/// Returns once the process may exit with status 0.
pub async fn shutdown_on_signal(diagnostics: &Diagnostics, grace: Duration) -> io::Result<()> {
    let mut outcome = Ok(());
    shutdown_when(
        async {
            outcome = wait_for_signal().await;
        },
        diagnostics,
        grace,
    )
    .await;
    outcome
}
