//! Interrupt handling for the eegflow binary

use eegflow_pipeline::PipelineWorker;
use tracing::{info, warn};

/// Cancel `worker` when SIGINT or SIGTERM arrives
///
/// Running stages stop at their next boundary; artifacts already written stay valid.
pub fn install_signal_handlers(worker: PipelineWorker) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(mut sigterm), Ok(mut sigint)) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("[shutdown] received SIGTERM"),
                        _ = sigint.recv() => info!("[shutdown] received SIGINT"),
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "[shutdown] failed to install signal handlers");
                    return;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "[shutdown] failed to install Ctrl+C handler");
                return;
            }
            info!("[shutdown] received Ctrl+C");
        }

        worker.shutdown();
    });
}
