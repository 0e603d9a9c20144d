//! External interrupt handling

use super::error::Interrupt;

/// Resolve when the process receives SIGINT or (on unix) SIGTERM
///
/// If a handler cannot be installed the corresponding branch never resolves,
/// so a broken handler does not abort the run.
pub async fn shutdown_signal() -> Interrupt {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => Interrupt::CtrlC,
        _ = terminate => Interrupt::Terminate,
    }
}
