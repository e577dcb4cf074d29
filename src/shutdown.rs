use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cancel `token` on SIGTERM or SIGINT.
///
/// The listener exits quietly if the token is cancelled some other way first.
pub fn install_shutdown_handler(token: &CancellationToken) -> JoinHandle<()> {
    let token = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        tokio::select! {
            _ = token.cancelled() => return,
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, stopping worker pool");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, stopping worker pool");
            }
        }

        token.cancel();
    })
}
