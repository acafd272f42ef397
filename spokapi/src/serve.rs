use std::sync::Arc;

use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;

use spokapi_core::config::Config;
use spokapi_core::service::Service;

pub async fn main(config: Arc<Config>, service: Arc<Service>) -> anyhow::Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let interval = config.scheduler.refresh_interval;
    tracing::info!(
        sources = ?service.registry().ids(),
        interval = %humantime::format_duration(interval),
        "Serving..."
    );
    service.start_periodic(interval);

    tokio::select! {
        _ = sigint.recv() => {
            tracing::info!("SIGINT received");
        }
        _ = sigterm.recv() => {
            tracing::info!("SIGTERM received");
        }
    }

    tracing::info!("Stopping...");
    service.stop_periodic();
    Ok(())
}
