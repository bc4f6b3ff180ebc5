//! `relaygate run`: the long-lived supervisor process

use anyhow::{Context, Result};
use relaygate_core::{ConfigStore, ReconcileReport, Supervisor, SupervisorOptions, TunnelConfig};

/// Start the forwarders and keep them up until SIGTERM / Ctrl+C
///
/// SIGHUP rereads the config and rebuilds the forwarder set. A config that
/// fails to load on reload keeps the current forwarders running.
pub async fn run(store: ConfigStore) -> Result<()> {
    let config = load(&store)?;
    let mut supervisor = Supervisor::new(SupervisorOptions::from_config(&config));

    let report = supervisor.reconcile(&config).await;
    log_report(&config, &report);
    if report.all_failed() {
        anyhow::bail!("No forwarder could be started");
    }

    let mut reload = reload_signal()?;
    loop {
        tokio::select! {
            _ = reload.recv() => {
                tracing::info!("SIGHUP received, reloading {:?}", store.path());
                match load(&store) {
                    Ok(config) => {
                        supervisor.stop().await;
                        supervisor = Supervisor::new(SupervisorOptions::from_config(&config));
                        let report = supervisor.reconcile(&config).await;
                        log_report(&config, &report);
                    }
                    Err(e) => {
                        tracing::error!("Reload failed, keeping current forwarders: {:#}", e);
                    }
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("Shutdown signal received, stopping forwarders...");
                break;
            }
        }
    }

    supervisor.stop().await;
    tracing::info!("Supervisor shutdown complete");
    Ok(())
}

fn load(store: &ConfigStore) -> Result<TunnelConfig> {
    let config = store
        .load()
        .with_context(|| format!("Failed to load config from {:?}", store.path()))?;
    config.validate().context("Invalid config")?;
    Ok(config)
}

fn log_report(config: &TunnelConfig, report: &ReconcileReport) {
    tracing::info!(
        "Role {}: {} forwarder(s) listening {:?}",
        config.role,
        report.listening.len(),
        report.listening
    );
    if let Some(port) = report.excluded {
        tracing::info!("Port {} is the panel port and is not forwarded", port);
    }
    for failure in &report.failed {
        tracing::error!("Port {} failed: {}", failure.port, failure.reason);
    }
    if report.listening.is_empty() && report.failed.is_empty() {
        tracing::warn!("Nothing to forward");
    }
}

/// Stream of SIGHUP notifications
struct ReloadSignal {
    #[cfg(unix)]
    inner: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if self.inner.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
        #[cfg(not(unix))]
        std::future::pending::<()>().await;
    }
}

fn reload_signal() -> Result<ReloadSignal> {
    #[cfg(unix)]
    {
        let inner = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .context("Failed to install SIGHUP handler")?;
        Ok(ReloadSignal { inner })
    }
    #[cfg(not(unix))]
    Ok(ReloadSignal {})
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
