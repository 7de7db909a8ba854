//! Shared helper functions for CLI commands.

use std::sync::Arc;

use crate::config::{Settings, MEMORY_BROKER_URL};
use crate::repository::{AsyncSqlitePool, DieselPrintJobRepository, DieselTicketRepository};
use crate::shutdown::{self, ShutdownSignal, ShutdownTrigger};
use crate::transport::{Connector, MemoryBroker};

/// Open the job table named by the settings.
pub fn open_repository(settings: &Settings) -> DieselPrintJobRepository {
    DieselPrintJobRepository::new(AsyncSqlitePool::new(&settings.database_url()))
}

/// Open the job table, creating it if needed.
pub async fn open_initialized_repository(
    settings: &Settings,
) -> anyhow::Result<DieselPrintJobRepository> {
    settings.ensure_directories()?;
    let repo = open_repository(settings);
    repo.init_schema().await?;
    Ok(repo)
}

/// Open the judged submission table named by the settings.
pub fn open_ticket_repository(settings: &Settings) -> DieselTicketRepository {
    DieselTicketRepository::new(AsyncSqlitePool::new(&settings.database_url()))
}

/// Open the judged submission table, creating it if needed.
pub async fn open_initialized_ticket_repository(
    settings: &Settings,
) -> anyhow::Result<DieselTicketRepository> {
    settings.ensure_directories()?;
    let repo = open_ticket_repository(settings);
    repo.init_schema().await?;
    Ok(repo)
}

/// Connector for a command that runs on its own against an external broker.
pub fn external_connector(settings: &Settings) -> anyhow::Result<Arc<dyn Connector>> {
    if settings.uses_memory_broker() {
        anyhow::bail!(
            "{} is an in-process broker; use `printrelay run` or set broker_url to an amqp:// URL",
            MEMORY_BROKER_URL
        );
    }
    amqp_connector(settings)
}

/// Connector for `run`, which may host the in-process broker itself.
pub fn shared_connector(settings: &Settings) -> anyhow::Result<(Arc<dyn Connector>, Option<MemoryBroker>)> {
    if settings.uses_memory_broker() {
        let broker = MemoryBroker::new();
        return Ok((Arc::new(broker.connector()), Some(broker)));
    }
    Ok((amqp_connector(settings)?, None))
}

#[cfg(feature = "amqp-broker")]
fn amqp_connector(settings: &Settings) -> anyhow::Result<Arc<dyn Connector>> {
    url::Url::parse(&settings.broker_url)
        .map_err(|e| anyhow::anyhow!("Invalid broker URL: {}", e))?;
    Ok(Arc::new(crate::transport::amqp::AmqpConnector::new(
        settings.broker_url.clone(),
    )))
}

#[cfg(not(feature = "amqp-broker"))]
fn amqp_connector(_settings: &Settings) -> anyhow::Result<Arc<dyn Connector>> {
    anyhow::bail!("AMQP support not compiled in. Rebuild with: cargo build --features amqp-broker")
}

/// Shutdown signal fired by Ctrl-C.
pub fn shutdown_on_ctrl_c() -> (ShutdownTrigger, ShutdownSignal) {
    let (trigger, signal) = shutdown::channel();
    let ctrl_c_trigger = trigger.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                let _ = ctrl_c_trigger.send(true);
            }
            Err(e) => tracing::warn!(error = %e, "Cannot listen for Ctrl-C"),
        }
    });
    (trigger, signal)
}
