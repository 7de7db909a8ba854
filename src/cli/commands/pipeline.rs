//! Long-running pipeline commands: poll, relay and run.

use std::sync::Arc;

use console::style;
use tokio::task::JoinHandle;

use super::failures::watch_failures;
use crate::cli::helpers::{
    external_connector, open_initialized_repository, open_initialized_ticket_repository,
    shared_connector, shutdown_on_ctrl_c,
};
use crate::config::Settings;
use crate::poller::{JobSource, Poller, ScanStats};
use crate::relay::{Relay, RelayStats, Transform};
use crate::shutdown::{self, ShutdownSignal};
use crate::stages::{
    HighlightStage, PrintStage, RenderStage, StageKind, TicketStage, TypesetStage,
};
use crate::transport::Connector;

fn configure<T: Transform>(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    stage: StageKind,
    transform: T,
) -> Relay<T> {
    Relay::new(connector, stage.route(&settings.queues), transform)
        .with_timeout(settings.transform_timeout)
        .with_reconnect_backoff(settings.relay_backoff)
}

fn spawn_relay<T: Transform + 'static>(
    relay: Relay<T>,
    shutdown: ShutdownSignal,
) -> JoinHandle<RelayStats> {
    tokio::spawn(async move { relay.run(shutdown).await })
}

/// Start the relay for `stage` on its own task.
fn spawn_stage(
    settings: &Settings,
    connector: Arc<dyn Connector>,
    stage: StageKind,
    shutdown: ShutdownSignal,
) -> JoinHandle<RelayStats> {
    match stage {
        StageKind::Ticket => spawn_relay(
            configure(settings, connector, stage, TicketStage::from_settings(settings)),
            shutdown,
        ),
        StageKind::Highlight => spawn_relay(
            configure(settings, connector, stage, HighlightStage::from_settings(settings)),
            shutdown,
        ),
        StageKind::Typeset => spawn_relay(
            configure(settings, connector, stage, TypesetStage::from_settings(settings)),
            shutdown,
        ),
        StageKind::Render => spawn_relay(
            configure(settings, connector, stage, RenderStage::from_settings(settings)),
            shutdown,
        ),
        StageKind::Print => spawn_relay(
            configure(settings, connector, stage, PrintStage::from_settings(settings)),
            shutdown,
        ),
    }
}

fn print_stats(stage: StageKind, stats: &RelayStats) {
    println!(
        "  {} {:<10} handled {} (forwarded {}, consumed {}, failed {}, dropped {}), rejected {}, requeued {}",
        style("✓").green(),
        stage,
        stats.handled(),
        stats.forwarded,
        stats.consumed,
        stats.failed,
        stats.dropped,
        stats.rejected,
        stats.requeued
    );
}

fn poller<S: JobSource>(
    settings: &Settings,
    source: S,
    connector: Arc<dyn Connector>,
    queue: &str,
    shutdown: ShutdownSignal,
) -> Poller<S> {
    Poller::new(source, connector, queue)
        .with_retry(settings.retry)
        .with_shutdown(shutdown)
}

fn print_scan(what: &str, stats: &ScanStats) {
    println!(
        "{} Published {} of {} eligible {}",
        style("✓").green(),
        stats.published,
        stats.eligible,
        what
    );
    if stats.unsent > 0 {
        println!("{} {} {} left unsent", style("!").yellow(), stats.unsent, what);
    }
    if stats.claim_failed > 0 {
        println!(
            "{} {} {} published but not claimed",
            style("!").yellow(),
            stats.claim_failed,
            what
        );
    }
}

/// Publish eligible jobs and tickets, once or on an interval.
pub async fn cmd_poll(settings: &Settings, once: bool) -> anyhow::Result<()> {
    let jobs = open_initialized_repository(settings).await?;
    let tickets = open_initialized_ticket_repository(settings).await?;
    let connector = external_connector(settings)?;
    let (_trigger, signal) = shutdown_on_ctrl_c();

    let mut job_poller = poller(
        settings,
        jobs,
        connector.clone(),
        &settings.queues.source,
        signal.clone(),
    );
    let mut ticket_poller = poller(settings, tickets, connector, &settings.queues.tickets, signal);

    if once {
        print_scan("job(s)", &job_poller.scan().await?);
        print_scan("ticket(s)", &ticket_poller.scan().await?);
        return Ok(());
    }

    let interval = settings.poll_interval;
    tokio::join!(job_poller.run(interval), ticket_poller.run(interval));
    Ok(())
}

/// Run one stage relay until Ctrl-C.
pub async fn cmd_relay(settings: &Settings, stage: StageKind) -> anyhow::Result<()> {
    settings.ensure_directories()?;
    let connector = external_connector(settings)?;
    let (_trigger, signal) = shutdown_on_ctrl_c();

    println!(
        "Relaying {} on {} (Ctrl-C to stop)",
        style(stage).bold(),
        connector.describe()
    );
    let stats = spawn_stage(settings, connector, stage, signal).await?;
    print_stats(stage, &stats);
    Ok(())
}

/// Run the poller, every stage and a failure logger in one process.
pub async fn cmd_run(settings: &Settings) -> anyhow::Result<()> {
    let repo = open_initialized_repository(settings).await?;
    let tickets = open_initialized_ticket_repository(settings).await?;
    let (connector, memory) = shared_connector(settings)?;
    let (_trigger, signal) = shutdown_on_ctrl_c();

    println!(
        "Running pipeline on {} (Ctrl-C to stop)",
        style(connector.describe()).bold()
    );

    let interval = settings.poll_interval;
    let mut job_poller = poller(
        settings,
        repo,
        connector.clone(),
        &settings.queues.source,
        signal.clone(),
    );
    let mut ticket_poller = poller(
        settings,
        tickets,
        connector.clone(),
        &settings.queues.tickets,
        signal.clone(),
    );
    let poller_task = tokio::spawn(async move {
        tokio::join!(job_poller.run(interval), ticket_poller.run(interval));
    });

    let relays: Vec<_> = StageKind::ALL
        .into_iter()
        .map(|stage| {
            (
                stage,
                spawn_stage(settings, connector.clone(), stage, signal.clone()),
            )
        })
        .collect();

    let failed_queue = settings.queues.failed.clone();
    let failure_connector = connector.clone();
    let failure_signal = signal.clone();
    let failures_task = tokio::spawn(async move {
        watch_failures(failure_connector, &failed_queue, failure_signal, None, |report| {
            tracing::warn!(
                job_id = %report.job_id,
                stage = %report.stage,
                "Job failed: {}",
                report.error_message
            )
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failure logger stopped");
            0
        })
    });

    let mut wait = signal.clone();
    shutdown::requested(&mut wait).await;

    poller_task.await?;
    for (stage, handle) in relays {
        let stats = handle.await?;
        print_stats(stage, &stats);
    }
    let failed = failures_task.await?;
    if failed > 0 {
        println!("{} {} job(s) failed", style("!").yellow(), failed);
    }

    if let Some(broker) = memory {
        let finished = broker.depth(&settings.queues.finished);
        println!("{} {} job(s) printed", style("✓").green(), finished);
    }
    Ok(())
}
