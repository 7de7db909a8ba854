//! Operator consumer for the failure queue.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::cli::helpers::{external_connector, shutdown_on_ctrl_c};
use crate::config::Settings;
use crate::models::FailureReport;
use crate::shutdown::{self, ShutdownSignal};
use crate::transport::{Connector, TransportError};

/// Consume failure reports until shutdown (or until idle for `idle_exit`),
/// calling `on_report` for each before acknowledging it.
///
/// Returns the number of reports seen.
pub async fn watch_failures<F>(
    connector: Arc<dyn Connector>,
    queue: &str,
    mut shutdown: ShutdownSignal,
    idle_exit: Option<Duration>,
    mut on_report: F,
) -> Result<u64, TransportError>
where
    F: FnMut(&FailureReport) + Send,
{
    let mut conn = connector.connect().await?;
    let mut subscription = conn.subscribe(queue).await?;
    let idle = idle_exit.unwrap_or(Duration::MAX);
    let mut seen = 0;

    loop {
        let delivery = tokio::select! {
            biased;
            _ = shutdown::requested(&mut shutdown) => break,
            _ = tokio::time::sleep(idle) => break,
            next = subscription.next() => match next? {
                Some(delivery) => delivery,
                None => break,
            },
        };

        match delivery.decode::<FailureReport>() {
            Ok(report) => {
                on_report(&report);
                seen += 1;
            }
            Err(e) => tracing::warn!(
                queue,
                error = %e,
                "Discarding unreadable failure report"
            ),
        }
        conn.acknowledge(&delivery).await?;
    }

    Ok(seen)
}

pub fn print_report(report: &FailureReport) {
    let when = chrono::DateTime::from_timestamp(report.timestamp_seconds, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    println!(
        "{} {} {} [{}] {}: {}",
        style("✗").red(),
        report.origin,
        style(report.job_id).bold(),
        if report.stage.is_empty() { "?" } else { report.stage.as_str() },
        when,
        report.error_message
    );
}

/// Print failure reports as they arrive.
pub async fn cmd_failures(settings: &Settings, idle_exit: Option<u64>) -> anyhow::Result<()> {
    let connector = external_connector(settings)?;
    let (_trigger, signal) = shutdown_on_ctrl_c();

    println!(
        "Watching {} on {} (Ctrl-C to stop)",
        settings.queues.failed,
        connector.describe()
    );
    let seen = watch_failures(
        connector,
        &settings.queues.failed,
        signal,
        idle_exit.map(Duration::from_secs),
        print_report,
    )
    .await?;

    println!("{} {} failure report(s)", style("✓").green(), seen);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobId;
    use crate::transport::{Envelope, MemoryBroker};

    #[tokio::test]
    async fn test_watch_failures_acknowledges_everything() {
        let broker = MemoryBroker::new();
        let report = FailureReport::new(JobId::new(42), "typeset", "compiler missing");
        broker.publish(&Envelope::encode("failed", &report).unwrap());
        broker.publish(&Envelope {
            queue: "failed".to_string(),
            content_type: "text/plain".to_string(),
            body: b"garbage".to_vec(),
            persistent: true,
        });

        let (_trigger, signal) = shutdown::channel();
        let mut reports = Vec::new();
        let seen = watch_failures(
            Arc::new(broker.connector()),
            "failed",
            signal,
            Some(Duration::from_millis(50)),
            |r| reports.push(r.clone()),
        )
        .await
        .unwrap();

        assert_eq!(seen, 1);
        assert_eq!(reports, vec![report]);
        assert_eq!(broker.depth("failed"), 0);
        assert_eq!(broker.unacked_count(), 0);
    }
}
