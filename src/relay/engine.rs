//! Consume-transform-produce-acknowledge loop.

use std::sync::Arc;
use std::time::Duration;

use crate::models::{FailureReport, Job, JobId, JobOrigin};
use crate::shutdown::{self, ShutdownSignal};
use crate::transport::{Connection, Connector, Delivery, Envelope};

use super::{Outcome, RelayError, RelayRoute, RelayStats, Transform, TransformError};

/// Default pause before reconnecting after a session ends.
const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_secs(15);

/// A single relay instance: one in-flight delivery at a time.
pub struct Relay<T: Transform> {
    connector: Arc<dyn Connector>,
    route: RelayRoute,
    transform: T,
    timeout: Option<Duration>,
    reconnect_backoff: Duration,
}

enum Processed<O> {
    Done(Result<O, TransformError>),
    Interrupted,
}

impl<T: Transform> Relay<T> {
    pub fn new(connector: Arc<dyn Connector>, route: RelayRoute, transform: T) -> Self {
        Self {
            connector,
            route,
            transform,
            timeout: None,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
        }
    }

    /// Fail any transform that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Keep sessions running until shutdown, reconnecting after a fixed backoff.
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> RelayStats {
        let mut stats = RelayStats::default();

        while !shutdown::is_requested(&shutdown) {
            match self.run_session(&mut shutdown, &mut stats).await {
                Ok(()) => tracing::debug!(
                    stage = self.transform.name(),
                    queue = %self.route.source,
                    "Relay session ended"
                ),
                Err(e) if e.is_connection_level() => tracing::warn!(
                    stage = self.transform.name(),
                    queue = %self.route.source,
                    error = %e,
                    "Broker connection lost; reconnecting in {:?}",
                    self.reconnect_backoff
                ),
                Err(e) => tracing::error!(
                    stage = self.transform.name(),
                    queue = %self.route.source,
                    error = %e,
                    "Broker refused a relay operation; reconnecting in {:?}",
                    self.reconnect_backoff
                ),
            }

            if shutdown::is_requested(&shutdown) {
                break;
            }
            tokio::select! {
                _ = shutdown::requested(&mut shutdown) => break,
                _ = tokio::time::sleep(self.reconnect_backoff) => {}
            }
        }

        tracing::info!(
            stage = self.transform.name(),
            handled = stats.handled(),
            forwarded = stats.forwarded,
            consumed = stats.consumed,
            failed = stats.failed,
            dropped = stats.dropped,
            rejected = stats.rejected,
            requeued = stats.requeued,
            "Relay stopped"
        );
        stats
    }

    /// Connect, subscribe and process deliveries until the subscription
    /// ends, shutdown is requested, or the connection fails.
    ///
    /// The connection is owned by this call; returning drops it, which hands
    /// any unacknowledged delivery back to the broker.
    pub async fn run_session(
        &self,
        shutdown: &mut ShutdownSignal,
        stats: &mut RelayStats,
    ) -> Result<(), RelayError> {
        let mut conn = self.connector.connect().await?;
        let mut subscription = conn.subscribe(&self.route.source).await?;
        tracing::info!(
            stage = self.transform.name(),
            "Relaying {} -> {}",
            self.route.source,
            self.route.destination.as_deref().unwrap_or("(sink)")
        );

        loop {
            let delivery = tokio::select! {
                biased;
                _ = shutdown::requested(shutdown) => return Ok(()),
                next = subscription.next() => match next? {
                    Some(delivery) => delivery,
                    None => return Ok(()),
                },
            };

            let outcome = self.handle(conn.as_mut(), &delivery, shutdown).await?;
            stats.record(outcome);
            if outcome == Outcome::Requeued {
                return Ok(());
            }
        }
    }

    /// Process one delivery through to acknowledgement.
    pub async fn handle(
        &self,
        conn: &mut dyn Connection,
        delivery: &Delivery,
        shutdown: &mut ShutdownSignal,
    ) -> Result<Outcome, RelayError> {
        let job: Job = match delivery.decode() {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(
                    queue = %delivery.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %e,
                    "Dropping message that is not a job"
                );
                conn.acknowledge(delivery).await?;
                return Ok(Outcome::Dropped);
            }
        };

        let (job_id, origin) = (job.job_id, job.origin);
        tracing::info!(
            job_id = %job_id,
            %origin,
            stage = self.transform.name(),
            redelivered = delivery.redelivered,
            "Processing {}",
            job.metadata.filename
        );

        let processed = tokio::select! {
            biased;
            _ = shutdown::requested(shutdown) => Processed::Interrupted,
            result = self.apply(job) => Processed::Done(result),
        };

        match processed {
            Processed::Interrupted => {
                tracing::info!(job_id = %job_id, "Shutdown during transform; requeueing");
                conn.negative_acknowledge(delivery).await?;
                Ok(Outcome::Requeued)
            }
            Processed::Done(Ok(output)) => {
                self.forward(conn, delivery, job_id, origin, &output).await
            }
            Processed::Done(Err(err)) => {
                self.report_failure(conn, delivery, job_id, origin, &err).await
            }
        }
    }

    async fn apply(&self, job: Job) -> Result<T::Output, TransformError> {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.transform.apply(job))
                .await
                .map_err(|_| TransformError::TimedOut(limit))?,
            None => self.transform.apply(job).await,
        }
    }

    /// Publish the result and acknowledge the input in one transaction.
    ///
    /// A refusal on a live connection returns the input to its queue and
    /// keeps the session; a lost connection ends it.
    async fn forward(
        &self,
        conn: &mut dyn Connection,
        delivery: &Delivery,
        job_id: JobId,
        origin: JobOrigin,
        output: &T::Output,
    ) -> Result<Outcome, RelayError> {
        let Some(destination) = self.route.destination.as_deref() else {
            conn.acknowledge(delivery).await?;
            tracing::info!(job_id = %job_id, stage = self.transform.name(), "Consumed");
            return Ok(Outcome::Consumed);
        };

        let envelope = match Envelope::encode(destination, output) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = TransformError::Encode(e.to_string());
                return self.report_failure(conn, delivery, job_id, origin, &err).await;
            }
        };

        let mut tx = conn.begin_transaction().await?;
        let committed = async {
            tx.send(&envelope).await?;
            tx.acknowledge(delivery).await?;
            tx.commit().await
        }
        .await;

        if let Err(e) = committed {
            if let Err(abort_err) = tx.abort().await {
                tracing::debug!(job_id = %job_id, error = %abort_err, "Abort after failed commit also failed");
            }
            if e.is_connection_level() {
                return Err(e.into());
            }
            tracing::warn!(
                job_id = %job_id,
                stage = self.transform.name(),
                error = %e,
                "Broker refused forward to {}; returning job to {}",
                destination,
                self.route.source
            );
            conn.negative_acknowledge(delivery).await?;
            return Ok(Outcome::Rejected);
        }

        tracing::info!(job_id = %job_id, stage = self.transform.name(), "Forwarded to {}", destination);
        Ok(Outcome::Forwarded)
    }

    /// Best-effort failure report, then acknowledge regardless.
    async fn report_failure(
        &self,
        conn: &mut dyn Connection,
        delivery: &Delivery,
        job_id: JobId,
        origin: JobOrigin,
        err: &TransformError,
    ) -> Result<Outcome, RelayError> {
        tracing::warn!(
            job_id = %job_id,
            stage = self.transform.name(),
            error = %err,
            "Transform failed"
        );

        let report = FailureReport::new(job_id, self.transform.name(), err.to_string())
            .with_origin(origin);
        match Envelope::encode(&self.route.failure, &report) {
            Ok(envelope) => {
                if let Err(e) = conn.send(&envelope).await {
                    tracing::error!(
                        job_id = %job_id,
                        error = %e,
                        "Failed to publish failure report to {}",
                        self.route.failure
                    );
                }
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to encode failure report"),
        }

        conn.acknowledge(delivery).await?;
        Ok(Outcome::Failed)
    }
}
