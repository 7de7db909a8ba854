//! Durable-source poller.
//!
//! Turns eligible rows of the job table into messages on the first queue.
//! A row is claimed only after its publish returned success, so a crash in
//! between causes at most a duplicate publish, never a lost one.
//!
//! The poller owns its broker connection. A send that fails at the
//! connection level drops it and the next attempt reconnects; a publish the
//! broker refuses is retried on the same connection. Attempts are spaced by
//! a fixed backoff.

mod source;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Job, JobId};
use crate::shutdown::{self, ShutdownSignal};
use crate::transport::{Connection, Connector, Envelope, TransportError};

#[derive(Debug, Error)]
pub enum PollerError {
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("Shutdown requested")]
    Shutdown,
}

/// A row ready for publication, with the `modified_at` seen when it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingJob {
    pub job: Job,
    pub observed_modified_at: i64,
}

/// Where the poller reads rows from and records claims.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Rows that are unclaimed or modified since their last claim.
    async fn fetch_eligible(&self) -> Result<Vec<PendingJob>, PollerError>;

    /// Record that the row was published as of `observed_modified_at`.
    async fn mark_claimed(&self, id: JobId, observed_modified_at: i64) -> Result<(), PollerError>;
}

/// How hard to try publishing a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    /// `None` retries until shutdown.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(15),
            max_attempts: None,
        }
    }
}

/// Result of one pass over the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub eligible: usize,
    pub published: usize,
    /// Rows left unclaimed because their publish failed.
    pub unsent: usize,
    /// Rows published whose claim could not be recorded. They are published
    /// again on a later scan.
    pub claim_failed: usize,
}

pub struct Poller<S: JobSource> {
    source: S,
    connector: Arc<dyn Connector>,
    queue: String,
    retry: RetryPolicy,
    conn: Option<Box<dyn Connection>>,
    shutdown: ShutdownSignal,
    store_unreachable: bool,
}

impl<S: JobSource> Poller<S> {
    pub fn new(source: S, connector: Arc<dyn Connector>, queue: impl Into<String>) -> Self {
        let (_, never) = shutdown::channel();
        Self {
            source,
            connector,
            queue: queue.into(),
            retry: RetryPolicy::default(),
            conn: None,
            shutdown: never,
            store_unreachable: false,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Interrupt retries and the polling loop when `signal` fires.
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = signal;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Publish every eligible row once, claiming each after its send succeeds.
    pub async fn scan(&mut self) -> Result<ScanStats, PollerError> {
        let pending = match self.source.fetch_eligible().await {
            Ok(pending) => {
                if self.store_unreachable {
                    tracing::info!("Job store reachable again");
                    self.store_unreachable = false;
                }
                pending
            }
            Err(e) => {
                if self.store_unreachable {
                    tracing::debug!(error = %e, "Job store still unreachable");
                } else {
                    tracing::error!(error = %e, "Job store unreachable; will retry next scan");
                    self.store_unreachable = true;
                }
                return Err(e);
            }
        };

        let mut stats = ScanStats {
            eligible: pending.len(),
            ..Default::default()
        };

        for PendingJob {
            job,
            observed_modified_at,
        } in pending
        {
            let envelope = Envelope::encode(&self.queue, &job)?;
            match self.send_with_retry(&envelope).await {
                Ok(()) => {
                    stats.published += 1;
                    match self
                        .source
                        .mark_claimed(job.job_id, observed_modified_at)
                        .await
                    {
                        Ok(()) => tracing::info!(
                            job_id = %job.job_id,
                            printer = %job.printer,
                            "Published {}",
                            job.metadata.filename
                        ),
                        Err(e) => {
                            tracing::warn!(
                                job_id = %job.job_id,
                                error = %e,
                                "Published but the claim was not recorded; row stays eligible"
                            );
                            stats.claim_failed += 1;
                        }
                    }
                }
                Err(PollerError::Shutdown) => return Err(PollerError::Shutdown),
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, error = %e, "Leaving row unclaimed");
                    stats.unsent += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Send `envelope`, reconnecting and retrying after a fixed backoff.
    pub async fn send_with_retry(&mut self, envelope: &Envelope) -> Result<(), PollerError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match self.try_send(envelope).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let connection_lost = err.is_connection_level();
            if connection_lost {
                // Force a reconnect on the next attempt.
                self.conn = None;
            }

            if let Some(max) = self.retry.max_attempts {
                if attempt >= max {
                    return Err(PollerError::RetriesExhausted {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
            }

            let backoff = self.retry.backoff;
            if connection_lost {
                tracing::warn!(
                    attempt,
                    error = %err,
                    "Publish to {} failed; reconnecting in {:?}",
                    envelope.queue,
                    backoff
                );
            } else {
                tracing::warn!(
                    attempt,
                    error = %err,
                    "Broker refused publish to {}; retrying in {:?}",
                    envelope.queue,
                    backoff
                );
            }
            tokio::select! {
                _ = shutdown::requested(&mut self.shutdown) => return Err(PollerError::Shutdown),
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    }

    async fn try_send(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                let conn = self.connector.connect().await?;
                tracing::info!("Connected to {}", self.connector.describe());
                conn
            }
        };
        self.conn.insert(conn).send(envelope).await
    }

    /// Scan on a fixed interval until shutdown.
    pub async fn run(&mut self, interval: Duration) {
        tracing::info!(
            "Polling every {}s, publishing to {}",
            interval.as_secs(),
            self.queue
        );

        while !shutdown::is_requested(&self.shutdown) {
            match self.scan().await {
                Ok(stats) if stats.claim_failed > 0 => tracing::warn!(
                    queue = %self.queue,
                    published = stats.published,
                    unsent = stats.unsent,
                    claim_failed = stats.claim_failed,
                    "Scan complete; some claims were not recorded"
                ),
                Ok(stats) if stats.eligible > 0 => tracing::info!(
                    queue = %self.queue,
                    published = stats.published,
                    unsent = stats.unsent,
                    "Scan complete"
                ),
                Ok(_) => tracing::debug!("Nothing to publish"),
                Err(PollerError::Shutdown) => break,
                // fetch failures are reported by scan itself
                Err(PollerError::Database(e)) if self.store_unreachable => {
                    tracing::debug!(error = %e, "Scan skipped")
                }
                Err(e) => tracing::warn!(error = %e, "Scan failed"),
            }

            tokio::select! {
                _ = shutdown::requested(&mut self.shutdown) => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        tracing::info!("Poller for {} stopped", self.queue);
    }
}
