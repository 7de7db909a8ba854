//! Stage relay engine.
//!
//! A relay consumes one source queue, runs a [`Transform`] on each job and
//! then either forwards the result (transactionally with the
//! acknowledgement) or publishes a [`FailureReport`](crate::models::FailureReport)
//! and acknowledges anyway so a bad job can't block the queue.

mod engine;
mod error;

pub use engine::Relay;
pub use error::{RelayError, TransformError};

use async_trait::async_trait;

use crate::models::Job;
use crate::transport::WireMessage;

/// One pipeline step, applied to a decoded job.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Message published on success.
    type Output: WireMessage + Send + Sync;

    /// Stage name used in logs and failure reports.
    fn name(&self) -> &str;

    async fn apply(&self, job: Job) -> Result<Self::Output, TransformError>;
}

/// Queues a relay reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRoute {
    pub source: String,
    /// `None` for a sink that consumes without republishing.
    pub destination: Option<String>,
    pub failure: String,
}

impl RelayRoute {
    pub fn new(
        source: impl Into<String>,
        destination: Option<String>,
        failure: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination,
            failure: failure.into(),
        }
    }
}

/// What happened to a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Transformed, published downstream and acknowledged in one transaction.
    Forwarded,
    /// Transformed and acknowledged; the route has no destination.
    Consumed,
    /// Transform failed; report sent (best effort) and acknowledged.
    Failed,
    /// Body didn't decode as a job; acknowledged without a report.
    Dropped,
    /// The broker refused the forward on a live connection; returned to the
    /// queue for another attempt.
    Rejected,
    /// Shutdown interrupted processing; returned to the queue.
    Requeued,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded: u64,
    pub consumed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub rejected: u64,
    pub requeued: u64,
}

impl RelayStats {
    pub fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Forwarded => self.forwarded += 1,
            Outcome::Consumed => self.consumed += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Dropped => self.dropped += 1,
            Outcome::Rejected => self.rejected += 1,
            Outcome::Requeued => self.requeued += 1,
        }
    }

    /// Deliveries that left the input queue for good.
    pub fn handled(&self) -> u64 {
        self.forwarded + self.consumed + self.failed + self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handled_excludes_returned_deliveries() {
        let mut stats = RelayStats::default();
        for outcome in [
            Outcome::Forwarded,
            Outcome::Consumed,
            Outcome::Failed,
            Outcome::Dropped,
            Outcome::Rejected,
            Outcome::Requeued,
        ] {
            stats.record(outcome);
        }
        assert_eq!(stats.handled(), 4);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.requeued, 1);
    }
}
