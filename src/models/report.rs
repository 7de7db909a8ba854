//! Records published outside the main job chain.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{JobId, JobOrigin};
use crate::transport::{WireFormat, WireMessage};

/// Terminal per-job error, routed to the failure queue.
///
/// Never retried by the relay; the operator (or a dead-letter consumer)
/// decides what to do with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub job_id: JobId,
    #[serde(default)]
    pub origin: JobOrigin,
    /// Stage that produced the report.
    #[serde(default)]
    pub stage: String,
    pub error_message: String,
    pub timestamp_seconds: i64,
}

impl WireMessage for FailureReport {
    const FORMAT: WireFormat = WireFormat::Json;
}

impl FailureReport {
    pub fn new(job_id: JobId, stage: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            job_id,
            origin: JobOrigin::default(),
            stage: stage.into(),
            error_message: error_message.into(),
            timestamp_seconds: Utc::now().timestamp(),
        }
    }

    pub fn with_origin(mut self, origin: JobOrigin) -> Self {
        self.origin = origin;
        self
    }
}

/// Short acknowledgment the print sink publishes to the reporting queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintCompletion {
    pub job_id: JobId,
    #[serde(default)]
    pub origin: JobOrigin,
    pub printer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    /// Unix seconds.
    pub printed_at: i64,
}

impl WireMessage for PrintCompletion {
    const FORMAT: WireFormat = WireFormat::Json;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_without_origin_reads_as_submission() {
        let report: FailureReport = serde_json::from_str(
            r#"{"job_id":5,"stage":"typeset","error_message":"boom","timestamp_seconds":0}"#,
        )
        .unwrap();
        assert_eq!(report.origin, JobOrigin::Submission);

        let ticket = FailureReport::new(JobId::new(5), "ticket", "boom").with_origin(JobOrigin::Ticket);
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["origin"], "ticket");
    }
}
