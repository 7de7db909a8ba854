//! Print job model shared by every pipeline stage.
//!
//! A job keeps one logical identity (`JobId`, the source table primary key)
//! for its whole life. Stages re-type the payload as it moves down the
//! chain and derive a stage-local display id for their working files, but
//! correlation and failure reports always use the `JobId`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::{WireFormat, WireMessage};

/// Logical job identity, assigned once at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Table a job was read from. Ids are unique only within one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOrigin {
    /// A source file submitted for printing.
    #[default]
    Submission,
    /// The result ticket of a judged submission.
    Ticket,
}

impl JobOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submission => "job",
            Self::Ticket => "ticket",
        }
    }
}

impl fmt::Display for JobOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-scoped display id such as `s-42`, or `t-k17` for a ticket.
///
/// Only used to name files at the transform boundary; not a join key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLocalId(String);

impl StageLocalId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name inside the stage's working directory, e.g. `s-42-hl.tex`.
    pub fn file(&self, suffix: &str) -> String {
        format!("{}{}", self.0, suffix)
    }
}

impl fmt::Display for StageLocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the payload bytes of a job are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Raw submitted source text.
    Source,
    /// Highlighted LaTeX document.
    Tex,
    /// Compiled device-independent document.
    Dvi,
    /// Print-ready PostScript sized to the physical page.
    PostScript,
    /// A judged submission with its earlier attempts, encoded as a
    /// [`Ticket`](crate::models::Ticket).
    Ticket,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Tex => "tex",
            Self::Dvi => "dvi",
            Self::PostScript => "post_script",
            Self::Ticket => "ticket",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "source" => Some(Self::Source),
            "tex" => Some(Self::Tex),
            "dvi" => Some(Self::Dvi),
            "post_script" => Some(Self::PostScript),
            "ticket" => Some(Self::Ticket),
            _ => None,
        }
    }
}

/// An `(id, name)` pair for owning entities (contest, team, area).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdName {
    pub id: i64,
    pub name: String,
}

impl IdName {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// The workstation a job was submitted from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Computer {
    pub id: String,
    pub name: String,
}

/// Context needed to render the payload downstream.
///
/// Produced by the ingesting stage. Later stages only apply cosmetic
/// escaping in place.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub filename: String,
    pub contest: IdName,
    pub team: IdName,
    pub computer: Computer,
    pub area: IdName,
    /// Character encoding of the submitted source.
    pub charset: String,
    /// Arrival time, unix milliseconds.
    pub submitted_at: i64,
}

/// The logical unit flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub origin: JobOrigin,
    /// Destination printer, carried unchanged through every stage.
    pub printer: String,
    pub kind: PayloadKind,
    pub payload: Vec<u8>,
    pub metadata: JobMetadata,
    /// Set once the document has been compiled.
    pub page_count: Option<u32>,
}

impl WireMessage for Job {
    const FORMAT: WireFormat = WireFormat::Binary;
}

impl Job {
    /// Create a freshly ingested source job.
    pub fn source(
        job_id: JobId,
        printer: impl Into<String>,
        payload: Vec<u8>,
        metadata: JobMetadata,
    ) -> Self {
        Self {
            job_id,
            origin: JobOrigin::Submission,
            printer: printer.into(),
            kind: PayloadKind::Source,
            payload,
            metadata,
            page_count: None,
        }
    }

    /// Re-type the job for the next stage, keeping identity and metadata.
    pub fn with_payload(self, kind: PayloadKind, payload: Vec<u8>) -> Self {
        Self {
            kind,
            payload,
            ..self
        }
    }

    pub fn with_page_count(mut self, pages: u32) -> Self {
        self.page_count = Some(pages);
        self
    }

    /// Derive the display id a stage uses for its directory and file names.
    pub fn stage_local(&self, tag: &str) -> StageLocalId {
        match self.origin {
            JobOrigin::Submission => StageLocalId(format!("{}-{}", tag, self.job_id)),
            JobOrigin::Ticket => StageLocalId(format!("{}-k{}", tag, self.job_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{decode, Envelope, BINARY_CONTENT_TYPE};

    fn sample() -> Job {
        Job::source(
            JobId::new(42),
            "lab-1",
            b"print(1)".to_vec(),
            JobMetadata {
                filename: "a.py".to_string(),
                charset: "utf-8".to_string(),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_stage_local_id_keeps_identity() {
        let job = sample();
        assert_eq!(job.stage_local("s").as_str(), "s-42");
        assert_eq!(job.stage_local("t").file(".tex"), "t-42.tex");
        assert_eq!(job.job_id.get(), 42);
    }

    #[test]
    fn test_ticket_ids_do_not_collide_with_jobs() {
        let mut ticket = sample();
        ticket.origin = JobOrigin::Ticket;
        assert_eq!(ticket.stage_local("t").as_str(), "t-k42");
        assert_ne!(ticket.stage_local("t"), sample().stage_local("t"));
        assert_eq!(ticket.origin.to_string(), "ticket");
    }

    #[test]
    fn test_payload_travels_as_raw_bytes() {
        let envelope = Envelope::encode("q", &sample()).unwrap();
        assert_eq!(envelope.content_type, BINARY_CONTENT_TYPE);
        assert!(envelope
            .body
            .windows(b"print(1)".len())
            .any(|w| w == b"print(1)"));

        let job: Job = decode(&envelope.body).unwrap();
        assert_eq!(job, sample());
        assert_eq!(job.page_count, None);
    }

    #[test]
    fn test_with_payload_retypes_job() {
        let job = sample().with_payload(PayloadKind::Tex, b"\\documentclass".to_vec());
        assert_eq!(job.kind, PayloadKind::Tex);
        assert_eq!(job.job_id, JobId::new(42));
        assert_eq!(job.printer, "lab-1");
        assert_eq!(job.metadata.filename, "a.py");
    }

    #[test]
    fn test_rejects_truncated_body() {
        let body = Envelope::encode("q", &sample().with_page_count(3)).unwrap().body;
        assert!(decode::<Job>(&body[..body.len() - 1]).is_err());
        assert!(decode::<Job>(br#"{"job_id":1}"#).is_err());
    }

    #[test]
    fn test_payload_kind_str_roundtrip() {
        for kind in [
            PayloadKind::Source,
            PayloadKind::Tex,
            PayloadKind::Dvi,
            PayloadKind::PostScript,
            PayloadKind::Ticket,
        ] {
            assert_eq!(PayloadKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(PayloadKind::from_str("pdf"), None);
    }
}
