//! Result tickets for judged submissions.
//!
//! A ticket travels inside a [`Job`] with [`PayloadKind::Ticket`], binary
//! encoded, and is turned into a LaTeX page by the ticket stage.

use serde::{Deserialize, Serialize};

use super::{Computer, IdName, Job, JobId, JobMetadata, JobOrigin, PayloadKind};
use crate::transport::{self, TransportError, WireFormat, WireMessage};

/// Problem label (`A`, `B`, ...) and title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub name: String,
}

/// How one attempt was judged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    CompilationError,
    /// First failing test, or `ACCEPTED` with no test.
    Acm { result: String, test: Option<u32> },
    /// School scoring counts passed tests instead of stopping at the first failure.
    School { taken: u32, passed: u32 },
    /// Compiled, but no failing test was recorded and not every test passed.
    Undecided,
}

impl Verdict {
    /// Line shown in the ticket's result table.
    pub fn text(&self) -> String {
        match self {
            Self::CompilationError => "Compilation error".to_string(),
            Self::Acm {
                result,
                test: Some(test),
            } => format!("{} on test {}", result, test),
            Self::Acm { result, test: None } => result.clone(),
            Self::School { taken, passed } if taken == passed => "ACCEPTED".to_string(),
            Self::School { taken, passed } => format!("Not accepted ({} / {})", passed, taken),
            Self::Undecided => String::new(),
        }
    }
}

/// One attempt at the problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSubmit {
    /// 1 for the team's first attempt at the problem.
    pub number: u32,
    /// Seconds between contest start and arrival.
    pub arrived: u64,
    pub verdict: Verdict,
}

/// Everything printed on a result ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub submit_id: i64,
    pub printer: String,
    pub computer: Computer,
    pub area: IdName,
    pub contest: IdName,
    /// Display name, with the team number already appended.
    pub team: IdName,
    pub problem: Problem,
    /// When the submission was last judged, unix milliseconds.
    pub judged_at: i64,
    /// The judged submission first, then earlier attempts newest first.
    pub submits: Vec<TicketSubmit>,
}

impl WireMessage for Ticket {
    const FORMAT: WireFormat = WireFormat::Binary;
}

impl Ticket {
    /// Wrap the ticket in a job for the ticket stage.
    pub fn to_job(&self) -> Result<Job, TransportError> {
        Ok(Job {
            job_id: JobId::new(self.submit_id),
            origin: JobOrigin::Ticket,
            printer: self.printer.clone(),
            kind: PayloadKind::Ticket,
            payload: transport::encode(self)?,
            metadata: JobMetadata {
                filename: format!("ticket-{}", self.submit_id),
                contest: self.contest.clone(),
                team: self.team.clone(),
                computer: self.computer.clone(),
                area: self.area.clone(),
                charset: "utf-8".to_string(),
                submitted_at: self.judged_at,
            },
            page_count: None,
        })
    }
}

/// Format an offset the way contest clocks show it: `1h2m3s`, `5m0s`, `0s`.
pub fn format_offset(seconds: u64) -> String {
    let (h, m, s) = (seconds / 3600, seconds / 60 % 60, seconds % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_text() {
        assert_eq!(Verdict::CompilationError.text(), "Compilation error");
        assert_eq!(
            Verdict::Acm {
                result: "Wrong answer".to_string(),
                test: Some(4)
            }
            .text(),
            "Wrong answer on test 4"
        );
        assert_eq!(
            Verdict::Acm {
                result: "ACCEPTED".to_string(),
                test: None
            }
            .text(),
            "ACCEPTED"
        );
        assert_eq!(Verdict::School { taken: 10, passed: 10 }.text(), "ACCEPTED");
        assert_eq!(
            Verdict::School { taken: 10, passed: 7 }.text(),
            "Not accepted (7 / 10)"
        );
        assert_eq!(Verdict::Undecided.text(), "");
    }

    #[test]
    fn test_format_offset() {
        assert_eq!(format_offset(0), "0s");
        assert_eq!(format_offset(59), "59s");
        assert_eq!(format_offset(300), "5m0s");
        assert_eq!(format_offset(3600), "1h0m0s");
        assert_eq!(format_offset(3723), "1h2m3s");
    }

    #[test]
    fn test_to_job_carries_ticket() {
        let ticket = Ticket {
            submit_id: 17,
            printer: "hall-a".to_string(),
            computer: Computer::default(),
            area: IdName::new(1, "Hall A"),
            contest: IdName::new(7, "Finals"),
            team: IdName::new(3, "Lyceum 2 #4"),
            problem: Problem {
                id: "B".to_string(),
                name: "Bridges".to_string(),
            },
            judged_at: 1_700_000_000_000,
            submits: vec![TicketSubmit {
                number: 1,
                arrived: 600,
                verdict: Verdict::CompilationError,
            }],
        };

        let job = ticket.to_job().unwrap();
        assert_eq!(job.job_id, JobId::new(17));
        assert_eq!(job.origin, JobOrigin::Ticket);
        assert_eq!(job.kind, PayloadKind::Ticket);
        assert_eq!(job.metadata.team.name, "Lyceum 2 #4");
        assert_eq!(transport::decode::<Ticket>(&job.payload).unwrap(), ticket);
    }
}
