//! Data models for printrelay.

mod job;
mod report;
mod ticket;

pub use job::{Computer, IdName, Job, JobId, JobMetadata, JobOrigin, PayloadKind, StageLocalId};
pub use report::{FailureReport, PrintCompletion};
pub use ticket::{format_offset, Problem, Ticket, TicketSubmit, Verdict};
