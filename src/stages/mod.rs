//! Pipeline stage chain.
//!
//! Four relays wired source -> tex -> dvi -> postscript -> print sink, plus
//! a ticket relay feeding result tickets into the tex queue. Each stage works
//! in its own directory, naming files after a stage-local id derived from
//! the job id (`s-42`, `t-42`, `t-k17` for a ticket, ...).

pub mod command;
pub mod highlight;
pub mod languages;
pub mod print;
pub mod render;
pub mod tex;
pub mod ticket;
pub mod typeset;

pub use command::ToolRunner;
pub use highlight::HighlightStage;
pub use languages::{LanguageEntry, LanguageMap};
pub use print::PrintStage;
pub use render::RenderStage;
pub use ticket::TicketStage;
pub use typeset::TypesetStage;

use std::path::{Path, PathBuf};

use crate::config::QueueConfig;
use crate::models::{Job, PayloadKind, StageLocalId};
use crate::relay::{RelayRoute, TransformError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum StageKind {
    /// Source text to highlighted LaTeX.
    Highlight,
    /// LaTeX to DVI.
    Typeset,
    /// DVI to PostScript.
    Render,
    /// PostScript to the printer.
    Print,
    /// Result ticket to LaTeX, joining the chain at the typeset stage.
    Ticket,
}

impl StageKind {
    pub const ALL: [StageKind; 5] = [
        StageKind::Highlight,
        StageKind::Typeset,
        StageKind::Render,
        StageKind::Print,
        StageKind::Ticket,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Highlight => "highlight",
            Self::Typeset => "typeset",
            Self::Render => "render",
            Self::Print => "print",
            Self::Ticket => "ticket",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "highlight" => Some(Self::Highlight),
            "typeset" => Some(Self::Typeset),
            "render" => Some(Self::Render),
            "print" => Some(Self::Print),
            "ticket" => Some(Self::Ticket),
            _ => None,
        }
    }

    /// Prefix of the stage-local id.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Highlight => "s",
            Self::Typeset => "t",
            Self::Render => "r",
            Self::Print => "p",
            Self::Ticket => "v",
        }
    }

    /// Payload kind this stage accepts.
    pub fn input_kind(&self) -> PayloadKind {
        match self {
            Self::Highlight => PayloadKind::Source,
            Self::Typeset => PayloadKind::Tex,
            Self::Render => PayloadKind::Dvi,
            Self::Print => PayloadKind::PostScript,
            Self::Ticket => PayloadKind::Ticket,
        }
    }

    pub fn route(&self, queues: &QueueConfig) -> RelayRoute {
        let (source, destination) = match self {
            Self::Highlight => (&queues.source, &queues.tex),
            Self::Typeset => (&queues.tex, &queues.dvi),
            Self::Render => (&queues.dvi, &queues.postscript),
            Self::Print => (&queues.postscript, &queues.finished),
            Self::Ticket => (&queues.tickets, &queues.tex),
        };
        RelayRoute::new(source.clone(), Some(destination.clone()), queues.failed.clone())
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject a job whose payload isn't what `stage` consumes.
fn expect_input(job: &Job, stage: StageKind) -> Result<(), TransformError> {
    let expected = stage.input_kind();
    if job.kind == expected {
        Ok(())
    } else {
        Err(TransformError::UnexpectedPayload {
            expected: expected.as_str().to_string(),
            found: job.kind.as_str().to_string(),
        })
    }
}

/// Create (or reuse) the per-job directory under `workdir`.
async fn job_dir(workdir: &Path, id: &StageLocalId) -> Result<PathBuf, TransformError> {
    let dir = workdir.join(id.as_str());
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}

/// Read a file the tool was expected to produce.
async fn read_output(path: &Path) -> Result<Vec<u8>, TransformError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(TransformError::MissingOutput(
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Test doubles for the external tools.
#[cfg(all(test, unix))]
pub(crate) mod fake_tools {
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Write an executable shell script and return its path.
    pub fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }
}
