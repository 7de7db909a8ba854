//! Result ticket to LaTeX.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};

use super::tex::tex_escape;
use super::{expect_input, job_dir, StageKind};
use crate::config::Settings;
use crate::models::{format_offset, Job, PayloadKind, Ticket};
use crate::relay::{Transform, TransformError};
use crate::transport;

const TICKET_TEMPLATE: &str = r"\documentclass[12pt,a4paper,oneside]{article}
\usepackage[utf8]{inputenc}
\usepackage[english,russian]{babel}
\usepackage{latexsym}
\pagestyle{empty}
\begin{document}
\begin{center}
{\LARGE\textbf{Submission results}}\newline

\vspace{1cm}

{\LARGE\textbf{Team: <<team.name>> }}\newline
{\LARGE\textbf{Location: <<area.name>> - <<computer.name>>}}\newline
\vspace{1cm}
\begin{tabular}{|l|p{11cm}|}
\hline
Contest <<contest.id>> & <<contest.name>> \\
\hline
Submit ID & <<submit_id>> \\
\hline
Judge Time & <<judged_at>> \\
\hline
Team & <<team.id>> - <<team.name>> \\
\hline
Location & (<<area.id>>) <<area.name>> \\
\hline
Workstation & (<<computer.id>>) <<computer.name>> \\
\hline
Problem <<problem.id>> & <<problem.name>> \\
\hline
\end{tabular}

\vspace{1cm}

\begin{tabular}{|r|l|}
\hline
Time & Result \\
\hline
<<submits>>\hline
\end{tabular}
\end{center}
\end{document}
";

fn bold_if(first: bool, text: String) -> String {
    if first {
        format!(r"\textbf{{{}}}", text)
    } else {
        text
    }
}

/// Fill the ticket template. The judged submission's row is set in bold.
pub fn render_ticket(ticket: &Ticket) -> String {
    let judged_at = DateTime::from_timestamp_millis(ticket.judged_at)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_default();
    let submits: String = ticket
        .submits
        .iter()
        .enumerate()
        .map(|(index, submit)| {
            format!(
                "{} & {} \\\\\n",
                bold_if(index == 0, format_offset(submit.arrived)),
                bold_if(index == 0, tex_escape(&submit.verdict.text()))
            )
        })
        .collect();

    // submits last: verdict text comes from the judge
    let replacements = [
        ("<<team.id>>", ticket.team.id.to_string()),
        ("<<team.name>>", tex_escape(&ticket.team.name)),
        ("<<area.id>>", ticket.area.id.to_string()),
        ("<<area.name>>", tex_escape(&ticket.area.name)),
        ("<<computer.id>>", tex_escape(&ticket.computer.id)),
        ("<<computer.name>>", tex_escape(&ticket.computer.name)),
        ("<<contest.id>>", ticket.contest.id.to_string()),
        ("<<contest.name>>", tex_escape(&ticket.contest.name)),
        ("<<problem.id>>", tex_escape(&ticket.problem.id)),
        ("<<problem.name>>", tex_escape(&ticket.problem.name)),
        ("<<submit_id>>", ticket.submit_id.to_string()),
        ("<<judged_at>>", judged_at),
    ];

    let mut doc = TICKET_TEMPLATE.to_string();
    for (marker, value) in &replacements {
        doc = doc.replace(marker, value);
    }
    doc.replace("<<submits>>", &submits)
}

pub struct TicketStage {
    workdir: PathBuf,
}

impl TicketStage {
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.workdir(StageKind::Ticket))
    }
}

#[async_trait]
impl Transform for TicketStage {
    type Output = Job;

    fn name(&self) -> &str {
        StageKind::Ticket.as_str()
    }

    async fn apply(&self, job: Job) -> Result<Job, TransformError> {
        expect_input(&job, StageKind::Ticket)?;

        let ticket: Ticket = transport::decode(&job.payload)
            .map_err(|e| TransformError::Parse(format!("bad ticket payload: {}", e)))?;
        let doc = render_ticket(&ticket);

        // kept for reprinting by hand
        let id = job.stage_local(StageKind::Ticket.tag());
        let dir = job_dir(&self.workdir, &id).await?;
        tokio::fs::write(dir.join(id.file(".tex")), &doc).await?;

        tracing::info!(
            job_id = %job.job_id,
            attempts = ticket.submits.len(),
            "Rendered ticket for problem {}",
            ticket.problem.id
        );
        Ok(job.with_payload(PayloadKind::Tex, doc.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Computer, IdName, JobId, JobMetadata, JobOrigin, Problem, TicketSubmit, Verdict};

    fn ticket() -> Ticket {
        Ticket {
            submit_id: 17,
            printer: "hall-a".to_string(),
            computer: Computer {
                id: "10.0.0.12".to_string(),
                name: "A_12".to_string(),
            },
            area: IdName::new(1, "Hall A"),
            contest: IdName::new(7, "Finals"),
            team: IdName::new(3, "Lyceum 2 #4"),
            problem: Problem {
                id: "B".to_string(),
                name: "Bridges & Tunnels".to_string(),
            },
            judged_at: 1_700_000_000_000,
            submits: vec![
                TicketSubmit {
                    number: 2,
                    arrived: 3723,
                    verdict: Verdict::Acm {
                        result: "Wrong answer".to_string(),
                        test: Some(4),
                    },
                },
                TicketSubmit {
                    number: 1,
                    arrived: 300,
                    verdict: Verdict::CompilationError,
                },
            ],
        }
    }

    #[test]
    fn test_render_ticket() {
        let doc = render_ticket(&ticket());

        assert!(doc.contains(r"{\LARGE\textbf{Team: Lyceum 2 \#4 }}"));
        assert!(doc.contains(r"{\LARGE\textbf{Location: Hall A - A\_12}}"));
        assert!(doc.contains(r"Contest 7 & Finals \\"));
        assert!(doc.contains(r"Submit ID & 17 \\"));
        assert!(doc.contains(r"Judge Time & 2023-11-14T22:13:20Z \\"));
        assert!(doc.contains(r"Team & 3 - Lyceum 2 \#4 \\"));
        assert!(doc.contains(r"Problem B & Bridges \& Tunnels \\"));
        assert!(doc.contains(r"\textbf{1h2m3s} & \textbf{Wrong answer on test 4} \\"));
        assert!(doc.contains("5m0s & Compilation error \\\\\n\\hline\n\\end{tabular}"));
        assert!(!doc.contains("<<"));
    }

    #[tokio::test]
    async fn test_stage_emits_tex_job() {
        let work = tempfile::tempdir().unwrap();
        let stage = TicketStage::new(work.path().to_path_buf());

        let job = ticket().to_job().unwrap();
        let out = stage.apply(job).await.unwrap();

        assert_eq!(out.kind, PayloadKind::Tex);
        assert_eq!(out.job_id, JobId::new(17));
        assert_eq!(out.origin, JobOrigin::Ticket);
        assert!(String::from_utf8(out.payload).unwrap().starts_with(r"\documentclass"));
        assert!(work.path().join("v-k17").join("v-k17.tex").exists());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_a_parse_error() {
        let work = tempfile::tempdir().unwrap();
        let stage = TicketStage::new(work.path().to_path_buf());

        let job = Job::source(JobId::new(1), "hall-a", b"nope".to_vec(), JobMetadata::default())
            .with_payload(PayloadKind::Ticket, b"nope".to_vec());
        let err = stage.apply(job).await.unwrap_err();
        assert!(matches!(err, TransformError::Parse(_)));
    }
}
