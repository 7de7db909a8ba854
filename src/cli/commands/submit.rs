//! Submit and reprint commands.

use std::path::PathBuf;

use clap::Args;
use console::style;

use crate::cli::helpers::{open_initialized_repository, open_repository, open_ticket_repository};
use crate::config::Settings;
use crate::models::{Computer, IdName, JobId};
use crate::repository::PrintJobSubmission;

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Source file to print
    pub file: PathBuf,
    /// Destination printer
    #[arg(short, long)]
    pub printer: String,
    /// Filename shown on the printout (defaults to the file's name)
    #[arg(long)]
    pub name: Option<String>,
    /// Team display name
    #[arg(long, default_value = "")]
    pub team: String,
    #[arg(long, default_value = "0")]
    pub team_id: i64,
    /// Team number within its school, appended to the name when positive
    #[arg(long)]
    pub team_num: Option<i32>,
    /// Contest name
    #[arg(long, default_value = "")]
    pub contest: String,
    #[arg(long, default_value = "0")]
    pub contest_id: i64,
    /// Area (room) name
    #[arg(long, default_value = "")]
    pub area: String,
    #[arg(long, default_value = "0")]
    pub area_id: i64,
    /// Workstation name
    #[arg(long, default_value = "")]
    pub computer: String,
    /// Source encoding (default cp1251)
    #[arg(long)]
    pub charset: Option<String>,
}

impl SubmitArgs {
    fn into_submission(self, data: Vec<u8>) -> PrintJobSubmission {
        let filename = self.name.unwrap_or_else(|| {
            self.file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        PrintJobSubmission {
            filename,
            printer: self.printer,
            contest: IdName::new(self.contest_id, self.contest),
            team: IdName::new(self.team_id, self.team),
            team_num: self.team_num,
            computer: Computer {
                id: self.computer.clone(),
                name: self.computer,
            },
            area: IdName::new(self.area_id, self.area),
            charset: self.charset,
            data,
        }
    }
}

/// Store a file as a new print job.
pub async fn cmd_submit(settings: &Settings, args: SubmitArgs) -> anyhow::Result<()> {
    let data = tokio::fs::read(&args.file)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", args.file.display(), e))?;
    let repo = open_initialized_repository(settings).await?;

    let submission = args.into_submission(data);
    let id = repo.insert(&submission).await?;

    println!(
        "{} Queued job {} ({}, {} bytes) for printer {}",
        style("✓").green(),
        id,
        submission.filename,
        submission.data.len(),
        submission.printer
    );
    Ok(())
}

/// Re-arm a job, or a submission's ticket, so the poller publishes it again.
pub async fn cmd_reprint(settings: &Settings, id: i64, ticket: bool) -> anyhow::Result<()> {
    let (rearmed, what) = if ticket {
        (open_ticket_repository(settings).touch(JobId::new(id)).await?, "Ticket")
    } else {
        (open_repository(settings).touch(JobId::new(id)).await?, "Job")
    };
    if rearmed {
        println!("{} {} {} will be printed again", style("✓").green(), what, id);
        Ok(())
    } else {
        anyhow::bail!("No {} with id {}", what.to_lowercase(), id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(file: &str) -> SubmitArgs {
        SubmitArgs {
            file: PathBuf::from(file),
            printer: "hall-a".to_string(),
            name: None,
            team: "Ducks".to_string(),
            team_id: 3,
            team_num: Some(2),
            contest: String::new(),
            contest_id: 0,
            area: "Room 1".to_string(),
            area_id: 1,
            computer: "ws-12".to_string(),
            charset: None,
        }
    }

    #[test]
    fn test_submission_uses_file_name() {
        let submission = args("/home/team/sol.cpp").into_submission(b"int main(){}".to_vec());
        assert_eq!(submission.filename, "sol.cpp");
        assert_eq!(submission.team, IdName::new(3, "Ducks"));
        assert_eq!(submission.computer.name, "ws-12");
        assert_eq!(submission.charset, None);
    }

    #[test]
    fn test_submission_name_override() {
        let mut a = args("/tmp/x");
        a.name = Some("A.java".to_string());
        assert_eq!(a.into_submission(Vec::new()).filename, "A.java");
    }
}
