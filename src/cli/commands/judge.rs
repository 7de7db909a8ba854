//! Record judging results for ticket printing.

use clap::Args;
use console::style;

use crate::cli::helpers::open_initialized_ticket_repository;
use crate::config::Settings;
use crate::models::{Computer, IdName, Problem};
use crate::repository::JudgedSubmit;

#[derive(Args, Debug)]
pub struct JudgeArgs {
    /// Submission id assigned by the judge
    pub id: i64,
    /// Destination printer
    #[arg(short, long)]
    pub printer: String,
    /// Problem label (A, B, ...)
    #[arg(long)]
    pub problem: String,
    #[arg(long, default_value = "")]
    pub problem_name: String,
    /// Team display name
    #[arg(long, default_value = "")]
    pub team: String,
    #[arg(long, default_value = "0")]
    pub team_id: i64,
    /// Team number within its school, appended to the name when positive
    #[arg(long)]
    pub team_num: Option<i32>,
    #[arg(long, default_value = "")]
    pub contest: String,
    #[arg(long, default_value = "0")]
    pub contest_id: i64,
    #[arg(long, default_value = "")]
    pub area: String,
    #[arg(long, default_value = "0")]
    pub area_id: i64,
    /// Workstation name
    #[arg(long, default_value = "")]
    pub computer: String,
    /// Seconds since contest start
    #[arg(long, default_value = "0")]
    pub arrived: i64,
    /// The submission did not compile
    #[arg(long)]
    pub compile_error: bool,
    /// Score by passed tests instead of the first failure
    #[arg(long)]
    pub school_mode: bool,
    #[arg(long, default_value = "0")]
    pub taken: i32,
    #[arg(long, default_value = "0")]
    pub passed: i32,
    /// Result of the first failing test, e.g. "Wrong answer"
    #[arg(long, requires = "failed_test")]
    pub failed_result: Option<String>,
    #[arg(long, requires = "failed_result")]
    pub failed_test: Option<i32>,
}

impl JudgeArgs {
    fn into_submit(self) -> JudgedSubmit {
        JudgedSubmit {
            id: self.id,
            printer: self.printer,
            contest: IdName::new(self.contest_id, self.contest),
            team: IdName::new(self.team_id, self.team),
            team_num: self.team_num,
            problem: Problem {
                id: self.problem,
                name: self.problem_name,
            },
            computer: Computer {
                id: self.computer.clone(),
                name: self.computer,
            },
            area: IdName::new(self.area_id, self.area),
            arrived: self.arrived,
            compiled: !self.compile_error,
            school_mode: self.school_mode,
            tests_taken: self.taken,
            tests_passed: self.passed,
            failed: self.failed_result.zip(self.failed_test),
        }
    }
}

/// Store or update a judged submission so its ticket gets printed.
pub async fn cmd_judge(settings: &Settings, args: JudgeArgs) -> anyhow::Result<()> {
    let repo = open_initialized_ticket_repository(settings).await?;
    let submit = args.into_submit();
    let id = repo.record(&submit).await?;

    println!(
        "{} Ticket for submission {} (problem {}) queued for printer {}",
        style("✓").green(),
        id,
        submit.problem.id,
        submit.printer
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> JudgeArgs {
        JudgeArgs {
            id: 17,
            printer: "hall-a".to_string(),
            problem: "B".to_string(),
            problem_name: "Bridges".to_string(),
            team: "Ducks".to_string(),
            team_id: 3,
            team_num: Some(2),
            contest: String::new(),
            contest_id: 7,
            area: "Room 1".to_string(),
            area_id: 1,
            computer: "ws-12".to_string(),
            arrived: 600,
            compile_error: false,
            school_mode: false,
            taken: 0,
            passed: 0,
            failed_result: Some("Wrong answer".to_string()),
            failed_test: Some(4),
        }
    }

    #[test]
    fn test_submit_from_args() {
        let submit = args().into_submit();
        assert_eq!(submit.id, 17);
        assert!(submit.compiled);
        assert_eq!(submit.problem.id, "B");
        assert_eq!(submit.failed, Some(("Wrong answer".to_string(), 4)));
        assert_eq!(submit.computer.name, "ws-12");
    }

    #[test]
    fn test_compile_error_flag() {
        let mut a = args();
        a.compile_error = true;
        a.failed_result = None;
        a.failed_test = None;
        let submit = a.into_submit();
        assert!(!submit.compiled);
        assert_eq!(submit.failed, None);
    }
}
