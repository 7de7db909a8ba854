//! Judged submissions awaiting a result ticket.
//!
//! Same claim protocol as the print job table, keyed on the judging time: a
//! row is eligible while `printed_at` is NULL or older than `judged_at`, so
//! a re-judged submission gets a fresh ticket.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};

use super::diesel_models::{NewTicketSubmit, TicketSubmitFields, TicketSubmitRecord};
use super::diesel_pool::{AsyncSqlitePool, DieselError};
use super::util::team_display_name;
use crate::models::{Computer, IdName, JobId, Problem, Ticket, TicketSubmit, Verdict};
use crate::schema::ticket_submits;

const CREATE_TICKET_SUBMITS: &str = r#"
CREATE TABLE IF NOT EXISTS ticket_submits (
    id INTEGER PRIMARY KEY,
    printer TEXT NOT NULL,
    contest_id INTEGER NOT NULL DEFAULT 0,
    contest_name TEXT NOT NULL DEFAULT '',
    team_id INTEGER NOT NULL DEFAULT 0,
    team_name TEXT NOT NULL DEFAULT '',
    team_num INTEGER,
    problem_id TEXT NOT NULL DEFAULT '',
    problem_name TEXT NOT NULL DEFAULT '',
    computer_id TEXT NOT NULL DEFAULT '',
    computer_name TEXT NOT NULL DEFAULT '',
    area_id INTEGER NOT NULL DEFAULT 0,
    area_name TEXT NOT NULL DEFAULT '',
    arrived INTEGER NOT NULL DEFAULT 0,
    compiled BOOLEAN NOT NULL,
    school_mode BOOLEAN NOT NULL DEFAULT 0,
    tests_taken INTEGER NOT NULL DEFAULT 0,
    tests_passed INTEGER NOT NULL DEFAULT 0,
    failed_result TEXT,
    failed_test INTEGER,
    judged_at INTEGER NOT NULL,
    printed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_ticket_submits_claim ON ticket_submits (printed_at, judged_at);
CREATE INDEX IF NOT EXISTS idx_ticket_submits_attempts
    ON ticket_submits (contest_id, team_id, problem_id, id);
"#;

/// A judging result as reported by the judge.
#[derive(Debug, Clone, Default)]
pub struct JudgedSubmit {
    /// Submission id assigned by the judge.
    pub id: i64,
    pub printer: String,
    pub contest: IdName,
    pub team: IdName,
    pub team_num: Option<i32>,
    pub problem: Problem,
    pub computer: Computer,
    pub area: IdName,
    /// Seconds between contest start and arrival.
    pub arrived: i64,
    pub compiled: bool,
    pub school_mode: bool,
    pub tests_taken: i32,
    pub tests_passed: i32,
    /// Description and number of the first failing test.
    pub failed: Option<(String, i32)>,
}

fn count(n: i32) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

/// Verdict line for one stored attempt.
pub fn verdict(record: &TicketSubmitRecord) -> Verdict {
    if !record.compiled {
        return Verdict::CompilationError;
    }
    if record.school_mode {
        return Verdict::School {
            taken: count(record.tests_taken),
            passed: count(record.tests_passed),
        };
    }
    match record.failed_result {
        Some(ref result) => Verdict::Acm {
            result: result.clone(),
            test: record.failed_test.map(count),
        },
        None if record.tests_passed != 0 && record.tests_passed == record.tests_taken => {
            Verdict::Acm {
                result: "ACCEPTED".to_string(),
                test: None,
            }
        }
        None => Verdict::Undecided,
    }
}

fn attempt(record: &TicketSubmitRecord, number: usize) -> TicketSubmit {
    TicketSubmit {
        number: u32::try_from(number).unwrap_or(u32::MAX),
        arrived: u64::try_from(record.arrived).unwrap_or(0),
        verdict: verdict(record),
    }
}

#[derive(Clone)]
pub struct DieselTicketRepository {
    pool: AsyncSqlitePool,
}

impl DieselTicketRepository {
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(CREATE_TICKET_SUBMITS).await
    }

    /// Store a judging result. Judging an id again replaces the result and
    /// makes the submission eligible for a new ticket.
    pub async fn record(&self, submit: &JudgedSubmit) -> Result<JobId, DieselError> {
        let previous = self.get(JobId::new(submit.id)).await?;
        let mut conn = self.pool.get().await?;

        let now = Utc::now().timestamp_millis();
        let judged_at = match previous {
            Some(ref record) => now.max(record.judged_at + 1),
            None => now,
        };
        let (failed_result, failed_test) = match submit.failed {
            Some((ref result, test)) => (Some(result.as_str()), Some(test)),
            None => (None, None),
        };
        let fields = TicketSubmitFields {
            printer: &submit.printer,
            contest_id: submit.contest.id,
            contest_name: &submit.contest.name,
            team_id: submit.team.id,
            team_name: &submit.team.name,
            team_num: submit.team_num,
            problem_id: &submit.problem.id,
            problem_name: &submit.problem.name,
            computer_id: &submit.computer.id,
            computer_name: &submit.computer.name,
            area_id: submit.area.id,
            area_name: &submit.area.name,
            arrived: submit.arrived,
            compiled: submit.compiled,
            school_mode: submit.school_mode,
            tests_taken: submit.tests_taken,
            tests_passed: submit.tests_passed,
            failed_result,
            failed_test,
            judged_at,
        };

        if previous.is_some() {
            diesel::update(ticket_submits::table.find(submit.id))
                .set(&fields)
                .execute(&mut conn)
                .await?;
        } else {
            diesel::insert_into(ticket_submits::table)
                .values(NewTicketSubmit {
                    id: submit.id,
                    fields,
                })
                .execute(&mut conn)
                .await?;
        }
        Ok(JobId::new(submit.id))
    }

    pub async fn get(&self, id: JobId) -> Result<Option<TicketSubmitRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        ticket_submits::table
            .find(id.get())
            .select(TicketSubmitRecord::as_select())
            .first::<TicketSubmitRecord>(&mut conn)
            .await
            .optional()
    }

    /// Submissions without a ticket for their latest judging, oldest judging first.
    pub async fn get_eligible(&self) -> Result<Vec<TicketSubmitRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        ticket_submits::table
            .filter(
                ticket_submits::printed_at
                    .is_null()
                    .or(ticket_submits::printed_at
                        .assume_not_null()
                        .lt(ticket_submits::judged_at)),
            )
            .order((ticket_submits::judged_at.asc(), ticket_submits::id.asc()))
            .select(TicketSubmitRecord::as_select())
            .load::<TicketSubmitRecord>(&mut conn)
            .await
    }

    pub async fn count_eligible(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        ticket_submits::table
            .filter(
                ticket_submits::printed_at
                    .is_null()
                    .or(ticket_submits::printed_at
                        .assume_not_null()
                        .lt(ticket_submits::judged_at)),
            )
            .count()
            .get_result(&mut conn)
            .await
    }

    /// Earlier attempts by the same team at the same problem, oldest first.
    pub async fn earlier_attempts(
        &self,
        record: &TicketSubmitRecord,
    ) -> Result<Vec<TicketSubmitRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        ticket_submits::table
            .filter(ticket_submits::contest_id.eq(record.contest_id))
            .filter(ticket_submits::team_id.eq(record.team_id))
            .filter(ticket_submits::problem_id.eq(&record.problem_id))
            .filter(ticket_submits::id.lt(record.id))
            .order((ticket_submits::arrived.asc(), ticket_submits::id.asc()))
            .select(TicketSubmitRecord::as_select())
            .load::<TicketSubmitRecord>(&mut conn)
            .await
    }

    /// Assemble the ticket for `record`, including its earlier attempts.
    pub async fn ticket(&self, record: &TicketSubmitRecord) -> Result<Ticket, DieselError> {
        let earlier = self.earlier_attempts(record).await?;

        let mut submits = Vec::with_capacity(earlier.len() + 1);
        submits.push(attempt(record, earlier.len() + 1));
        submits.extend(
            earlier
                .iter()
                .enumerate()
                .rev()
                .map(|(index, previous)| attempt(previous, index + 1)),
        );

        Ok(Ticket {
            submit_id: record.id,
            printer: record.printer.clone(),
            computer: Computer {
                id: record.computer_id.clone(),
                name: record.computer_name.clone(),
            },
            area: IdName::new(record.area_id, record.area_name.clone()),
            contest: IdName::new(record.contest_id, record.contest_name.clone()),
            team: IdName::new(
                record.team_id,
                team_display_name(record.team_name.clone(), record.team_num),
            ),
            problem: Problem {
                id: record.problem_id.clone(),
                name: record.problem_name.clone(),
            },
            judged_at: record.judged_at,
            submits,
        })
    }

    /// Record that a ticket for the judging at `observed_judged_at` was published.
    pub async fn mark_printed(
        &self,
        id: JobId,
        observed_judged_at: i64,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(ticket_submits::table.find(id.get()))
            .set(ticket_submits::printed_at.eq(Some(observed_judged_at)))
            .execute(&mut conn)
            .await
    }

    /// Make the submission eligible for another ticket.
    pub async fn touch(&self, id: JobId) -> Result<bool, DieselError> {
        let Some(record) = self.get(id).await? else {
            return Ok(false);
        };
        let mut conn = self.pool.get().await?;
        let judged_at = Utc::now().timestamp_millis().max(record.judged_at + 1);

        let updated = diesel::update(ticket_submits::table.find(id.get()))
            .set(ticket_submits::judged_at.eq(judged_at))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::tempdir;

    pub(crate) async fn setup_ticket_repo() -> (DieselTicketRepository, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let repo = DieselTicketRepository::new(AsyncSqlitePool::from_path(&dir.path().join("t.db")));
        repo.init_schema().await.unwrap();
        (repo, dir)
    }

    pub(crate) fn judged(id: i64, arrived: i64) -> JudgedSubmit {
        JudgedSubmit {
            id,
            printer: "hall-a".to_string(),
            contest: IdName::new(7, "Finals"),
            team: IdName::new(3, "Lyceum 2"),
            team_num: Some(4),
            problem: Problem {
                id: "B".to_string(),
                name: "Bridges".to_string(),
            },
            computer: Computer {
                id: "10.0.0.12".to_string(),
                name: "A-12".to_string(),
            },
            area: IdName::new(1, "Hall A"),
            arrived,
            compiled: true,
            school_mode: false,
            tests_taken: 12,
            tests_passed: 12,
            failed: None,
        }
    }

    #[tokio::test]
    async fn test_ticket_lists_attempts_newest_first() {
        let (repo, _dir) = setup_ticket_repo().await;

        let mut first = judged(10, 300);
        first.compiled = false;
        repo.record(&first).await.unwrap();

        let mut second = judged(11, 900);
        second.failed = Some(("Wrong answer".to_string(), 3));
        repo.record(&second).await.unwrap();

        // another problem, not an earlier attempt
        let mut other = judged(12, 1000);
        other.problem.id = "C".to_string();
        repo.record(&other).await.unwrap();

        repo.record(&judged(13, 3723)).await.unwrap();

        let record = repo.get(JobId::new(13)).await.unwrap().unwrap();
        let ticket = repo.ticket(&record).await.unwrap();

        assert_eq!(ticket.submit_id, 13);
        assert_eq!(ticket.team.name, "Lyceum 2 #4");
        assert_eq!(ticket.problem.name, "Bridges");
        let lines: Vec<(u32, u64, String)> = ticket
            .submits
            .iter()
            .map(|s| (s.number, s.arrived, s.verdict.text()))
            .collect();
        assert_eq!(
            lines,
            vec![
                (3, 3723, "ACCEPTED".to_string()),
                (2, 900, "Wrong answer on test 3".to_string()),
                (1, 300, "Compilation error".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_verdict_rules() {
        let (repo, _dir) = setup_ticket_repo().await;

        let mut school = judged(1, 0);
        school.school_mode = true;
        school.tests_passed = 7;
        repo.record(&school).await.unwrap();

        let mut partial = judged(2, 0);
        partial.tests_passed = 5;
        repo.record(&partial).await.unwrap();

        let mut empty = judged(3, 0);
        empty.tests_taken = 0;
        empty.tests_passed = 0;
        repo.record(&empty).await.unwrap();

        let verdict_of = |id| {
            let repo = repo.clone();
            async move { verdict(&repo.get(JobId::new(id)).await.unwrap().unwrap()) }
        };
        assert_eq!(verdict_of(1).await, Verdict::School { taken: 12, passed: 7 });
        assert_eq!(verdict_of(2).await, Verdict::Undecided);
        assert_eq!(verdict_of(3).await, Verdict::Undecided);
    }

    #[tokio::test]
    async fn test_rejudge_rearms_printed_submit() {
        let (repo, _dir) = setup_ticket_repo().await;

        let id = repo.record(&judged(20, 60)).await.unwrap();
        assert_eq!(repo.count_eligible().await.unwrap(), 1);

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(repo.mark_printed(id, record.judged_at).await.unwrap(), 1);
        assert_eq!(repo.count_eligible().await.unwrap(), 0);

        let mut rejudged = judged(20, 60);
        rejudged.failed = Some(("Time limit exceeded".to_string(), 9));
        repo.record(&rejudged).await.unwrap();

        let rows = repo.get_eligible().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].judged_at > record.judged_at);
        assert_eq!(rows[0].failed_result.as_deref(), Some("Time limit exceeded"));
        assert_eq!(rows[0].failed_test, Some(9));
    }

    #[tokio::test]
    async fn test_touch_rearms_and_reports_missing() {
        let (repo, _dir) = setup_ticket_repo().await;

        let id = repo.record(&judged(5, 0)).await.unwrap();
        let record = repo.get(id).await.unwrap().unwrap();
        repo.mark_printed(id, record.judged_at).await.unwrap();

        assert!(repo.touch(id).await.unwrap());
        assert_eq!(repo.count_eligible().await.unwrap(), 1);
        assert!(!repo.touch(JobId::new(99)).await.unwrap());
    }
}
