//! Diesel-based print job repository for SQLite.
//!
//! Owns the claim-marker protocol on the source table: a row is eligible
//! for publication while `claimed_at` is NULL or older than `modified_at`.
//! Claiming stores the `modified_at` value that was observed when the row
//! was read, so an edit racing with the claim keeps the row eligible.

use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{RunQueryDsl, SimpleAsyncConnection};

use super::diesel_models::{NewPrintJob, PrintJobRecord};
use super::diesel_pool::{AsyncSqlitePool, DieselError};
use super::util::team_display_name;
use crate::models::{Computer, IdName, Job, JobId, JobMetadata};
use crate::schema::print_jobs;

/// Character set assumed for submissions that don't name one.
pub const DEFAULT_CHARSET: &str = "cp1251";

const CREATE_PRINT_JOBS: &str = r#"
CREATE TABLE IF NOT EXISTS print_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    filename TEXT NOT NULL,
    printer TEXT NOT NULL,
    contest_id INTEGER NOT NULL DEFAULT 0,
    contest_name TEXT NOT NULL DEFAULT '',
    team_id INTEGER NOT NULL DEFAULT 0,
    team_name TEXT NOT NULL DEFAULT '',
    team_num INTEGER,
    computer_id TEXT NOT NULL DEFAULT '',
    computer_name TEXT NOT NULL DEFAULT '',
    area_id INTEGER NOT NULL DEFAULT 0,
    area_name TEXT NOT NULL DEFAULT '',
    charset TEXT NOT NULL DEFAULT 'cp1251',
    data BLOB NOT NULL,
    arrived_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    claimed_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_print_jobs_claim ON print_jobs (claimed_at, modified_at);
"#;

/// A job as submitted by a user, before it has an id.
#[derive(Debug, Clone, Default)]
pub struct PrintJobSubmission {
    pub filename: String,
    pub printer: String,
    pub contest: IdName,
    pub team: IdName,
    /// Team number within its school; appended to the display name when positive.
    pub team_num: Option<i32>,
    pub computer: Computer,
    pub area: IdName,
    pub charset: Option<String>,
    pub data: Vec<u8>,
}

/// Convert a database record to a freshly ingested source job.
impl From<PrintJobRecord> for Job {
    fn from(record: PrintJobRecord) -> Self {
        let team_name = team_display_name(record.team_name, record.team_num);
        let charset = if record.charset.is_empty() {
            DEFAULT_CHARSET.to_string()
        } else {
            record.charset
        };

        Job::source(
            JobId::new(record.id),
            record.printer,
            record.data,
            JobMetadata {
                filename: record.filename,
                contest: IdName::new(record.contest_id, record.contest_name),
                team: IdName::new(record.team_id, team_name),
                computer: Computer {
                    id: record.computer_id,
                    name: record.computer_name,
                },
                area: IdName::new(record.area_id, record.area_name),
                charset,
                submitted_at: record.arrived_at,
            },
        )
    }
}

/// Diesel-based print job repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselPrintJobRepository {
    pool: AsyncSqlitePool,
}

impl DieselPrintJobRepository {
    /// Create a new repository with an existing pool.
    pub fn new(pool: AsyncSqlitePool) -> Self {
        Self { pool }
    }

    /// Create the source table if it doesn't exist yet.
    pub async fn init_schema(&self) -> Result<(), DieselError> {
        let mut conn = self.pool.get().await?;
        conn.batch_execute(CREATE_PRINT_JOBS).await
    }

    /// Record a new submission and return its job id.
    pub async fn insert(&self, submission: &PrintJobSubmission) -> Result<JobId, DieselError> {
        let mut conn = self.pool.get().await?;
        let now = Utc::now().timestamp_millis();
        let charset = submission.charset.as_deref().unwrap_or(DEFAULT_CHARSET);

        diesel::insert_into(print_jobs::table)
            .values(NewPrintJob {
                filename: &submission.filename,
                printer: &submission.printer,
                contest_id: submission.contest.id,
                contest_name: &submission.contest.name,
                team_id: submission.team.id,
                team_name: &submission.team.name,
                team_num: submission.team_num,
                computer_id: &submission.computer.id,
                computer_name: &submission.computer.name,
                area_id: submission.area.id,
                area_name: &submission.area.name,
                charset,
                data: &submission.data,
                arrived_at: now,
                modified_at: now,
            })
            .execute(&mut conn)
            .await?;

        let id = diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>(
            "last_insert_rowid()",
        ))
        .get_result::<i64>(&mut conn)
        .await?;

        Ok(JobId::new(id))
    }

    /// Get a job row by id.
    pub async fn get(&self, id: JobId) -> Result<Option<PrintJobRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        print_jobs::table
            .find(id.get())
            .select(PrintJobRecord::as_select())
            .first::<PrintJobRecord>(&mut conn)
            .await
            .optional()
    }

    /// Rows that are unclaimed or changed since they were last claimed,
    /// oldest arrival first.
    pub async fn get_eligible(&self) -> Result<Vec<PrintJobRecord>, DieselError> {
        let mut conn = self.pool.get().await?;

        print_jobs::table
            .filter(
                print_jobs::claimed_at
                    .is_null()
                    .or(print_jobs::claimed_at
                        .assume_not_null()
                        .lt(print_jobs::modified_at)),
            )
            .order((print_jobs::arrived_at.asc(), print_jobs::id.asc()))
            .select(PrintJobRecord::as_select())
            .load::<PrintJobRecord>(&mut conn)
            .await
    }

    /// Count rows waiting to be published.
    pub async fn count_eligible(&self) -> Result<i64, DieselError> {
        let mut conn = self.pool.get().await?;

        print_jobs::table
            .filter(
                print_jobs::claimed_at
                    .is_null()
                    .or(print_jobs::claimed_at
                        .assume_not_null()
                        .lt(print_jobs::modified_at)),
            )
            .count()
            .get_result(&mut conn)
            .await
    }

    /// Advance the claim marker to the `modified_at` value seen at read time.
    ///
    /// Returns the number of rows updated (0 if the row vanished).
    pub async fn mark_claimed(
        &self,
        id: JobId,
        observed_modified_at: i64,
    ) -> Result<usize, DieselError> {
        let mut conn = self.pool.get().await?;

        diesel::update(print_jobs::table.find(id.get()))
            .set(print_jobs::claimed_at.eq(Some(observed_modified_at)))
            .execute(&mut conn)
            .await
    }

    /// Bump `modified_at` so the row is re-published on the next scan.
    ///
    /// Returns false if no such row exists.
    pub async fn touch(&self, id: JobId) -> Result<bool, DieselError> {
        let Some(record) = self.get(id).await? else {
            return Ok(false);
        };
        let mut conn = self.pool.get().await?;
        let modified_at = Utc::now()
            .timestamp_millis()
            .max(record.modified_at + 1);

        let updated = diesel::update(print_jobs::table.find(id.get()))
            .set(print_jobs::modified_at.eq(modified_at))
            .execute(&mut conn)
            .await?;
        Ok(updated > 0)
    }
}
