//! Source tables as poller sources: print jobs and judged submissions.

use async_trait::async_trait;

use super::{JobSource, PendingJob, PollerError};
use crate::models::{Job, JobId};
use crate::repository::{DieselPrintJobRepository, DieselTicketRepository};

#[async_trait]
impl JobSource for DieselPrintJobRepository {
    async fn fetch_eligible(&self) -> Result<Vec<PendingJob>, PollerError> {
        let rows = self.get_eligible().await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let observed_modified_at = row.modified_at;
                PendingJob {
                    job: Job::from(row),
                    observed_modified_at,
                }
            })
            .collect())
    }

    async fn mark_claimed(&self, id: JobId, observed_modified_at: i64) -> Result<(), PollerError> {
        let updated = DieselPrintJobRepository::mark_claimed(self, id, observed_modified_at).await?;
        if updated == 0 {
            tracing::warn!(job_id = %id, "Row disappeared before it could be claimed");
        }
        Ok(())
    }
}

#[async_trait]
impl JobSource for DieselTicketRepository {
    async fn fetch_eligible(&self) -> Result<Vec<PendingJob>, PollerError> {
        let rows = self.get_eligible().await?;
        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let ticket = self.ticket(&row).await?;
            match ticket.to_job() {
                Ok(job) => pending.push(PendingJob {
                    job,
                    observed_modified_at: row.judged_at,
                }),
                Err(e) => tracing::warn!(
                    job_id = row.id,
                    error = %e,
                    "Skipping ticket that cannot be encoded"
                ),
            }
        }
        Ok(pending)
    }

    async fn mark_claimed(&self, id: JobId, observed_modified_at: i64) -> Result<(), PollerError> {
        let updated = self.mark_printed(id, observed_modified_at).await?;
        if updated == 0 {
            tracing::warn!(job_id = %id, "Submission disappeared before its ticket was claimed");
        }
        Ok(())
    }
}
