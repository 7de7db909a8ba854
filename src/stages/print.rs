//! Terminal stage: hand the PostScript to the printer.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;

use super::command::expand_args;
use super::{expect_input, job_dir, StageKind, ToolRunner};
use crate::config::Settings;
use crate::models::{Job, PrintCompletion};
use crate::relay::{Transform, TransformError};

/// Default print command; `{printer}` and `{file}` are substituted.
pub fn default_print_command() -> Vec<String> {
    ["lpr", "-P", "{printer}", "{file}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

pub struct PrintStage {
    workdir: PathBuf,
    command: Vec<String>,
    runner: ToolRunner,
}

impl PrintStage {
    pub fn new(workdir: PathBuf, command: Vec<String>, dry_run: bool) -> Self {
        Self {
            workdir,
            command,
            runner: ToolRunner::new(dry_run),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.workdir(StageKind::Print),
            settings.print_command.clone(),
            settings.dry_run,
        )
    }
}

#[async_trait]
impl Transform for PrintStage {
    type Output = PrintCompletion;

    fn name(&self) -> &str {
        StageKind::Print.as_str()
    }

    async fn apply(&self, job: Job) -> Result<PrintCompletion, TransformError> {
        expect_input(&job, StageKind::Print)?;
        if job.printer.trim().is_empty() {
            return Err(TransformError::Other("job has no printer".to_string()));
        }

        let id = job.stage_local(StageKind::Print.tag());
        let dir = job_dir(&self.workdir, &id).await?;
        let now = Utc::now();
        let file = dir.join(format!("{}-{}", now.format("%Y%m%d%H%M%S"), id.file(".ps")));
        tokio::fs::write(&file, &job.payload).await?;

        let file = file.display().to_string();
        let args = expand_args(
            &self.command,
            &[("printer", job.printer.as_str()), ("file", file.as_str()), ("job", id.as_str())],
        );
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| TransformError::Other("print command is empty".to_string()))?;
        self.runner.run(program, rest, &dir).await?;

        tracing::info!(
            job_id = %job.job_id,
            printer = %job.printer,
            pages = job.page_count.unwrap_or(0),
            dry_run = self.runner.is_dry_run(),
            "Printed {}",
            job.metadata.filename
        );

        Ok(PrintCompletion {
            job_id: job.job_id,
            origin: job.origin,
            printer: job.printer,
            pages: job.page_count,
            printed_at: now.timestamp(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobId, JobMetadata, PayloadKind};

    fn ps_job(printer: &str) -> Job {
        Job::source(JobId::new(42), printer, Vec::new(), JobMetadata::default())
            .with_payload(PayloadKind::PostScript, b"%!PS".to_vec())
            .with_page_count(2)
    }

    #[tokio::test]
    async fn test_dry_run_writes_file_without_printing() {
        let work = tempfile::tempdir().unwrap();
        let stage = PrintStage::new(
            work.path().to_path_buf(),
            vec!["printrelay-no-such-spooler".to_string(), "{file}".to_string()],
            true,
        );

        let done = stage.apply(ps_job("hall-a")).await.unwrap();
        assert_eq!(done.job_id, JobId::new(42));
        assert_eq!(done.printer, "hall-a");
        assert_eq!(done.pages, Some(2));

        let files: Vec<_> = std::fs::read_dir(work.path().join("p-42"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("-p-42.ps"));
    }

    #[tokio::test]
    async fn test_missing_printer_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let stage = PrintStage::new(work.path().to_path_buf(), default_print_command(), true);
        let err = stage.apply(ps_job(" ")).await.unwrap_err();
        assert_eq!(err.to_string(), "job has no printer");
    }

    #[tokio::test]
    async fn test_empty_command_is_rejected() {
        let work = tempfile::tempdir().unwrap();
        let stage = PrintStage::new(work.path().to_path_buf(), Vec::new(), false);
        assert!(stage.apply(ps_job("hall-a")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_spooler_with_placeholders() {
        let tools = tempfile::tempdir().unwrap();
        let work = tempfile::tempdir().unwrap();
        let log = tools.path().join("spool.log");
        let spooler = crate::stages::fake_tools::script(
            tools.path(),
            "spool",
            &format!(r#"echo "$@" > "{}""#, log.display()),
        );

        let command = vec![spooler, "-P".to_string(), "{printer}".to_string(), "{file}".to_string()];
        let stage = PrintStage::new(work.path().to_path_buf(), command, false);
        stage.apply(ps_job("hall-a")).await.unwrap();

        let logged = std::fs::read_to_string(&log).unwrap();
        assert!(logged.starts_with("-P hall-a "));
        assert!(logged.trim_end().ends_with("-p-42.ps"));
    }
}
