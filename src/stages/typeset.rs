//! LaTeX to DVI, with page count.

use std::path::PathBuf;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;

use super::{expect_input, job_dir, read_output, StageKind, ToolRunner};
use crate::config::Settings;
use crate::models::{Job, PayloadKind};
use crate::relay::{Transform, TransformError};

pub struct TypesetStage {
    workdir: PathBuf,
    latex: String,
    runner: ToolRunner,
}

fn page_count_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"Output written on .+?\((\d+) pages?").ok())
        .as_ref()
}

/// Page count from the compiler log, e.g. `Output written on t-42.dvi (3 pages, 9124 bytes).`
pub fn parse_page_count(log: &str) -> Option<u32> {
    page_count_pattern()?
        .captures(log)?
        .get(1)?
        .as_str()
        .parse()
        .ok()
}

impl TypesetStage {
    pub fn new(workdir: PathBuf, latex: impl Into<String>) -> Self {
        Self {
            workdir,
            latex: latex.into(),
            runner: ToolRunner::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.workdir(StageKind::Typeset), settings.tools.latex.clone())
    }
}

#[async_trait]
impl Transform for TypesetStage {
    type Output = Job;

    fn name(&self) -> &str {
        StageKind::Typeset.as_str()
    }

    async fn apply(&self, job: Job) -> Result<Job, TransformError> {
        expect_input(&job, StageKind::Typeset)?;

        let id = job.stage_local(StageKind::Typeset.tag());
        let dir = job_dir(&self.workdir, &id).await?;
        let tex_name = id.file(".tex");
        tokio::fs::write(dir.join(&tex_name), &job.payload).await?;

        let args = vec!["-interaction=batchmode".to_string(), tex_name];

        // First pass failures are tolerated; only the second pass counts.
        let first = self.runner.output(&self.latex, &args, &dir).await?;
        if !first.status.success() {
            tracing::debug!(job_id = %job.job_id, "First LaTeX pass exited with {}", first.status);
        }
        self.runner.run(&self.latex, &args, &dir).await?;

        let dvi = read_output(&dir.join(id.file(".dvi"))).await?;
        let log_name = id.file(".log");
        let log = read_output(&dir.join(&log_name)).await?;
        let pages = parse_page_count(&String::from_utf8_lossy(&log))
            .ok_or_else(|| TransformError::Parse(format!("no page count in {}", log_name)))?;

        tracing::info!(job_id = %job.job_id, pages, "Typeset {}", id);
        Ok(job.with_payload(PayloadKind::Dvi, dvi).with_page_count(pages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_count() {
        let log = "Some noise\nOutput written on t-42.dvi (3 pages, 9124 bytes).\nTranscript written";
        assert_eq!(parse_page_count(log), Some(3));
        assert_eq!(parse_page_count("Output written on t-1.dvi (1 page, 300 bytes)."), Some(1));
        assert_eq!(parse_page_count("No pages of output."), None);
    }

    #[cfg(unix)]
    mod with_fake_latex {
        use super::*;
        use crate::models::{JobId, JobMetadata};
        use crate::stages::fake_tools::script;

        // Fails the first pass, succeeds on the second.
        const FAKE_LATEX: &str = r#"
base=$(basename "$2" .tex)
if [ ! -f pass1 ]; then touch pass1; exit 1; fi
printf 'DVI' > "$base.dvi"
echo "Output written on $base.dvi (2 pages, 812 bytes)." > "$base.log"
"#;

        fn tex_job() -> Job {
            Job::source(JobId::new(42), "hall-a", Vec::new(), JobMetadata::default())
                .with_payload(PayloadKind::Tex, br"\documentclass{article}".to_vec())
        }

        #[tokio::test]
        async fn test_two_passes_and_page_count() {
            let tools = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let latex = script(tools.path(), "latex", FAKE_LATEX);

            let stage = TypesetStage::new(work.path().to_path_buf(), latex);
            let out = stage.apply(tex_job()).await.unwrap();

            assert_eq!(out.kind, PayloadKind::Dvi);
            assert_eq!(out.payload, b"DVI");
            assert_eq!(out.page_count, Some(2));
            assert!(work.path().join("t-42").join("t-42.tex").exists());
        }

        #[tokio::test]
        async fn test_second_pass_failure_surfaces() {
            let tools = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let latex = script(tools.path(), "latex", "echo '! Emergency stop.'; exit 1");

            let stage = TypesetStage::new(work.path().to_path_buf(), latex);
            let err = stage.apply(tex_job()).await.unwrap_err();
            assert!(err.to_string().contains("Emergency stop"));
        }

        #[tokio::test]
        async fn test_missing_dvi() {
            let tools = tempfile::tempdir().unwrap();
            let work = tempfile::tempdir().unwrap();
            let latex = script(tools.path(), "latex", "exit 0");

            let stage = TypesetStage::new(work.path().to_path_buf(), latex);
            let err = stage.apply(tex_job()).await.unwrap_err();
            assert!(matches!(err, TransformError::MissingOutput(name) if name == "t-42.dvi"));
        }
    }
}
