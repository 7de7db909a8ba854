//! DVI to PostScript sized for the physical page.

use std::path::PathBuf;

use async_trait::async_trait;

use super::{expect_input, job_dir, read_output, StageKind, ToolRunner};
use crate::config::Settings;
use crate::models::{Job, PayloadKind};
use crate::relay::{Transform, TransformError};

pub struct RenderStage {
    workdir: PathBuf,
    dvips: String,
    paper: String,
    runner: ToolRunner,
}

impl RenderStage {
    pub fn new(workdir: PathBuf, dvips: impl Into<String>, paper: impl Into<String>) -> Self {
        Self {
            workdir,
            dvips: dvips.into(),
            paper: paper.into(),
            runner: ToolRunner::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.workdir(StageKind::Render),
            settings.tools.dvips.clone(),
            settings.paper.clone(),
        )
    }
}

#[async_trait]
impl Transform for RenderStage {
    type Output = Job;

    fn name(&self) -> &str {
        StageKind::Render.as_str()
    }

    async fn apply(&self, job: Job) -> Result<Job, TransformError> {
        expect_input(&job, StageKind::Render)?;

        let id = job.stage_local(StageKind::Render.tag());
        let dir = job_dir(&self.workdir, &id).await?;
        let dvi_name = id.file(".dvi");
        let ps_name = id.file(".ps");
        tokio::fs::write(dir.join(&dvi_name), &job.payload).await?;

        let args = vec![
            "-t".to_string(),
            self.paper.clone(),
            "-o".to_string(),
            ps_name.clone(),
            dvi_name,
        ];
        self.runner.run(&self.dvips, &args, &dir).await?;

        let postscript = read_output(&dir.join(&ps_name)).await?;
        Ok(job.with_payload(PayloadKind::PostScript, postscript))
    }
}
