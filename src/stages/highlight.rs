//! Source text to highlighted LaTeX document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use super::tex::{render_document, tex_escape};
use super::{expect_input, job_dir, read_output, LanguageMap, StageKind, ToolRunner};
use crate::config::Settings;
use crate::models::{Job, PayloadKind};
use crate::relay::{Transform, TransformError};
use crate::repository::DEFAULT_CHARSET;

pub struct HighlightStage {
    workdir: PathBuf,
    pygmentize: String,
    languages: Arc<LanguageMap>,
    runner: ToolRunner,
}

impl HighlightStage {
    pub fn new(workdir: PathBuf, pygmentize: impl Into<String>, languages: Arc<LanguageMap>) -> Self {
        Self {
            workdir,
            pygmentize: pygmentize.into(),
            languages,
            runner: ToolRunner::default(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.workdir(StageKind::Highlight),
            settings.tools.pygmentize.clone(),
            settings.languages.clone(),
        )
    }
}

#[async_trait]
impl Transform for HighlightStage {
    type Output = Job;

    fn name(&self) -> &str {
        StageKind::Highlight.as_str()
    }

    async fn apply(&self, mut job: Job) -> Result<Job, TransformError> {
        expect_input(&job, StageKind::Highlight)?;

        let id = job.stage_local(StageKind::Highlight.tag());
        let dir = job_dir(&self.workdir, &id).await?;

        let syntax = self.languages.syntax_for(&job.metadata.filename);
        let ext = Path::new(&job.metadata.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt");
        let source_name = id.file(&format!("-source.{}", ext));
        let highlighted_name = id.file("-hl.tex");
        let style_name = id.file("-style.sty");

        tokio::fs::write(dir.join(&source_name), &job.payload).await?;

        let charset = if job.metadata.charset.is_empty() {
            DEFAULT_CHARSET
        } else {
            job.metadata.charset.as_str()
        };
        tracing::debug!(job_id = %job.job_id, syntax, charset, "Highlighting {}", source_name);

        let highlight_args = vec![
            "-l".to_string(),
            syntax.to_string(),
            "-f".to_string(),
            "latex".to_string(),
            "-O".to_string(),
            format!("linenos=1,tabsize=4,encoding={},outencoding=utf-8", charset),
            "-o".to_string(),
            highlighted_name.clone(),
            source_name,
        ];
        self.runner.run(&self.pygmentize, &highlight_args, &dir).await?;

        let style_args = vec![
            "-f".to_string(),
            "latex".to_string(),
            "-S".to_string(),
            "bw".to_string(),
            "-o".to_string(),
            style_name.clone(),
        ];
        self.runner.run(&self.pygmentize, &style_args, &dir).await?;

        let body = read_output(&dir.join(&highlighted_name)).await?;
        let style = read_output(&dir.join(&style_name)).await?;

        job.metadata.team.name = tex_escape(&job.metadata.team.name);
        job.metadata.filename = tex_escape(&job.metadata.filename);

        let document = render_document(
            &job.metadata,
            &String::from_utf8_lossy(&style),
            &String::from_utf8_lossy(&body),
        );
        Ok(job.with_payload(PayloadKind::Tex, document.into_bytes()))
    }
}
