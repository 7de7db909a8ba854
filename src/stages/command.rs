//! External tool invocation.
//!
//! Every transform collaborator is a program run inside the job's working
//! directory. Child processes are killed if the transform is cancelled.

use std::path::Path;
use std::process::Output;

use tokio::process::Command;

use crate::relay::TransformError;

/// Runs external tools, or only logs them in dry-run mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolRunner {
    dry_run: bool,
}

impl ToolRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run `program` and return its output whatever the exit status.
    ///
    /// Not affected by dry-run.
    pub async fn output(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<Output, TransformError> {
        tracing::debug!("Running {} {} in {}", program, args.join(" "), cwd.display());

        Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransformError::ToolNotFound(program.to_string())
                } else {
                    TransformError::Tool {
                        program: program.to_string(),
                        message: e.to_string(),
                    }
                }
            })
    }

    /// Run `program` and fail unless it exits successfully.
    pub async fn run(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
    ) -> Result<Output, TransformError> {
        if self.dry_run {
            tracing::info!("[dry run] {} {}", program, args.join(" "));
            return Ok(Output {
                status: Default::default(),
                stdout: Vec::new(),
                stderr: Vec::new(),
            });
        }

        let output = self.output(program, args, cwd).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(TransformError::Tool {
                program: program.to_string(),
                message: failure_message(&output),
            })
        }
    }
}

/// Exit status plus the last non-empty line of stderr (or stdout).
fn failure_message(output: &Output) -> String {
    let last_line = |bytes: &[u8]| {
        String::from_utf8_lossy(bytes)
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    };

    match last_line(&output.stderr).or_else(|| last_line(&output.stdout)) {
        Some(line) => format!("{}: {}", output.status, line),
        None => output.status.to_string(),
    }
}

/// Whether `program` resolves to an executable.
pub fn is_available(program: &str) -> bool {
    which::which(program).is_ok()
}

/// Replace `{name}` placeholders in each argument.
pub fn expand_args(template: &[String], values: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            values.iter().fold(arg.clone(), |acc, (name, value)| {
                acc.replace(&format!("{{{}}}", name), value)
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_args() {
        let template = args(&["-P", "{printer}", "{file}", "--title={file}"]);
        let expanded = expand_args(&template, &[("printer", "hall-a"), ("file", "/w/p-1.ps")]);
        assert_eq!(expanded, args(&["-P", "hall-a", "/w/p-1.ps", "--title=/w/p-1.ps"]));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolRunner::default()
            .run("printrelay-no-such-tool", &[], dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, TransformError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_dry_run_skips_execution() {
        let dir = tempfile::tempdir().unwrap();
        let output = ToolRunner::new(true)
            .run("printrelay-no-such-tool", &args(&["x"]), dir.path())
            .await
            .unwrap();
        assert!(output.stdout.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_zero_exit_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = ToolRunner::default()
            .run("sh", &args(&["-c", "echo 'bad input' >&2; exit 3"]), dir.path())
            .await
            .unwrap_err();
        match err {
            TransformError::Tool { program, message } => {
                assert_eq!(program, "sh");
                assert!(message.contains("bad input"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_is_available() {
        assert!(!is_available("printrelay-no-such-tool"));
    }
}
