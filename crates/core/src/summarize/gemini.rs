//! Summarizer backed by the `gemini` command-line tool.
//! Files are passed as `@path` references appended to the prompt.

use super::{strip_noise, Summarizer};
use crate::error::SummarizeError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

/// Default program name looked up on `PATH`.
pub const DEFAULT_BINARY: &str = "gemini";

/// Runs the LLM CLI once per batch as a plain argument list, without a shell.
#[derive(Debug, Clone)]
pub struct GeminiCli {
    program: String,
    auto_approve: bool,
}

impl Default for GeminiCli {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl GeminiCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            auto_approve: true,
        }
    }

    /// Toggle the `-y` flag that lets the CLI read the referenced files
    /// without asking.
    pub fn auto_approve(mut self, yes: bool) -> Self {
        self.auto_approve = yes;
        self
    }

    /// Build the argument list for one call.
    pub fn command_args(&self, files: &[PathBuf], model: &str, prompt: &str) -> Vec<String> {
        let references = files
            .iter()
            .map(|p| file_reference(&absolute(p)))
            .collect::<Vec<_>>()
            .join(" ");
        let mut args = vec!["-m".to_string(), model.to_string()];
        if self.auto_approve {
            args.push("-y".to_string());
        }
        args.push("-p".to_string());
        args.push(format!("{prompt} {references}"));
        args
    }
}

/// `@path` token for the prompt. The CLI ends a reference at the first
/// unescaped whitespace, so spaces in folder or file names get a backslash.
fn file_reference(path: &Path) -> String {
    let raw = path.display().to_string();
    let mut reference = String::with_capacity(raw.len() + 1);
    reference.push('@');
    for c in raw.chars() {
        if c.is_whitespace() {
            reference.push('\\');
        }
        reference.push(c);
    }
    reference
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[async_trait]
impl Summarizer for GeminiCli {
    async fn summarize(
        &self,
        files: &[PathBuf],
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, SummarizeError> {
        let args = self.command_args(files, model, prompt);
        trace!("summarize program={} files={}", self.program, files.len());
        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => SummarizeError::BinaryNotFound(self.program.clone()),
                _ => SummarizeError::Io(err),
            })?;

        // Dropping the pending future on timeout kills the child.
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(SummarizeError::Timeout(timeout)),
        };
        if !output.status.success() {
            return Err(SummarizeError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        debug!(
            "{} returned {} bytes of output",
            self.program,
            output.stdout.len()
        );
        Ok(strip_noise(&String::from_utf8_lossy(&output.stdout)))
    }
}
