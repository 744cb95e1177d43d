//! Error types shared by the distillation pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to the external summarizer.
#[derive(Debug, Error)]
pub enum SummarizeError {
    /// The summarizer program could not be found on `PATH`.
    #[error("summarizer binary `{0}` not found, make sure it is installed and on PATH")]
    BinaryNotFound(String),
    /// The call did not finish within the configured timeout.
    #[error("summarizer timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),
    /// The summarizer ran but exited unsuccessfully.
    #[error("summarizer exited with code {}: {stderr}", code.map(|c| c.to_string()).unwrap_or_else(|| "none".into()))]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("failed to run summarizer: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while configuring or running a distillation.
#[derive(Debug, Error)]
pub enum DistillError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    #[error("no files with extension `{extension}` found in {}", dir.display())]
    NoInputs { dir: PathBuf, extension: String },
    /// Reading a file size failed while partitioning; nothing was scheduled.
    #[error("failed to read size of {}: {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("round {round}, batch {batch} failed: {source}")]
    Batch {
        round: u32,
        batch: usize,
        #[source]
        source: SummarizeError,
    },
    #[error("round {round} did not reduce the file count ({files} files remain)")]
    NoProgress { round: u32, files: usize },
    #[error("failed to scan {}: {source}", dir.display())]
    Walk {
        dir: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DistillError {
    /// Round number the error belongs to, if any.
    pub fn round(&self) -> Option<u32> {
        match self {
            DistillError::Batch { round, .. } | DistillError::NoProgress { round, .. } => {
                Some(*round)
            }
            _ => None,
        }
    }
}
