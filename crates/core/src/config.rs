//! Run configuration for a distillation.

use crate::error::DistillError;
use crate::partition::{BatchMode, PartitionConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_EXTENSION: &str = ".vtt";
pub const DEFAULT_OUTPUT_DIR: &str = "./distilled_output";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_BATCH_SIZE: usize = 55;
pub const DEFAULT_MAX_BATCH_KB: u64 = 1700;
pub const DEFAULT_LARGE_FILE_KB: u64 = 1300;
pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_TIMEOUT_SECS: u64 = 987;

/// Prompt used when neither an inline prompt nor a prompt file is given.
pub const DEFAULT_PROMPT: &str = "You are an expert analyst of transcripts. \
Synthesize the key themes, core ideas and most important information from the \
referenced files into one concise, well-structured summary. Ignore filler and \
repetition, and keep sources, dates and people involved.";

/// Convert kilobytes (1024 bytes) to bytes.
pub fn kb(n: u64) -> u64 {
    n.saturating_mul(1024)
}

/// Everything one distillation run needs, passed explicitly to each component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistillConfig {
    pub source_dir: PathBuf,
    /// Suffix source files must end with, e.g. `.vtt`.
    pub extension: String,
    pub output_dir: PathBuf,
    pub model: String,
    pub prompt: String,
    pub partition: PartitionConfig,
    pub workers: usize,
    pub timeout_secs: u64,
    /// Reuse batch outputs that already exist instead of recomputing them.
    pub resume: bool,
}

impl Default for DistillConfig {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::from("./"),
            extension: DEFAULT_EXTENSION.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            partition: PartitionConfig {
                mode: BatchMode::Balanced,
                batch_size: DEFAULT_BATCH_SIZE,
                max_batch_bytes: kb(DEFAULT_MAX_BATCH_KB),
                large_file_bytes: kb(DEFAULT_LARGE_FILE_KB),
            },
            workers: DEFAULT_WORKERS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            resume: false,
        }
    }
}

impl DistillConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Reject settings the pipeline cannot make progress with.
    pub fn validate(&self) -> Result<(), DistillError> {
        if self.workers == 0 {
            return Err(DistillError::InvalidConfig(
                "worker count must be at least 1".into(),
            ));
        }
        // One file per batch never shrinks the file set.
        if self.partition.batch_size < 2 {
            return Err(DistillError::InvalidConfig(format!(
                "batch size must be at least 2, got {}",
                self.partition.batch_size
            )));
        }
        if self.timeout_secs == 0 {
            return Err(DistillError::InvalidConfig(
                "timeout must be at least 1 second".into(),
            ));
        }
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(DistillError::InvalidConfig(
                "file extension must not be empty".into(),
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err(DistillError::InvalidConfig("prompt must not be empty".into()));
        }
        Ok(())
    }
}
