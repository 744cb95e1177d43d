//! Summarizer capability used by the round executor.
//! A summarizer turns a batch of files into one block of summary text.

use crate::error::SummarizeError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

pub mod gemini;

/// Summarizes a batch of files with the given model and prompt.
#[async_trait]
pub trait Summarizer: Send + Sync + Clone {
    /// Produce the summary text for `files`, giving up after `timeout`.
    async fn summarize(
        &self,
        files: &[PathBuf],
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, SummarizeError>;
}

/// Marker printed by some CLIs on stdout before the actual answer.
const NOISE_MARKERS: &[&str] = &["Loaded cached credentials"];

/// Drop known noise lines from captured summarizer output.
pub fn strip_noise(output: &str) -> String {
    let mut text = output
        .lines()
        .filter(|line| !NOISE_MARKERS.iter().any(|m| line.contains(m)))
        .collect::<Vec<_>>()
        .join("\n");
    if output.ends_with('\n') && !text.is_empty() {
        text.push('\n');
    }
    text
}
