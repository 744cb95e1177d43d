//! Core of the subtitle distiller.
//! Recursively batches text files through an external LLM command-line tool
//! until a single summary remains. Also cleans raw captions and
//! deduplicates subtitle archives.

pub mod clean;
pub mod config;
pub mod dedup;
pub mod discover;
pub mod error;
pub mod partition;
pub mod reducer;
pub mod round;
pub mod summarize;

pub use config::DistillConfig;
pub use error::{DistillError, SummarizeError};
pub use partition::{BatchMode, PartitionConfig};
pub use reducer::{DistillOutcome, Distiller, FINAL_SUMMARY_NAME};
pub use summarize::{gemini::GeminiCli, Summarizer};
