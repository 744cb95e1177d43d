//! One distillation round.
//! This module partitions the round's inputs, fans the batches out to a
//! bounded pool of summarizer calls and collects the written artifacts.

use crate::config::DistillConfig;
use crate::error::DistillError;
use crate::partition::{self, Batch};
use crate::summarize::Summarizer;
use futures::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, error, info, trace};

/// Deterministic artifact path for a batch.
pub fn batch_output_path(output_dir: &Path, round: u32, batch: usize) -> PathBuf {
    output_dir.join(format!("round_{round}_batch_{batch}.txt"))
}

/// Runs rounds against a summarizer using a shared configuration.
pub struct RoundExecutor<S> {
    summarizer: S,
    config: Arc<DistillConfig>,
}

impl<S: Summarizer> RoundExecutor<S> {
    pub fn new(summarizer: S, config: Arc<DistillConfig>) -> Self {
        Self { summarizer, config }
    }

    /// Process `inputs` as round `round` and return the artifacts sorted by
    /// file name.
    ///
    /// With resume enabled, batches whose artifact already exists are not
    /// sent again. The first failing batch aborts the whole round: queued
    /// batches never start and running ones are dropped, which kills their
    /// child process.
    pub async fn run(&self, round: u32, inputs: &[PathBuf]) -> Result<Vec<PathBuf>, DistillError> {
        info!("starting round {round} with {} files", inputs.len());
        let files = partition::stat_all(inputs)?;
        let batches = partition::partition(files, &self.config.partition);
        info!(
            "divided into {} batches using '{}' mode",
            batches.len(),
            self.config.partition.mode
        );

        let mut outputs = Vec::with_capacity(batches.len());
        let mut pending = Vec::new();
        for batch in batches {
            let out = batch_output_path(&self.config.output_dir, round, batch.index);
            if self.config.resume && out.exists() {
                info!(
                    "skipping batch {} (round {round}): output already exists",
                    batch.index
                );
                outputs.push(out);
                continue;
            }
            pending.push((batch, out));
        }

        let total = pending.len();
        let workers = self.config.workers.max(1);
        let mut progress = Progress::new(total, workers);
        let mut jobs = stream::iter(pending)
            .map(|(batch, out)| self.run_batch(round, batch, out))
            .buffer_unordered(workers);
        while let Some(result) = jobs.next().await {
            match result {
                Ok((path, elapsed_ms)) => {
                    outputs.push(path);
                    progress.record(elapsed_ms);
                }
                Err(err) => {
                    error!("{err}");
                    error!("aborting round {round}");
                    return Err(err);
                }
            }
        }

        outputs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(outputs)
    }

    async fn run_batch(
        &self,
        round: u32,
        batch: Batch,
        out: PathBuf,
    ) -> Result<(PathBuf, u128), DistillError> {
        info!(
            "processing batch {} (round {round}): {} files, {:.2} KB",
            batch.index,
            batch.files.len(),
            batch.total_bytes() as f64 / 1024.0
        );
        let begin = Instant::now();
        let text = self
            .summarizer
            .summarize(
                &batch.paths(),
                &self.config.model,
                &self.config.prompt,
                self.config.timeout(),
            )
            .await
            .map_err(|source| DistillError::Batch {
                round,
                batch: batch.index,
                source,
            })?;
        write_artifact(&out, &text).await?;
        let elapsed = begin.elapsed().as_millis();
        info!(
            "batch {} (round {round}) saved to {} in {} ms",
            batch.index,
            out.file_name().unwrap_or_default().to_string_lossy(),
            elapsed
        );
        Ok((out, elapsed))
    }
}

/// Write `text` next to `path` first and rename it into place, so an
/// existing artifact is always complete.
async fn write_artifact(path: &Path, text: &str) -> Result<(), DistillError> {
    trace!("write_artifact path={}", path.display());
    let tmp = path.with_extension("txt.tmp");
    fs::write(&tmp, text).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Completion counter for the batches sent in one round.
struct Progress {
    total: usize,
    done: usize,
    workers: usize,
    last_ms: Option<u128>,
}

impl Progress {
    fn new(total: usize, workers: usize) -> Self {
        Self {
            total,
            done: 0,
            workers,
            last_ms: None,
        }
    }

    fn record(&mut self, elapsed_ms: u128) {
        self.done += 1;
        let remaining = self.total - self.done;
        info!("completed {}/{} batches", self.done, self.total);
        if let Some(prev) = self.last_ms {
            if remaining > 0 {
                let estimate = estimate_remaining(prev, elapsed_ms, remaining, self.workers);
                info!("ETA: {}", format_eta(estimate));
            }
        }
        self.last_ms = Some(elapsed_ms);
    }
}

/// Milliseconds left in the round: the mean of the last two batch times
/// times the number of worker waves the remaining batches need.
fn estimate_remaining(prev_ms: u128, curr_ms: u128, remaining: usize, workers: usize) -> u128 {
    debug!(
        "estimate_remaining prev_ms={prev_ms} curr_ms={curr_ms} remaining={remaining} workers={workers}"
    );
    let waves = remaining.div_ceil(workers.max(1)) as u128;
    (prev_ms + curr_ms) / 2 * waves
}

/// Human readable round ETA, e.g. `3 minutes 1 second`.
fn format_eta(ms: u128) -> String {
    let unit = |n: u128, name: &str| {
        if n == 1 {
            format!("1 {name}")
        } else {
            format!("{n} {name}s")
        }
    };
    let secs = ms / 1000;
    match (secs / 60, secs % 60) {
        (0, s) => unit(s, "second"),
        (m, s) => format!("{} {}", unit(m, "minute"), unit(s, "second")),
    }
}
