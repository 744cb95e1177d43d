//! Recursive map-reduce over rounds.
//! Round N's artifacts are fed into round N+1 until a single file remains,
//! which is renamed to the final summary.

use crate::config::DistillConfig;
use crate::discover;
use crate::error::DistillError;
use crate::round::RoundExecutor;
use crate::summarize::Summarizer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error, info, warn};

/// Name of the surviving artifact after the last round.
pub const FINAL_SUMMARY_NAME: &str = "ULTRA_DISTILLED_SUMMARY.txt";

/// Consecutive non-shrinking rounds tolerated before giving up.
const MAX_STALLED_ROUNDS: u32 = 2;

/// Where the reduction loop currently is.
#[derive(Debug)]
pub enum ReduceState {
    /// Waiting to run `round` over `inputs`.
    Pending { round: u32, inputs: Vec<PathBuf> },
    /// `round` is being executed.
    Running { round: u32, inputs: Vec<PathBuf> },
    /// `round` failed; terminal for this invocation.
    Failed { round: u32, error: DistillError },
    /// `artifact` is the result after `rounds` completed rounds.
    Done { artifact: PathBuf, rounds: u32 },
}

/// Result of a successful distillation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistillOutcome {
    /// The final summary, or the lone source file when no round was needed.
    pub summary: PathBuf,
    /// Number of rounds that ran.
    pub rounds: u32,
}

/// Drives discovery and the round loop for one configuration.
pub struct Distiller<S> {
    config: Arc<DistillConfig>,
    executor: RoundExecutor<S>,
}

impl<S: Summarizer> Distiller<S> {
    /// Validate `config` and build a distiller around `summarizer`.
    pub fn new(config: DistillConfig, summarizer: S) -> Result<Self, DistillError> {
        config.validate()?;
        let config = Arc::new(config);
        Ok(Self {
            executor: RoundExecutor::new(summarizer, config.clone()),
            config,
        })
    }

    /// Prepare the output directory, discover inputs and reduce them.
    pub async fn run(&self) -> Result<DistillOutcome, DistillError> {
        let cfg = &self.config;
        if !cfg.source_dir.is_dir() {
            return Err(DistillError::SourceNotFound(cfg.source_dir.clone()));
        }
        self.prepare_output_dir().await?;

        let inputs = discover::find_files(&cfg.source_dir, &cfg.extension, Some(&cfg.output_dir))?;
        if inputs.is_empty() {
            return Err(DistillError::NoInputs {
                dir: cfg.source_dir.clone(),
                extension: cfg.extension.clone(),
            });
        }
        info!("found {} source files to process", inputs.len());
        self.reduce(inputs).await
    }

    /// Fresh runs start from an empty output directory; resumed runs keep
    /// whatever is already there.
    async fn prepare_output_dir(&self) -> Result<(), DistillError> {
        let dir = &self.config.output_dir;
        if self.config.resume {
            info!(
                "resume mode enabled, keeping output directory {}",
                dir.display()
            );
        } else if dir.exists() {
            let source = self.config.source_dir.canonicalize()?;
            if source.starts_with(dir.canonicalize()?) {
                return Err(DistillError::InvalidConfig(format!(
                    "output directory {} would contain the source files",
                    dir.display()
                )));
            }
            info!(
                "output directory {} already exists, clearing it for a fresh run",
                dir.display()
            );
            fs::remove_dir_all(dir).await?;
        }
        fs::create_dir_all(dir).await?;
        Ok(())
    }

    /// Run rounds over `inputs` until a single artifact remains.
    pub async fn reduce(&self, inputs: Vec<PathBuf>) -> Result<DistillOutcome, DistillError> {
        let mut stalled = 0;
        let mut state = ReduceState::Pending { round: 1, inputs };
        loop {
            debug!("reduce state: {state:?}");
            state = match state {
                ReduceState::Pending { round, mut inputs } => {
                    if round == 1 && inputs.len() == 1 {
                        info!("only one source file, nothing to distill");
                        ReduceState::Done {
                            artifact: inputs.remove(0),
                            rounds: 0,
                        }
                    } else {
                        ReduceState::Running { round, inputs }
                    }
                }
                ReduceState::Running { round, inputs } => {
                    match self.executor.run(round, &inputs).await {
                        Ok(mut outputs) if outputs.len() == 1 => {
                            match self.finalize(outputs.remove(0)).await {
                                Ok(artifact) => ReduceState::Done {
                                    artifact,
                                    rounds: round,
                                },
                                Err(error) => ReduceState::Failed { round, error },
                            }
                        }
                        Ok(outputs) if outputs.is_empty() => ReduceState::Failed {
                            round,
                            error: DistillError::NoProgress { round, files: 0 },
                        },
                        Ok(outputs) => {
                            if outputs.len() >= inputs.len() {
                                stalled += 1;
                                warn!(
                                    "round {round} did not shrink the file set ({} -> {})",
                                    inputs.len(),
                                    outputs.len()
                                );
                            } else {
                                stalled = 0;
                            }
                            if stalled >= MAX_STALLED_ROUNDS {
                                ReduceState::Failed {
                                    round,
                                    error: DistillError::NoProgress {
                                        round,
                                        files: outputs.len(),
                                    },
                                }
                            } else {
                                ReduceState::Pending {
                                    round: round + 1,
                                    inputs: outputs,
                                }
                            }
                        }
                        Err(error) => ReduceState::Failed { round, error },
                    }
                }
                ReduceState::Failed { round, error } => {
                    error!("aborting distillation in round {round}: {error}");
                    return Err(error);
                }
                ReduceState::Done { artifact, rounds } => {
                    return Ok(DistillOutcome {
                        summary: artifact,
                        rounds,
                    });
                }
            };
        }
    }

    async fn finalize(&self, last: PathBuf) -> Result<PathBuf, DistillError> {
        let dest = self.config.output_dir.join(FINAL_SUMMARY_NAME);
        fs::rename(&last, &dest).await?;
        info!("final summary saved as {}", dest.display());
        Ok(dest)
    }
}
