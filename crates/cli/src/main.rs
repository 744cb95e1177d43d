//! Binary entry point for the subtitle distiller.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use subdistill_core::config::{
    self, DEFAULT_BATCH_SIZE, DEFAULT_EXTENSION, DEFAULT_LARGE_FILE_KB, DEFAULT_MAX_BATCH_KB,
    DEFAULT_MODEL, DEFAULT_OUTPUT_DIR, DEFAULT_PROMPT, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKERS,
};
use subdistill_core::clean::{self, CleanOptions};
use subdistill_core::dedup::{self, DedupOptions};
use subdistill_core::summarize::gemini::DEFAULT_BINARY;
use subdistill_core::{BatchMode, DistillConfig, Distiller, GeminiCli, PartitionConfig};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Distill, deduplicate or clean a folder of subtitle files.
#[derive(Parser)]
#[command(name = "subdistill", version, about)]
struct Cli {
    /// Enable verbose debug and trace logs.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Recursively distill a folder of text files into a single summary.
    Distill(DistillArgs),
    /// Move files with duplicate contents into a quarantine folder.
    Dedup(DedupArgs),
    /// Strip timings, tags and repeated lines from raw caption files.
    Clean(CleanArgs),
}

#[derive(Args)]
struct DistillArgs {
    /// Folder holding the source files.
    #[arg(short, long, default_value = "./")]
    source_dir: PathBuf,

    /// Folder for intermediate and final distilled files.
    #[arg(short, long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: PathBuf,

    /// Extension of the source files, e.g. `.vtt` or `.txt`.
    #[arg(short, long, default_value = DEFAULT_EXTENSION)]
    extension: String,

    /// Model passed to the summarizer CLI.
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Text file holding the prompt sent with every batch.
    #[arg(long, conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    /// Prompt given inline instead of through a file.
    #[arg(long)]
    prompt: Option<String>,

    /// Batching mode: count, size or balanced.
    #[arg(long, default_value_t = BatchMode::Balanced)]
    batch_mode: BatchMode,

    /// Maximum number of files per batch.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Maximum total size of one batch in KB (size and balanced modes).
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_KB)]
    max_batch_size_kb: u64,

    /// Files at or above this size in KB get their own batch (size mode).
    #[arg(long, default_value_t = DEFAULT_LARGE_FILE_KB)]
    large_file_threshold_kb: u64,

    /// Number of batches processed concurrently.
    #[arg(short = 'w', long, default_value_t = DEFAULT_WORKERS)]
    max_workers: usize,

    /// Timeout in seconds for each summarizer call.
    #[arg(short, long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Skip batches whose output file already exists.
    #[arg(long)]
    resume: bool,

    /// Summarizer program to run.
    #[arg(long, default_value = DEFAULT_BINARY)]
    binary: String,

    /// Do not pass `-y` to the summarizer.
    #[arg(long)]
    no_auto_approve: bool,
}

#[derive(Args)]
struct DedupArgs {
    /// Folder searched recursively for duplicates.
    #[arg(long, default_value = "./")]
    base_dir: PathBuf,

    /// Extension of the files to compare.
    #[arg(short, long, default_value = DEFAULT_EXTENSION)]
    extension: String,

    /// Where duplicates are moved.
    #[arg(long)]
    quarantine_dir: Option<PathBuf>,

    /// Only report what would be moved.
    #[arg(long)]
    dry_run: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct CleanArgs {
    /// Folder searched recursively for caption files.
    #[arg(long, default_value = "./")]
    base_dir: PathBuf,

    /// Extension of the files to clean.
    #[arg(short, long, default_value = DEFAULT_EXTENSION)]
    extension: String,

    /// Delete each original once its cleaned copy is written.
    #[arg(long)]
    remove_original: bool,

    /// Print the report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

impl DistillArgs {
    /// Resolve the prompt and build the run configuration.
    fn into_config(self) -> Result<(DistillConfig, GeminiCli)> {
        let prompt = match (&self.prompt, &self.prompt_file) {
            (Some(text), _) => text.clone(),
            (None, Some(path)) => fs::read_to_string(path)
                .with_context(|| format!("could not read prompt file {}", path.display()))?,
            (None, None) => DEFAULT_PROMPT.to_string(),
        };
        let summarizer = GeminiCli::new(self.binary).auto_approve(!self.no_auto_approve);
        let config = DistillConfig {
            source_dir: self.source_dir,
            extension: self.extension,
            output_dir: self.output_dir,
            model: self.model,
            prompt,
            partition: PartitionConfig {
                mode: self.batch_mode,
                batch_size: self.batch_size,
                max_batch_bytes: config::kb(self.max_batch_size_kb),
                large_file_bytes: config::kb(self.large_file_threshold_kb),
            },
            workers: self.max_workers,
            timeout_secs: self.timeout,
            resume: self.resume,
        };
        Ok((config, summarizer))
    }
}

async fn distill(args: DistillArgs) -> Result<()> {
    let (config, summarizer) = args.into_config()?;
    info!("configuration:\n{}", serde_json::to_string_pretty(&config)?);
    let distiller = Distiller::new(config, summarizer)?;
    match distiller.run().await {
        Ok(outcome) if outcome.rounds == 0 => {
            info!(
                "only one source file found, nothing to distill: {}",
                outcome.summary.display()
            );
            Ok(())
        }
        Ok(outcome) => {
            info!(
                "distillation complete after {} rounds, final summary: {}",
                outcome.rounds,
                outcome.summary.display()
            );
            Ok(())
        }
        Err(err) => {
            if err.round().is_some() {
                error!("to continue, run again with --resume");
            }
            Err(err.into())
        }
    }
}

fn dedup(args: DedupArgs) -> Result<()> {
    let opts = DedupOptions {
        base_dir: args.base_dir,
        extension: args.extension,
        quarantine_dir: args.quarantine_dir,
        dry_run: args.dry_run,
    };
    let report = dedup::deduplicate(&opts)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

fn clean(args: CleanArgs) -> Result<()> {
    let opts = CleanOptions {
        base_dir: args.base_dir,
        extension: args.extension,
        remove_original: args.remove_original,
    };
    let report = clean::clean_tree(&opts)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

/// Set up logging for the chosen verbosity and run the selected subcommand.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = if cli.debug {
        EnvFilter::default()
            .add_directive("subdistill=trace".parse()?)
            .add_directive("subdistill_core=trace".parse()?)
            .add_directive("info".parse()?)
    } else {
        EnvFilter::default()
            .add_directive("subdistill=info".parse()?)
            .add_directive("subdistill_core=info".parse()?)
            .add_directive("warn".parse()?)
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    match cli.command {
        Command::Distill(args) => distill(args).await,
        Command::Dedup(args) => dedup(args),
        Command::Clean(args) => clean(args),
    }
}
