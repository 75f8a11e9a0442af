//! Retrieval Eval CLI
//!
//! Evaluates a sentence-embedding model on a BEIR retrieval benchmark
//! (HotpotQA by default) and writes the scores under `results/<model>/`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use retrieval_eval::{
    config::Config,
    device::{DevicePreference, print_available_devices, select_device},
    eval::{DataSource, EmbeddingModel, RetrievalEvaluation, RetrievalTask, ScoreFunction, TaskKind},
    timer::{Stopwatch, report_elapsed},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Retrieval Eval - score an embedding model on a retrieval benchmark
#[derive(Parser)]
#[command(name = "retrieval-eval")]
#[command(author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the model and write result files (default)
    Run(RunArgs),

    /// Load the dataset and print query/document counts
    Stats(RunArgs),

    /// List compute devices this build can use
    Devices,
}

/// Flags shared by `run` and `stats`. Unset flags fall back to the
/// environment, then the config file, then built-in defaults.
#[derive(Args, Default, Clone)]
struct RunArgs {
    /// Local checkpoint directory or Hugging Face Hub model id
    #[arg(short, long)]
    model: Option<String>,

    /// Retrieval task (hotpotqa, fever)
    #[arg(short, long)]
    task: Option<TaskKind>,

    /// Local BEIR directory (corpus.jsonl, queries.jsonl, qrels/)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Hub dataset revision (branch, tag or commit)
    #[arg(long)]
    revision: Option<String>,

    /// Split to evaluate (repeatable)
    #[arg(long = "split")]
    splits: Vec<String>,

    /// Root folder for result files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Compute device (auto, cuda, metal, cpu)
    #[arg(short, long)]
    device: Option<DevicePreference>,

    /// Texts per encoder batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Documents scored per corpus chunk
    #[arg(long)]
    corpus_chunk_size: Option<usize>,

    /// Documents kept per query
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Similarity function (cos_sim, dot)
    #[arg(long)]
    score_function: Option<ScoreFunction>,

    /// 0 quiet, 1 main scores, 2 progress and tables, 3 debug
    #[arg(short, long)]
    verbosity: Option<u8>,

    /// Re-run even if a result file already exists
    #[arg(long)]
    overwrite: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl RunArgs {
    /// Resolve the effective configuration, flags taking precedence.
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_with(Some(path.as_path())),
            None => Config::load(),
        }
        .context("Failed to load configuration")?;

        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(task) = self.task {
            config.task = task;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = Some(data_dir);
        }
        if let Some(revision) = self.revision {
            config.dataset_revision = Some(revision);
        }
        if !self.splits.is_empty() {
            config.eval_splits = self.splits;
        }
        if let Some(output_dir) = self.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        if let Some(batch_size) = self.batch_size {
            config.search.batch_size = batch_size;
        }
        if let Some(chunk) = self.corpus_chunk_size {
            config.search.corpus_chunk_size = chunk;
        }
        if let Some(top_k) = self.top_k {
            config.search.top_k = top_k;
        }
        if let Some(score_function) = self.score_function {
            config.search.score_function = score_function;
        }
        if let Some(verbosity) = self.verbosity {
            config.verbosity = verbosity;
        }
        if self.overwrite {
            config.overwrite_results = true;
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run(args)) => cmd_run(args),
        Some(Commands::Stats(args)) => cmd_stats(args),
        Some(Commands::Devices) => {
            init_tracing(1);
            print_available_devices();
            Ok(())
        }
        None => cmd_run(cli.run),
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over verbosity.
fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "retrieval_eval=warn",
        1 | 2 => "retrieval_eval=info",
        _ => "retrieval_eval=debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn cmd_run(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    init_tracing(config.verbosity);

    let device = select_device(config.device);
    let stopwatch = Stopwatch::start();

    tracing::info!(model = %config.model, "loading embedding model");
    let model = EmbeddingModel::load(&config.model, &device)
        .with_context(|| format!("Failed to load model '{}'", config.model))?;

    let task = load_task(&config)?;
    for split in &config.eval_splits {
        task.print_stats(split);
    }

    let tasks = [task];
    RetrievalEvaluation::new(&tasks)
        .run(&model, &device, &config.run_options())
        .context("Evaluation failed")?;

    report_elapsed(&stopwatch);
    Ok(())
}

fn cmd_stats(args: RunArgs) -> Result<()> {
    let config = args.into_config()?;
    init_tracing(config.verbosity);

    let task = load_task(&config)?;

    for split in &config.eval_splits {
        if !task.has_split(split) {
            println!("{} has no '{}' split", task.name(), split);
            continue;
        }
        task.print_stats(split);
        if let Some(expected) = task.kind().published_stats(split) {
            println!(
                "Published {} {} set: {} queries, {} documents",
                task.name(),
                split,
                expected.num_queries,
                expected.num_documents
            );
        }
    }

    Ok(())
}

/// Load the configured task, checking Hub downloads against published sizes.
fn load_task(config: &Config) -> Result<RetrievalTask> {
    let source = config.data_source();
    let task = RetrievalTask::load(config.task, &source, &config.eval_splits)
        .with_context(|| format!("Failed to load dataset {}", config.task))?;

    if matches!(source, DataSource::Hub { .. }) {
        for split in &config.eval_splits {
            task.matches_published(split);
        }
    }

    Ok(task)
}
