//! Configuration for an evaluation run.
//!
//! Supports an optional YAML config file and environment variables.
//! Environment variables take precedence over config file values; command
//! line flags (applied by the binary) take precedence over both.

use crate::device::DevicePreference;
use crate::error::{EvalError, Result};
use crate::eval::benchmark::RunOptions;
use crate::eval::dataset::{DataSource, TaskKind};
use crate::eval::search::{ScoreFunction, SearchConfig};
use crate::persistence::results_dir_for;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Checkpoint evaluated when nothing else is configured.
pub const DEFAULT_MODEL: &str = "output/distilbert-base-uncased-hotpotqa-lr1e-5-epochs10-temperature20_full_dev/checkpoint-106250";

/// Root folder under which per-model result directories are created.
pub const DEFAULT_OUTPUT_DIR: &str = "results";

/// Default verbosity (progress bars and per-split score tables).
pub const DEFAULT_VERBOSITY: u8 = 2;

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Local checkpoint directory or Hugging Face Hub model id.
    pub model: String,

    /// Retrieval task to evaluate.
    pub task: TaskKind,

    /// Local BEIR-layout directory. When unset the task is fetched from the Hub.
    pub data_dir: Option<PathBuf>,

    /// Hub dataset revision (branch, tag or commit). Defaults to the
    /// task's pinned commit.
    pub dataset_revision: Option<String>,

    /// Splits to evaluate.
    pub eval_splits: Vec<String>,

    /// Root folder for result files.
    pub output_dir: PathBuf,

    /// Compute device preference.
    pub device: DevicePreference,

    /// Console verbosity, 0 (quiet) to 3 (debug).
    pub verbosity: u8,

    /// Re-run tasks whose result file already exists.
    pub overwrite_results: bool,

    /// Retrieval settings.
    pub search: SearchConfig,
}

impl Default for Config {
    fn default() -> Self {
        let task = TaskKind::HotpotQa;
        Self {
            model: DEFAULT_MODEL.to_string(),
            task,
            data_dir: None,
            dataset_revision: None,
            eval_splits: task.eval_splits().iter().map(|s| s.to_string()).collect(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            device: DevicePreference::Auto,
            verbosity: DEFAULT_VERBOSITY,
            overwrite_results: false,
            search: SearchConfig::default(),
        }
    }
}

/// Configuration file structure (YAML format).
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    model: Option<String>,
    task: Option<String>,
    data_dir: Option<PathBuf>,
    dataset_revision: Option<String>,
    eval_splits: Option<Vec<String>>,
    output_dir: Option<PathBuf>,
    device: Option<String>,
    verbosity: Option<u8>,
    overwrite_results: Option<bool>,
    search: Option<SearchFileSection>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchFileSection {
    batch_size: Option<usize>,
    corpus_chunk_size: Option<usize>,
    top_k: Option<usize>,
    score_function: Option<String>,
    ignore_identical_ids: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file (if present) and
    /// environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (EVAL_MODEL, EVAL_TASK, EVAL_DATA_DIR, ...)
    /// 2. Config file (~/.config/retrieval-eval/config.yaml)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path().filter(|p| p.exists());
        Self::load_with(path.as_deref())
    }

    /// Like [`Config::load`] but reading an explicit config file.
    pub fn load_with(config_path: Option<&Path>) -> Result<Self> {
        let mut config = match config_path {
            Some(path) => Self::load_from_file(path)?,
            None => Config::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| EvalError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(model) = file_config.model {
            config.model = model;
        }
        if let Some(task) = file_config.task {
            config.task = task.parse()?;
            config.eval_splits = config
                .task
                .eval_splits()
                .iter()
                .map(|s| s.to_string())
                .collect();
        }
        if let Some(data_dir) = file_config.data_dir {
            config.data_dir = Some(data_dir);
        }
        if let Some(revision) = file_config.dataset_revision {
            config.dataset_revision = Some(revision);
        }
        if let Some(splits) = file_config.eval_splits {
            config.eval_splits = splits;
        }
        if let Some(output_dir) = file_config.output_dir {
            config.output_dir = output_dir;
        }
        if let Some(device) = file_config.device {
            config.device = device
                .parse()
                .map_err(|e: anyhow::Error| EvalError::Config(e.to_string()))?;
        }
        if let Some(verbosity) = file_config.verbosity {
            config.verbosity = verbosity;
        }
        if let Some(overwrite) = file_config.overwrite_results {
            config.overwrite_results = overwrite;
        }

        if let Some(search) = file_config.search {
            if let Some(batch_size) = search.batch_size {
                config.search.batch_size = batch_size;
            }
            if let Some(chunk) = search.corpus_chunk_size {
                config.search.corpus_chunk_size = chunk;
            }
            if let Some(top_k) = search.top_k {
                config.search.top_k = top_k;
            }
            if let Some(score_function) = search.score_function {
                config.search.score_function = score_function.parse::<ScoreFunction>()?;
            }
            if let Some(ignore) = search.ignore_identical_ids {
                config.search.ignore_identical_ids = ignore;
            }
        }

        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(model) = env::var("EVAL_MODEL") {
            self.model = model;
        }

        if let Ok(task) = env::var("EVAL_TASK") {
            self.task = task.parse()?;
        }

        if let Ok(data_dir) = env::var("EVAL_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(data_dir));
        }

        if let Ok(output_dir) = env::var("EVAL_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(output_dir);
        }

        if let Ok(device) = env::var("EVAL_DEVICE") {
            if let Ok(pref) = device.parse() {
                self.device = pref;
            }
        }

        if let Ok(batch_size) = env::var("EVAL_BATCH_SIZE") {
            if let Ok(size) = batch_size.parse() {
                self.search.batch_size = size;
            }
        }

        if let Ok(top_k) = env::var("EVAL_TOP_K") {
            if let Ok(k) = top_k.parse() {
                self.search.top_k = k;
            }
        }

        Ok(())
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "retrieval-eval")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Where the dataset should be read from.
    pub fn data_source(&self) -> DataSource {
        match &self.data_dir {
            Some(dir) => DataSource::Local(dir.clone()),
            None => DataSource::Hub {
                revision: self.dataset_revision.clone(),
            },
        }
    }

    /// Folder receiving this model's result files.
    pub fn results_folder(&self) -> PathBuf {
        results_dir_for(&self.output_dir, &self.model)
    }

    /// Runner options derived from this configuration.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            eval_splits: self.eval_splits.clone(),
            output_folder: self.results_folder(),
            verbosity: self.verbosity,
            overwrite_results: self.overwrite_results,
            search: self.search.clone(),
        }
    }

    /// Validate the configuration before a run.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(EvalError::InvalidConfig(
                "Model is required. Set EVAL_MODEL, pass --model or add to config file."
                    .to_string(),
            ));
        }

        if self.eval_splits.is_empty() {
            return Err(EvalError::InvalidConfig(
                "At least one evaluation split is required".to_string(),
            ));
        }

        if self.search.batch_size == 0 {
            return Err(EvalError::InvalidConfig(
                "batch_size must be greater than zero".to_string(),
            ));
        }

        if self.search.corpus_chunk_size == 0 {
            return Err(EvalError::InvalidConfig(
                "corpus_chunk_size must be greater than zero".to_string(),
            ));
        }

        if self.search.top_k == 0 {
            return Err(EvalError::InvalidConfig(
                "top_k must be greater than zero".to_string(),
            ));
        }

        if self.verbosity > 3 {
            return Err(EvalError::InvalidConfig(format!(
                "verbosity must be between 0 and 3, got {}",
                self.verbosity
            )));
        }

        Ok(())
    }
}
