//! Error types for dataset loading, configuration and result persistence.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur outside of model execution.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A dataset file contained a line that could not be parsed.
    #[error("Malformed record in '{path}' at line {line}: {message}")]
    DatasetFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// A required dataset file does not exist.
    #[error("Dataset file not found at '{0}'")]
    DatasetFileNotFound(PathBuf),

    /// The requested split has no relevance judgments.
    #[error("Split '{split}' is not available for task {task}")]
    MissingSplit { task: String, split: String },

    /// Task name did not match any known retrieval task.
    #[error("Unknown task '{0}'. Valid options: hotpotqa, fever")]
    UnknownTask(String),

    /// A stored result file does not exist.
    #[error("Result file not found at '{0}'")]
    ResultNotFound(PathBuf),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Hugging Face Hub download error.
    #[error("Hub download failed for '{repo}/{file}': {message}")]
    Hub {
        repo: String,
        file: String,
        message: String,
    },
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a dataset format error for a given file and 1-indexed line.
    pub fn format(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::DatasetFormat {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}
