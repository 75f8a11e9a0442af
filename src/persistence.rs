//! Persistence layer for evaluation results.
//!
//! Results are written as pretty-printed JSON, one file per task, under a
//! folder derived from the model name.

use crate::error::{EvalError, Result};
use crate::eval::benchmark::TaskResult;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Folder name used when a model identifier has no usable components.
const UNNAMED_MODEL: &str = "unnamed-model";

/// Results folder for a model: `<root>/<model_name>`.
///
/// Root, prefix and parent components of the model name are dropped so an
/// absolute checkpoint path nests under `root` instead of escaping it.
pub fn results_dir_for(root: &Path, model_name: &str) -> PathBuf {
    let relative: PathBuf = Path::new(model_name)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect();

    if relative.as_os_str().is_empty() {
        root.join(UNNAMED_MODEL)
    } else {
        root.join(relative)
    }
}

/// Result file of a task inside a model's results folder.
pub fn task_result_path(folder: &Path, task_name: &str) -> PathBuf {
    folder.join(format!("{}.json", task_name))
}

/// Save a task result, creating parent directories as needed.
pub fn save_task_result(result: &TaskResult, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }

    let data = serde_json::to_string_pretty(result)
        .map_err(|e| EvalError::Serialization(e.to_string()))?;

    fs::write(path, data).map_err(|e| EvalError::io(path, e))?;

    Ok(())
}

/// Load a task result from a file.
pub fn load_task_result(path: &Path) -> Result<TaskResult> {
    if !path.exists() {
        return Err(EvalError::ResultNotFound(path.to_path_buf()));
    }

    let data = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    let result = serde_json::from_str(&data)?;
    Ok(result)
}
