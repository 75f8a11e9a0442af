//! Benchmark runner: embeds, retrieves, scores and persists each task.

use super::dataset::RetrievalTask;
use super::embeddings::Encoder;
use super::metrics::{RetrievalEvaluator, RetrievalMetrics};
use super::search::{ExactSearch, SearchConfig};
use crate::persistence::{load_task_result, save_task_result, task_result_path};
use anyhow::{Context, Result};
use candle_core::Device;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

/// Options for a benchmark run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Splits to evaluate. Splits a task does not have are skipped.
    pub eval_splits: Vec<String>,
    /// Folder receiving one `<TaskName>.json` per task.
    pub output_folder: PathBuf,
    /// 0 quiet, 1 main scores, 2 progress bars and score tables, 3 debug.
    pub verbosity: u8,
    /// Re-run tasks whose result file already exists.
    pub overwrite_results: bool,
    pub search: SearchConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            eval_splits: vec!["test".to_string()],
            output_folder: PathBuf::from("results"),
            verbosity: 2,
            overwrite_results: false,
            search: SearchConfig::default(),
        }
    }
}

/// Scores for one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitScores {
    pub main_score: f64,
    /// Wall-clock seconds spent embedding, retrieving and scoring.
    pub evaluation_time: f64,
    pub num_queries: usize,
    pub metrics: BTreeMap<String, f64>,
}

/// Persisted outcome of evaluating one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_name: String,
    pub dataset_revision: Option<String>,
    pub model_name: String,
    pub crate_version: String,
    pub evaluated_at: DateTime<Utc>,
    pub main_score_name: String,
    /// Scores keyed by split name.
    pub scores: BTreeMap<String, SplitScores>,
}

impl TaskResult {
    fn new(task: &RetrievalTask, model_name: &str) -> Self {
        Self {
            task_name: task.name().to_string(),
            dataset_revision: task.revision().map(str::to_string),
            model_name: model_name.to_string(),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
            evaluated_at: Utc::now(),
            main_score_name: task.kind().main_score().to_string(),
            scores: BTreeMap::new(),
        }
    }

    /// Headline score of a split.
    pub fn main_score(&self, split: &str) -> Option<f64> {
        self.scores.get(split).map(|s| s.main_score)
    }

    /// Print the headline score of every split.
    pub fn print_summary(&self) {
        for (split, scores) in &self.scores {
            println!(
                "{} [{}] {}: {:.5} ({} queries, {:.1}s)",
                self.task_name,
                split,
                self.main_score_name,
                scores.main_score,
                scores.num_queries,
                scores.evaluation_time
            );
        }
    }
}

/// Runs retrieval evaluation over a list of tasks.
pub struct RetrievalEvaluation<'t> {
    tasks: &'t [RetrievalTask],
    evaluator: RetrievalEvaluator,
}

impl<'t> RetrievalEvaluation<'t> {
    /// Create a new benchmark runner.
    pub fn new(tasks: &'t [RetrievalTask]) -> Self {
        Self {
            tasks,
            evaluator: RetrievalEvaluator::new(),
        }
    }

    /// Evaluate every task with `encoder`, writing one result file per task.
    pub fn run<E: Encoder + ?Sized>(
        &self,
        encoder: &E,
        device: &Device,
        options: &RunOptions,
    ) -> Result<Vec<TaskResult>> {
        let mut results = Vec::with_capacity(self.tasks.len());

        for task in self.tasks {
            let path = task_result_path(&options.output_folder, task.name());

            if path.exists() && !options.overwrite_results {
                tracing::info!(
                    task = task.name(),
                    path = %path.display(),
                    "result already exists, skipping"
                );
                results.push(load_task_result(&path)?);
                continue;
            }

            if options.verbosity >= 1 {
                println!("Evaluating {} with {}", task.name(), encoder.name());
            }

            let mut result = TaskResult::new(task, encoder.name());

            for split in &options.eval_splits {
                if !task.has_split(split) {
                    tracing::warn!(task = task.name(), split = %split, "split not loaded, skipping");
                    continue;
                }

                let (metrics, elapsed) = self
                    .evaluate_split(task, split, encoder, device, options)
                    .with_context(|| format!("Evaluation of {} [{}] failed", task.name(), split))?;

                if options.verbosity >= 2 {
                    println!("{} [{}]", task.name(), split);
                    print!("{}", metrics);
                }

                let score_map = metrics.to_score_map();
                let main_score = score_map
                    .get(task.kind().main_score())
                    .copied()
                    .unwrap_or(0.0);

                result.scores.insert(
                    split.clone(),
                    SplitScores {
                        main_score,
                        evaluation_time: elapsed,
                        num_queries: metrics.num_queries,
                        metrics: score_map,
                    },
                );
            }

            save_task_result(&result, &path)?;
            tracing::info!(task = task.name(), path = %path.display(), "results saved");

            if options.verbosity >= 1 {
                result.print_summary();
            }
            results.push(result);
        }

        Ok(results)
    }

    fn evaluate_split<E: Encoder + ?Sized>(
        &self,
        task: &RetrievalTask,
        split: &str,
        encoder: &E,
        device: &Device,
        options: &RunOptions,
    ) -> Result<(RetrievalMetrics, f64)> {
        let started = Instant::now();

        let queries = task.queries(split).unwrap_or_default();
        let corpus = task.corpus(split).unwrap_or_default();
        let qrels = task
            .qrels(split)
            .with_context(|| format!("No relevance judgments for split '{}'", split))?;

        let run = ExactSearch::new(encoder, device, &options.search)
            .with_progress(options.verbosity >= 2)
            .search(corpus, queries)?;

        let metrics = self.evaluator.evaluate_run(&run, qrels);
        Ok((metrics, started.elapsed().as_secs_f64()))
    }
}
