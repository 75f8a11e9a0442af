//! Retrieval Eval - dense retrieval evaluation of sentence-embedding models.
//!
//! Loads a trained embedding model (a sentence-transformers checkpoint or a
//! Hugging Face Hub model), loads a BEIR-style retrieval benchmark such as
//! HotpotQA, retrieves the top documents for every query by exact
//! similarity search and scores the rankings against the benchmark's
//! relevance judgments.
//!
//! # Quick Start
//!
//! ```no_run
//! use retrieval_eval::{
//!     config::Config,
//!     device::select_device,
//!     eval::{EmbeddingModel, RetrievalEvaluation, RetrievalTask},
//! };
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let device = select_device(config.device);
//!     let model = EmbeddingModel::load(&config.model, &device)?;
//!     let task = RetrievalTask::load(config.task, &config.data_source(), &config.eval_splits)?;
//!
//!     let tasks = [task];
//!     let results = RetrievalEvaluation::new(&tasks).run(&model, &device, &config.run_options())?;
//!
//!     for result in results {
//!         result.print_summary();
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **device**: Accelerator detection with CPU fallback
//! - **eval::embeddings**: BERT / DistilBERT encoders behind the `Encoder` trait
//! - **eval::dataset**: BEIR corpus, queries and qrels per split
//! - **eval::search**: Exact top-k retrieval
//! - **eval::metrics**: NDCG, MAP, Recall, Precision and MRR at cutoffs
//! - **eval::benchmark**: Runs tasks and writes result files
//! - **timer**: Elapsed wall-clock reporting

pub mod config;
pub mod device;
pub mod error;
pub mod eval;
pub mod persistence;
pub mod timer;

// Re-export commonly used types
pub use config::Config;
pub use device::{DevicePreference, select_device};
pub use error::{EvalError, Result};
pub use eval::{EmbeddingModel, Encoder, RetrievalEvaluation, RetrievalTask, TaskKind, TaskResult};
pub use persistence::{load_task_result, results_dir_for, save_task_result};
pub use timer::{ElapsedBreakdown, Stopwatch};
