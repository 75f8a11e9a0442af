//! Retrieval evaluation of embedding models.
//!
//! This module provides:
//! - Benchmark dataset loading in BEIR layout (HotpotQA, FEVER)
//! - Local embedding models (candle + sentence-transformers checkpoints)
//! - Exact dense retrieval and trec_eval-style metrics
//! - A runner that evaluates tasks and persists results

pub mod benchmark;
pub mod dataset;
pub mod embeddings;
pub mod metrics;
pub mod search;

pub use benchmark::{RetrievalEvaluation, RunOptions, SplitScores, TaskResult};
pub use dataset::{CorpusDoc, DataSource, Query, Qrels, RetrievalTask, SplitStats, TaskKind};
pub use embeddings::{EmbeddingModel, Encoder, Pooling};
pub use metrics::{RetrievalEvaluator, RetrievalMetrics};
pub use search::{ExactSearch, RunResults, ScoreFunction, ScoredDoc, SearchConfig};

#[cfg(test)]
pub(crate) mod test_support {
    //! Deterministic fixtures for tests that must not load model weights.

    use super::dataset::{CorpusDoc, Query};
    use super::embeddings::Encoder;
    use std::path::Path;

    const VOCABULARY: [&str; 6] = ["rust", "python", "ocean", "mountain", "music", "chess"];

    /// Bag-of-keywords encoder: one dimension per vocabulary word.
    pub struct KeywordEncoder {
        name: String,
        fail: bool,
    }

    impl Default for KeywordEncoder {
        fn default() -> Self {
            Self::named("keyword-encoder")
        }
    }

    impl KeywordEncoder {
        pub fn named(name: &str) -> Self {
            Self {
                name: name.to_string(),
                fail: false,
            }
        }

        /// An encoder whose every call errors.
        pub fn failing() -> Self {
            Self {
                name: "failing".to_string(),
                fail: true,
            }
        }
    }

    impl Encoder for KeywordEncoder {
        fn encode(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            if self.fail {
                anyhow::bail!("encoder failure");
            }
            Ok(texts
                .iter()
                .map(|text| {
                    let lower = text.to_lowercase();
                    VOCABULARY
                        .iter()
                        .map(|word| lower.split_whitespace().filter(|w| w == word).count() as f32)
                        .collect()
                })
                .collect())
        }

        fn dimension(&self) -> usize {
            VOCABULARY.len()
        }

        fn name(&self) -> &str {
            &self.name
        }
    }

    fn doc(id: &str, title: &str, text: &str) -> CorpusDoc {
        CorpusDoc {
            id: id.to_string(),
            title: title.to_string(),
            text: text.to_string(),
        }
    }

    pub fn fixture_corpus() -> Vec<CorpusDoc> {
        vec![
            doc("d1", "Rust Language", "rust systems programming rust"),
            doc("d2", "Python", "python scripting language"),
            doc("d3", "Pacific", "the ocean is a vast ocean"),
            doc("d4", "Everest", "mountain climbing at altitude"),
            doc("d5", "Jazz", "music improvisation"),
            doc("d6", "Openings", "chess strategy and chess tactics"),
        ]
    }

    pub fn fixture_queries() -> Vec<Query> {
        [
            ("q1", "rust programming"),
            ("q2", "ocean tides"),
            ("q3", "music and chess"),
            ("q4", "python"),
        ]
        .into_iter()
        .map(|(id, text)| Query {
            id: id.to_string(),
            text: text.to_string(),
        })
        .collect()
    }

    /// Write the fixture corpus in BEIR layout with a `test` qrels file.
    ///
    /// `q4` is deliberately left without judgments.
    pub fn write_beir_fixture(dir: &Path) {
        let corpus: String = fixture_corpus()
            .iter()
            .map(|d| {
                format!(
                    "{}\n",
                    serde_json::json!({"_id": d.id, "title": d.title, "text": d.text})
                )
            })
            .collect();
        std::fs::write(dir.join("corpus.jsonl"), corpus).unwrap();

        let queries: String = fixture_queries()
            .iter()
            .map(|q| format!("{}\n", serde_json::json!({"_id": q.id, "text": q.text})))
            .collect();
        std::fs::write(dir.join("queries.jsonl"), queries).unwrap();

        std::fs::create_dir_all(dir.join("qrels")).unwrap();
        std::fs::write(
            dir.join("qrels").join("test.tsv"),
            "query-id\tcorpus-id\tscore\nq1\td1\t1\nq2\td3\t1\nq3\td5\t1\nq3\td6\t1\n",
        )
        .unwrap();
    }
}
