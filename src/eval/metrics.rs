//! Retrieval evaluation metrics
//!
//! Standard IR metrics with trec_eval cut semantics:
//! - NDCG@K: Normalized Discounted Cumulative Gain with graded (linear) gains
//! - MAP@K: Mean Average Precision, normalized by the number of relevant docs
//! - Recall@K: Proportion of relevant items found in top-K
//! - Precision@K: Proportion of top-K items that are relevant
//! - MRR@K: Reciprocal rank of the first relevant item within top-K

use super::dataset::Qrels;
use super::search::RunResults;
use std::collections::{BTreeMap, HashMap};

/// Cutoffs reported for every metric.
pub const DEFAULT_K_VALUES: [usize; 7] = [1, 3, 5, 10, 20, 100, 1000];

/// Single query evaluation input
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Query identifier
    pub query_id: String,
    /// Retrieved document IDs in ranked order
    pub retrieved: Vec<String>,
    /// Graded relevance judgments (document ID -> grade)
    pub judgments: HashMap<String, i32>,
}

impl QueryResult {
    /// Create a new query result
    pub fn new(
        query_id: impl Into<String>,
        retrieved: Vec<String>,
        judgments: HashMap<String, i32>,
    ) -> Self {
        Self {
            query_id: query_id.into(),
            retrieved,
            judgments,
        }
    }

    fn gain(&self, doc: &str) -> f64 {
        self.judgments.get(doc).map_or(0.0, |&g| g.max(0) as f64)
    }

    fn is_relevant(&self, doc: &str) -> bool {
        self.judgments.get(doc).is_some_and(|&g| g > 0)
    }

    /// Number of documents judged relevant (grade > 0)
    pub fn num_relevant(&self) -> usize {
        self.judgments.values().filter(|&&g| g > 0).count()
    }

    fn hits_at_k(&self, k: usize) -> usize {
        self.retrieved
            .iter()
            .take(k)
            .filter(|d| self.is_relevant(d))
            .count()
    }

    /// Compute Recall@K
    ///
    /// Recall@K = |relevant ∩ retrieved@K| / |relevant|
    pub fn recall_at_k(&self, k: usize) -> f64 {
        let num_relevant = self.num_relevant();
        if num_relevant == 0 {
            return 0.0;
        }
        self.hits_at_k(k) as f64 / num_relevant as f64
    }

    /// Compute Precision@K
    ///
    /// Precision@K = |relevant ∩ retrieved@K| / K
    pub fn precision_at_k(&self, k: usize) -> f64 {
        if k == 0 {
            return 0.0;
        }
        self.hits_at_k(k) as f64 / k as f64
    }

    /// Compute Reciprocal Rank within the top K
    pub fn reciprocal_rank_at_k(&self, k: usize) -> f64 {
        self.retrieved
            .iter()
            .take(k)
            .position(|d| self.is_relevant(d))
            .map_or(0.0, |i| 1.0 / (i + 1) as f64)
    }

    /// Compute DCG@K
    ///
    /// DCG@K = Σ(gain_i / log2(i+1)) for i in 1..K
    pub fn dcg_at_k(&self, k: usize) -> f64 {
        self.retrieved
            .iter()
            .take(k)
            .enumerate()
            .map(|(i, doc)| self.gain(doc) / (i as f64 + 2.0).log2())
            .sum()
    }

    /// Compute Ideal DCG@K from the judgments sorted by grade
    pub fn idcg_at_k(&self, k: usize) -> f64 {
        let mut grades: Vec<i32> = self.judgments.values().copied().filter(|&g| g > 0).collect();
        grades.sort_unstable_by(|a, b| b.cmp(a));
        grades
            .into_iter()
            .take(k)
            .enumerate()
            .map(|(i, g)| g as f64 / (i as f64 + 2.0).log2())
            .sum()
    }

    /// Compute NDCG@K
    pub fn ndcg_at_k(&self, k: usize) -> f64 {
        let idcg = self.idcg_at_k(k);
        if idcg == 0.0 {
            return 0.0;
        }
        self.dcg_at_k(k) / idcg
    }

    /// Compute Average Precision over the top K
    ///
    /// AP@K = (1/|relevant|) * Σ(Precision@i * rel(i)) for i in 1..K
    pub fn average_precision_at_k(&self, k: usize) -> f64 {
        let num_relevant = self.num_relevant();
        if num_relevant == 0 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut relevant_count = 0;
        for (i, doc) in self.retrieved.iter().take(k).enumerate() {
            if self.is_relevant(doc) {
                relevant_count += 1;
                sum += relevant_count as f64 / (i + 1) as f64;
            }
        }

        sum / num_relevant as f64
    }
}

/// Aggregated metrics across queries, keyed by cutoff.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalMetrics {
    pub ndcg: BTreeMap<usize, f64>,
    pub map: BTreeMap<usize, f64>,
    pub recall: BTreeMap<usize, f64>,
    pub precision: BTreeMap<usize, f64>,
    pub mrr: BTreeMap<usize, f64>,
    /// Number of queries evaluated
    pub num_queries: usize,
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

impl RetrievalMetrics {
    /// Flatten into `<metric>_at_<k>` keys.
    pub fn to_score_map(&self) -> BTreeMap<String, f64> {
        let mut scores = BTreeMap::new();
        for (name, values) in [
            ("ndcg", &self.ndcg),
            ("map", &self.map),
            ("recall", &self.recall),
            ("precision", &self.precision),
            ("mrr", &self.mrr),
        ] {
            for (k, v) in values {
                scores.insert(format!("{}_at_{}", name, k), *v);
            }
        }
        scores
    }
}

impl std::fmt::Display for RetrievalMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Retrieval Metrics ({} queries):", self.num_queries)?;
        writeln!(
            f,
            "  {:>6}  {:>8}  {:>8}  {:>8}  {:>9}  {:>8}",
            "k", "NDCG", "MAP", "Recall", "Precision", "MRR"
        )?;
        for k in self.ndcg.keys() {
            writeln!(
                f,
                "  {:>6}  {:>8.5}  {:>8.5}  {:>8.5}  {:>9.5}  {:>8.5}",
                k,
                self.ndcg[k],
                self.map.get(k).copied().unwrap_or(0.0),
                self.recall.get(k).copied().unwrap_or(0.0),
                self.precision.get(k).copied().unwrap_or(0.0),
                self.mrr.get(k).copied().unwrap_or(0.0),
            )?;
        }
        Ok(())
    }
}

/// Retrieval evaluator
#[derive(Debug, Clone)]
pub struct RetrievalEvaluator {
    /// K values to compute metrics for
    k_values: Vec<usize>,
}

impl Default for RetrievalEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl RetrievalEvaluator {
    /// Create a new evaluator with the default cutoffs
    pub fn new() -> Self {
        Self {
            k_values: DEFAULT_K_VALUES.to_vec(),
        }
    }

    /// Create an evaluator with custom cutoffs
    pub fn with_k_values(k_values: Vec<usize>) -> Self {
        Self { k_values }
    }

    /// Average per-query metrics, rounded to five decimals.
    ///
    /// Queries without any relevant judgment are skipped.
    pub fn evaluate(&self, results: &[QueryResult]) -> RetrievalMetrics {
        let scored: Vec<&QueryResult> = results.iter().filter(|r| r.num_relevant() > 0).collect();
        let skipped = results.len() - scored.len();
        if skipped > 0 {
            tracing::debug!(skipped, "queries without relevant judgments were not scored");
        }

        let mut metrics = RetrievalMetrics {
            num_queries: scored.len(),
            ..Default::default()
        };
        if scored.is_empty() {
            return metrics;
        }

        let n = scored.len() as f64;
        let mean = |f: &dyn Fn(&QueryResult) -> f64| round5(scored.iter().map(|&r| f(r)).sum::<f64>() / n);

        for &k in &self.k_values {
            metrics.ndcg.insert(k, mean(&|r| r.ndcg_at_k(k)));
            metrics.map.insert(k, mean(&|r| r.average_precision_at_k(k)));
            metrics.recall.insert(k, mean(&|r| r.recall_at_k(k)));
            metrics.precision.insert(k, mean(&|r| r.precision_at_k(k)));
            metrics.mrr.insert(k, mean(&|r| r.reciprocal_rank_at_k(k)));
        }

        metrics
    }

    /// Score a retrieval run against relevance judgments.
    ///
    /// Only judged queries are evaluated; a judged query missing from the
    /// run counts as retrieving nothing.
    pub fn evaluate_run(&self, run: &RunResults, qrels: &Qrels) -> RetrievalMetrics {
        let mut query_ids: Vec<&String> = qrels.keys().collect();
        query_ids.sort();

        let results: Vec<QueryResult> = query_ids
            .into_iter()
            .map(|qid| {
                let retrieved = run
                    .get(qid)
                    .map(|docs| docs.iter().map(|d| d.doc_id.clone()).collect())
                    .unwrap_or_default();
                QueryResult::new(qid.clone(), retrieved, qrels[qid].clone())
            })
            .collect();

        self.evaluate(&results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::search::ScoredDoc;

    fn judgments(pairs: &[(&str, i32)]) -> HashMap<String, i32> {
        pairs.iter().map(|(d, g)| (d.to_string(), *g)).collect()
    }

    fn retrieved(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_perfect_ranking() {
        let r = QueryResult::new(
            "q",
            retrieved(&["a", "b", "c"]),
            judgments(&[("a", 1), ("b", 1)]),
        );
        assert!((r.ndcg_at_k(10) - 1.0).abs() < 1e-9);
        assert!((r.recall_at_k(2) - 1.0).abs() < 1e-9);
        assert!((r.precision_at_k(2) - 1.0).abs() < 1e-9);
        assert!((r.reciprocal_rank_at_k(10) - 1.0).abs() < 1e-9);
        assert!((r.average_precision_at_k(10) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_hand_computed_values() {
        // relevant docs at ranks 2 and 4 out of two relevant
        let r = QueryResult::new(
            "q",
            retrieved(&["x", "a", "y", "b"]),
            judgments(&[("a", 1), ("b", 1)]),
        );

        assert!((r.reciprocal_rank_at_k(10) - 0.5).abs() < 1e-9);
        assert_eq!(r.reciprocal_rank_at_k(1), 0.0);
        assert!((r.recall_at_k(3) - 0.5).abs() < 1e-9);
        assert!((r.precision_at_k(4) - 0.5).abs() < 1e-9);
        // AP = (1/2 + 2/4) / 2
        assert!((r.average_precision_at_k(10) - 0.5).abs() < 1e-9);
        // MAP@3 only sees the hit at rank 2 but still divides by 2 relevant
        assert!((r.average_precision_at_k(3) - 0.25).abs() < 1e-9);

        let dcg = 1.0 / 3f64.log2() + 1.0 / 5f64.log2();
        let idcg = 1.0 + 1.0 / 3f64.log2();
        assert!((r.ndcg_at_k(10) - dcg / idcg).abs() < 1e-9);
    }

    #[test]
    fn test_graded_relevance_uses_linear_gain() {
        let r = QueryResult::new(
            "q",
            retrieved(&["low", "high"]),
            judgments(&[("high", 2), ("low", 1)]),
        );
        let dcg = 1.0 + 2.0 / 3f64.log2();
        let idcg = 2.0 + 1.0 / 3f64.log2();
        assert!((r.ndcg_at_k(2) - dcg / idcg).abs() < 1e-9);
    }

    #[test]
    fn test_zero_grades_are_not_relevant() {
        let r = QueryResult::new("q", retrieved(&["a"]), judgments(&[("a", 0)]));
        assert_eq!(r.num_relevant(), 0);
        assert_eq!(r.recall_at_k(1), 0.0);
        assert_eq!(r.ndcg_at_k(1), 0.0);
    }

    #[test]
    fn test_evaluate_averages_and_skips_unjudged() {
        let results = vec![
            QueryResult::new("q1", retrieved(&["a"]), judgments(&[("a", 1)])),
            QueryResult::new("q2", retrieved(&["x"]), judgments(&[("b", 1)])),
            QueryResult::new("q3", retrieved(&["a"]), judgments(&[("a", 0)])),
        ];
        let metrics = RetrievalEvaluator::with_k_values(vec![1]).evaluate(&results);
        assert_eq!(metrics.num_queries, 2);
        assert_eq!(metrics.ndcg[&1], 0.5);
        assert_eq!(metrics.mrr[&1], 0.5);

        let scores = metrics.to_score_map();
        assert_eq!(scores["ndcg_at_1"], 0.5);
        assert!(scores.contains_key("precision_at_1"));
        assert_eq!(scores.len(), 5);
    }

    #[test]
    fn test_values_are_rounded_to_five_decimals() {
        let results = vec![
            QueryResult::new("q1", retrieved(&["a"]), judgments(&[("a", 1)])),
            QueryResult::new("q2", retrieved(&["x"]), judgments(&[("b", 1)])),
            QueryResult::new("q3", retrieved(&["x"]), judgments(&[("b", 1)])),
        ];
        let metrics = RetrievalEvaluator::with_k_values(vec![1]).evaluate(&results);
        assert_eq!(metrics.recall[&1], 0.33333);
    }

    #[test]
    fn test_evaluate_run_treats_missing_queries_as_empty() {
        let mut run = RunResults::new();
        run.insert(
            "q1".to_string(),
            vec![ScoredDoc {
                doc_id: "a".to_string(),
                score: 0.9,
            }],
        );
        let mut qrels = Qrels::new();
        qrels.insert("q1".to_string(), judgments(&[("a", 1)]));
        qrels.insert("q2".to_string(), judgments(&[("b", 1)]));

        let metrics = RetrievalEvaluator::new().evaluate_run(&run, &qrels);
        assert_eq!(metrics.num_queries, 2);
        assert_eq!(metrics.ndcg[&10], 0.5);
        assert_eq!(metrics.ndcg.len(), DEFAULT_K_VALUES.len());
    }

    #[test]
    fn test_empty_input() {
        let metrics = RetrievalEvaluator::new().evaluate(&[]);
        assert_eq!(metrics.num_queries, 0);
        assert!(metrics.to_score_map().is_empty());
    }
}
