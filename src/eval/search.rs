//! Exact dense retrieval.
//!
//! Queries are embedded once. The corpus is embedded in chunks (longest
//! documents first, which keeps padding low), each chunk is scored against
//! all queries with a matrix product on the model's device, and every
//! query keeps a bounded heap of its best documents.

use super::dataset::{CorpusDoc, Query};
use super::embeddings::Encoder;
use crate::error::EvalError;
use anyhow::{Result, ensure};
use candle_core::{Device, Tensor};
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};

/// Queries scored per matrix product.
const QUERY_BLOCK: usize = 256;

/// Similarity between a query and a document embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreFunction {
    #[default]
    CosSim,
    Dot,
}

impl std::str::FromStr for ScoreFunction {
    type Err = EvalError;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "cos_sim" | "cosine" | "cos" => Ok(Self::CosSim),
            "dot" => Ok(Self::Dot),
            _ => Err(EvalError::InvalidConfig(format!(
                "Invalid score function: {}. Valid options: cos_sim, dot",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ScoreFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CosSim => write!(f, "cos_sim"),
            Self::Dot => write!(f, "dot"),
        }
    }
}

/// Configuration for retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Texts per encoder call.
    pub batch_size: usize,
    /// Corpus documents embedded and scored at a time.
    pub corpus_chunk_size: usize,
    /// Documents kept per query.
    pub top_k: usize,
    pub score_function: ScoreFunction,
    /// Never return a document whose id equals the query id.
    pub ignore_identical_ids: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: 32,
            corpus_chunk_size: 50_000,
            top_k: 1000,
            score_function: ScoreFunction::CosSim,
            ignore_identical_ids: false,
        }
    }
}

/// A retrieved document and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDoc {
    pub doc_id: String,
    pub score: f32,
}

/// Ranked documents per query id, best first.
pub type RunResults = BTreeMap<String, Vec<ScoredDoc>>;

#[derive(Debug, Clone, Copy)]
struct Candidate<'c> {
    score: f32,
    index: usize,
    id: &'c str,
}

impl Ord for Candidate<'_> {
    /// Higher score is better. Equal scores rank the larger doc id first,
    /// the order trec_eval uses, then the earlier corpus entry.
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.id.cmp(other.id))
            .then_with(|| other.index.cmp(&self.index))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate<'_> {}

/// Keeps the `k` best candidates seen so far.
#[derive(Debug)]
struct TopK<'c> {
    k: usize,
    heap: BinaryHeap<Reverse<Candidate<'c>>>,
}

impl<'c> TopK<'c> {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    fn push(&mut self, candidate: Candidate<'c>) {
        if self.heap.len() < self.k {
            self.heap.push(Reverse(candidate));
            return;
        }
        let replace = matches!(self.heap.peek(), Some(Reverse(worst)) if candidate > *worst);
        if replace {
            self.heap.pop();
            self.heap.push(Reverse(candidate));
        }
    }

    /// Candidates best first.
    fn into_ranked(self) -> Vec<Candidate<'c>> {
        self.heap.into_sorted_vec().into_iter().map(|r| r.0).collect()
    }
}

fn progress_bar(len: usize, label: &str, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("  {msg:>10} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) eta {eta}")
        .map(|s| s.progress_chars("━╸─"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_message(label.to_string());
    pb
}

fn l2_normalize(t: &Tensor) -> candle_core::Result<Tensor> {
    let norms = t.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    t.broadcast_div(&norms)
}

/// Exact nearest-neighbour search with an [`Encoder`].
pub struct ExactSearch<'a, E: Encoder + ?Sized> {
    encoder: &'a E,
    device: &'a Device,
    config: &'a SearchConfig,
    show_progress: bool,
}

impl<'a, E: Encoder + ?Sized> ExactSearch<'a, E> {
    pub fn new(encoder: &'a E, device: &'a Device, config: &'a SearchConfig) -> Self {
        Self {
            encoder,
            device,
            config,
            show_progress: false,
        }
    }

    /// Show progress bars while embedding.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn encode_all(&self, texts: &[String], label: &str) -> Result<Vec<Vec<f32>>> {
        let pb = progress_bar(texts.len(), label, self.show_progress);
        let mut out = Vec::with_capacity(texts.len());

        for batch in texts.chunks(self.config.batch_size.max(1)) {
            let refs: Vec<&str> = batch.iter().map(String::as_str).collect();
            let embeddings = self.encoder.encode(&refs)?;
            ensure!(
                embeddings.len() == refs.len(),
                "encoder returned {} embeddings for {} texts",
                embeddings.len(),
                refs.len()
            );
            out.extend(embeddings);
            pb.inc(batch.len() as u64);
        }

        pb.finish_and_clear();
        Ok(out)
    }

    /// Stack embeddings into a (rows, dim) tensor on the device.
    fn to_matrix(&self, rows: Vec<Vec<f32>>) -> Result<Tensor> {
        let n = rows.len();
        let dim = rows.first().map(Vec::len).unwrap_or(0);
        ensure!(
            rows.iter().all(|r| r.len() == dim),
            "embeddings have inconsistent dimensions"
        );
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let matrix = Tensor::from_vec(flat, (n, dim), self.device)?;
        Ok(match self.config.score_function {
            ScoreFunction::CosSim => l2_normalize(&matrix)?,
            ScoreFunction::Dot => matrix,
        })
    }

    /// Retrieve the top documents of `corpus` for every query.
    pub fn search(&self, corpus: &[CorpusDoc], queries: &[Query]) -> Result<RunResults> {
        let mut results: RunResults = queries
            .iter()
            .map(|q| (q.id.clone(), Vec::new()))
            .collect();
        if queries.is_empty() || corpus.is_empty() {
            return Ok(results);
        }

        tracing::info!(
            queries = queries.len(),
            documents = corpus.len(),
            model = self.encoder.name(),
            score_function = %self.config.score_function,
            "encoding queries"
        );
        let query_texts: Vec<String> = queries.iter().map(|q| q.text.clone()).collect();
        let query_matrix = self.to_matrix(self.encode_all(&query_texts, "queries")?)?;

        let mut order: Vec<usize> = (0..corpus.len()).collect();
        order.sort_by_key(|&i| Reverse(corpus[i].title.len() + corpus[i].text.len()));

        let mut heaps: Vec<TopK> = queries
            .iter()
            .map(|_| TopK::new(self.config.top_k))
            .collect();

        let chunk_size = self.config.corpus_chunk_size.max(1);
        let num_chunks = order.len().div_ceil(chunk_size);

        for (chunk_idx, chunk) in order.chunks(chunk_size).enumerate() {
            tracing::info!("encoding corpus chunk {}/{}", chunk_idx + 1, num_chunks);

            let texts: Vec<String> = chunk.iter().map(|&i| corpus[i].full_text()).collect();
            let doc_matrix = self.to_matrix(self.encode_all(&texts, "corpus")?)?;
            let doc_matrix_t = doc_matrix.t()?.contiguous()?;

            let mut start = 0;
            while start < queries.len() {
                let len = QUERY_BLOCK.min(queries.len() - start);
                let block = query_matrix.narrow(0, start, len)?;
                let scores = block.matmul(&doc_matrix_t)?.to_vec2::<f32>()?;

                for (row, row_scores) in scores.into_iter().enumerate() {
                    let q = start + row;
                    for (col, score) in row_scores.into_iter().enumerate() {
                        let index = chunk[col];
                        if self.config.ignore_identical_ids && corpus[index].id == queries[q].id {
                            continue;
                        }
                        heaps[q].push(Candidate {
                            score,
                            index,
                            id: &corpus[index].id,
                        });
                    }
                }
                start += len;
            }
        }

        for (query, heap) in queries.iter().zip(heaps) {
            let ranked = heap
                .into_ranked()
                .into_iter()
                .map(|c| ScoredDoc {
                    doc_id: c.id.to_string(),
                    score: c.score,
                })
                .collect();
            results.insert(query.id.clone(), ranked);
        }

        Ok(results)
    }
}
