//! Retrieval benchmark loading.
//!
//! Tasks are stored in the BEIR layout:
//! - `corpus.jsonl` with one `{"_id", "title", "text"}` document per line
//! - `queries.jsonl` with one `{"_id", "text"}` query per line
//! - `qrels/<split>.tsv` with a `query-id  corpus-id  score` header
//!
//! The corpus is shared by every split. The queries of a split are the
//! ones that have relevance judgments in that split's qrels file.

use crate::error::{EvalError, Result};
use hf_hub::api::sync::{Api, ApiError};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Relevance judgments: query id -> (document id -> graded relevance).
pub type Qrels = HashMap<String, HashMap<String, i32>>;

/// Known retrieval tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    HotpotQa,
    Fever,
}

impl TaskKind {
    /// Display name, also used as the result file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HotpotQa => "HotpotQA",
            Self::Fever => "FEVER",
        }
    }

    /// Hugging Face Hub dataset repository holding the BEIR files.
    pub fn hub_repo(&self) -> &'static str {
        match self {
            Self::HotpotQa => "mteb/hotpotqa",
            Self::Fever => "mteb/fever",
        }
    }

    /// Dataset commit the benchmark is scored at.
    pub fn default_revision(&self) -> &'static str {
        match self {
            Self::HotpotQa => "ab518f4d6fcca38d87c25209f94beba119d02014",
            Self::Fever => "bea83ef9e8fb933d90a2f1d5515737465d613e12",
        }
    }

    /// Revision to download: the requested one, else the pinned commit.
    pub fn hub_revision<'a>(&self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(self.default_revision())
    }

    /// Splits the benchmark is scored on.
    pub fn eval_splits(&self) -> &'static [&'static str] {
        &["test"]
    }

    /// Headline metric reported for the task.
    pub fn main_score(&self) -> &'static str {
        "ndcg_at_10"
    }

    /// Upstream published sizes for a split, when known.
    pub fn published_stats(&self, split: &str) -> Option<SplitStats> {
        match (self, split) {
            (Self::HotpotQa, "test") => Some(SplitStats {
                num_queries: 7_405,
                num_documents: 5_233_329,
            }),
            (Self::Fever, "test") => Some(SplitStats {
                num_queries: 6_666,
                num_documents: 5_416_568,
            }),
            _ => None,
        }
    }
}

impl std::str::FromStr for TaskKind {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hotpotqa" => Ok(Self::HotpotQa),
            "fever" => Ok(Self::Fever),
            _ => Err(EvalError::UnknownTask(s.to_string())),
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Query and document counts for one split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitStats {
    pub num_queries: usize,
    pub num_documents: usize,
}

/// A corpus document.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusDoc {
    pub id: String,
    pub title: String,
    pub text: String,
}

impl CorpusDoc {
    /// Text fed to the encoder: title and body joined by a space.
    pub fn full_text(&self) -> String {
        if self.title.is_empty() {
            self.text.trim().to_string()
        } else {
            format!("{} {}", self.title, self.text).trim().to_string()
        }
    }
}

/// A benchmark query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: String,
    pub text: String,
}

/// Queries and judgments for a single split.
#[derive(Debug, Clone, Default)]
struct SplitData {
    queries: Vec<Query>,
    qrels: Qrels,
}

/// Where task files come from.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    /// A local directory in BEIR layout.
    Local(PathBuf),
    /// The task's Hub dataset repository. Without a revision the task's
    /// pinned commit is used.
    Hub { revision: Option<String> },
}

/// Resolved on-disk locations of a task's files.
#[derive(Debug, Clone)]
struct BeirFiles {
    corpus: PathBuf,
    queries: PathBuf,
    qrels: BTreeMap<String, PathBuf>,
}

impl BeirFiles {
    fn from_dir(kind: TaskKind, dir: &Path, splits: &[String]) -> Result<Self> {
        let corpus = dir.join("corpus.jsonl");
        let queries = dir.join("queries.jsonl");
        for path in [&corpus, &queries] {
            if !path.exists() {
                return Err(EvalError::DatasetFileNotFound(path.clone()));
            }
        }

        let mut qrels = BTreeMap::new();
        for split in splits {
            let path = dir.join("qrels").join(format!("{}.tsv", split));
            if !path.exists() {
                return Err(EvalError::MissingSplit {
                    task: kind.name().to_string(),
                    split: split.clone(),
                });
            }
            qrels.insert(split.clone(), path);
        }

        Ok(Self {
            corpus,
            queries,
            qrels,
        })
    }

    /// Download task files, returning them with the commit they came from.
    fn from_hub(kind: TaskKind, revision: &str, splits: &[String]) -> Result<(Self, String)> {
        let repo_id = kind.hub_repo();
        let hub_error = |file: &str, e: ApiError| EvalError::Hub {
            repo: repo_id.to_string(),
            file: file.to_string(),
            message: e.to_string(),
        };

        let api = Api::new().map_err(|e| hub_error("", e))?;
        let repo = api.repo(Repo::with_revision(
            repo_id.to_string(),
            RepoType::Dataset,
            revision.to_string(),
        ));

        // The file listing separates an absent split from a failed download.
        let info = repo.info().map_err(|e| hub_error("", e))?;
        let available: HashSet<&str> = info
            .siblings
            .iter()
            .map(|s| s.rfilename.as_str())
            .collect();
        check_splits(kind, &available, splits)?;

        let fetch = |file: &str| {
            tracing::info!(repo = repo_id, revision, file, "fetching dataset file");
            repo.get(file).map_err(|e| hub_error(file, e))
        };

        let corpus = fetch("corpus.jsonl")?;
        let queries = fetch("queries.jsonl")?;
        let mut qrels = BTreeMap::new();
        for split in splits {
            qrels.insert(split.clone(), fetch(&qrels_file(split))?);
        }

        let files = Self {
            corpus,
            queries,
            qrels,
        };
        Ok((files, info.sha))
    }
}

/// Repository path of a split's qrels file.
fn qrels_file(split: &str) -> String {
    format!("qrels/{}.tsv", split)
}

/// Fail with `MissingSplit` for the first split without a qrels file.
fn check_splits(kind: TaskKind, available: &HashSet<&str>, splits: &[String]) -> Result<()> {
    match splits
        .iter()
        .find(|split| !available.contains(qrels_file(split).as_str()))
    {
        Some(split) => Err(EvalError::MissingSplit {
            task: kind.name().to_string(),
            split: split.clone(),
        }),
        None => Ok(()),
    }
}

/// A loaded retrieval task.
#[derive(Debug, Clone)]
pub struct RetrievalTask {
    kind: TaskKind,
    revision: Option<String>,
    corpus: Vec<CorpusDoc>,
    splits: BTreeMap<String, SplitData>,
}

impl RetrievalTask {
    /// Load `splits` of a task from `source`.
    pub fn load(kind: TaskKind, source: &DataSource, splits: &[String]) -> Result<Self> {
        let (files, revision) = match source {
            DataSource::Local(dir) => {
                tracing::info!(task = kind.name(), dir = %dir.display(), "loading task from disk");
                (BeirFiles::from_dir(kind, dir, splits)?, None)
            }
            DataSource::Hub { revision } => {
                let revision = kind.hub_revision(revision.as_deref());
                tracing::info!(
                    task = kind.name(),
                    repo = kind.hub_repo(),
                    revision,
                    "loading task from hub"
                );
                let (files, commit) = BeirFiles::from_hub(kind, revision, splits)?;
                (files, Some(commit))
            }
        };

        let mut task = Self::from_files(kind, &files)?;
        task.revision = revision;
        Ok(task)
    }

    /// Load a task from a local BEIR directory.
    pub fn from_dir(kind: TaskKind, dir: &Path, splits: &[String]) -> Result<Self> {
        Self::load(kind, &DataSource::Local(dir.to_path_buf()), splits)
    }

    fn from_files(kind: TaskKind, files: &BeirFiles) -> Result<Self> {
        let corpus = read_corpus(&files.corpus)?;
        tracing::info!(documents = corpus.len(), "corpus loaded");

        let all_queries = read_queries(&files.queries)?;

        let mut splits = BTreeMap::new();
        for (split, path) in &files.qrels {
            let qrels = read_qrels(path)?;
            let wanted: HashSet<&str> = qrels.keys().map(String::as_str).collect();
            let queries: Vec<Query> = all_queries
                .iter()
                .filter(|q| wanted.contains(q.id.as_str()))
                .cloned()
                .collect();

            if queries.len() != qrels.len() {
                tracing::warn!(
                    split = %split,
                    judged = qrels.len(),
                    found = queries.len(),
                    "some judged queries are missing from queries.jsonl"
                );
            }
            tracing::info!(split = %split, queries = queries.len(), "split loaded");

            splits.insert(split.clone(), SplitData { queries, qrels });
        }

        Ok(Self {
            kind,
            revision: None,
            corpus,
            splits,
        })
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Dataset commit the task was loaded at (Hub sources only).
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    pub fn has_split(&self, split: &str) -> bool {
        self.splits.contains_key(split)
    }

    pub fn queries(&self, split: &str) -> Option<&[Query]> {
        self.splits.get(split).map(|s| s.queries.as_slice())
    }

    pub fn corpus(&self, split: &str) -> Option<&[CorpusDoc]> {
        self.splits.get(split).map(|_| self.corpus.as_slice())
    }

    pub fn qrels(&self, split: &str) -> Option<&Qrels> {
        self.splits.get(split).map(|s| &s.qrels)
    }

    pub fn stats(&self, split: &str) -> Option<SplitStats> {
        Some(SplitStats {
            num_queries: self.queries(split)?.len(),
            num_documents: self.corpus(split)?.len(),
        })
    }

    /// Print query and document counts of a split.
    pub fn print_stats(&self, split: &str) {
        if let Some(stats) = self.stats(split) {
            println!(
                "Total number of queries in the full {} {} set: {}",
                self.name(),
                split,
                stats.num_queries
            );
            println!(
                "Total number of documents in the full {} {} set: {}",
                self.name(),
                split,
                stats.num_documents
            );
        }
    }

    /// Compare a split's sizes against the published figures.
    ///
    /// Returns `None` when no figures are known for the split.
    pub fn matches_published(&self, split: &str) -> Option<bool> {
        let expected = self.kind.published_stats(split)?;
        let actual = self.stats(split)?;
        if actual != expected {
            tracing::warn!(
                task = self.name(),
                split,
                expected_queries = expected.num_queries,
                actual_queries = actual.num_queries,
                expected_documents = expected.num_documents,
                actual_documents = actual.num_documents,
                "split sizes differ from the published benchmark"
            );
        }
        Some(actual == expected)
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

impl From<RawId> for String {
    fn from(id: RawId) -> Self {
        match id {
            RawId::Text(s) => s,
            RawId::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDoc {
    #[serde(rename = "_id")]
    id: RawId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuery {
    #[serde(rename = "_id")]
    id: RawId,
    text: String,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(EvalError::DatasetFileNotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| EvalError::io(path, e))?;
    Ok(BufReader::new(file))
}

/// Iterate non-blank lines with their 1-indexed line numbers.
fn for_each_line(
    path: &Path,
    mut f: impl FnMut(usize, &str) -> Result<()>,
) -> Result<()> {
    let reader = open(path)?;
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| EvalError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        f(idx + 1, line)?;
    }
    Ok(())
}

fn read_corpus(path: &Path) -> Result<Vec<CorpusDoc>> {
    let mut docs = Vec::new();
    for_each_line(path, |line_num, line| {
        let raw: RawDoc = serde_json::from_str(line)
            .map_err(|e| EvalError::format(path, line_num, e.to_string()))?;
        docs.push(CorpusDoc {
            id: raw.id.into(),
            title: raw.title.unwrap_or_default(),
            text: raw.text.unwrap_or_default(),
        });
        Ok(())
    })?;
    Ok(docs)
}

fn read_queries(path: &Path) -> Result<Vec<Query>> {
    let mut queries = Vec::new();
    for_each_line(path, |line_num, line| {
        let raw: RawQuery = serde_json::from_str(line)
            .map_err(|e| EvalError::format(path, line_num, e.to_string()))?;
        queries.push(Query {
            id: raw.id.into(),
            text: raw.text,
        });
        Ok(())
    })?;
    Ok(queries)
}

fn read_qrels(path: &Path) -> Result<Qrels> {
    let mut qrels: Qrels = HashMap::new();
    for_each_line(path, |line_num, line| {
        if line_num == 1 && line.starts_with("query-id") {
            return Ok(());
        }

        let mut fields = line.split('\t');
        let (Some(query_id), Some(doc_id), Some(score)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(EvalError::format(
                path,
                line_num,
                "expected three tab-separated columns",
            ));
        };

        let score: i32 = score.trim().parse().map_err(|_| {
            EvalError::format(path, line_num, format!("invalid relevance score '{}'", score))
        })?;

        qrels
            .entry(query_id.to_string())
            .or_default()
            .insert(doc_id.to_string(), score);
        Ok(())
    })?;
    Ok(qrels)
}
