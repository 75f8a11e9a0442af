//! Local embedding model using candle + sentence-transformers checkpoints.
//!
//! A model is either a local checkpoint directory (as written by
//! sentence-transformers training) or a Hugging Face Hub model id. BERT and
//! DistilBERT encoders are supported. Pooling and normalization follow the
//! checkpoint's `modules.json` / `1_Pooling/config.json` when present.

use anyhow::{Context, Result, anyhow, bail};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::distilbert::{Config as DistilBertConfig, DistilBertModel};
use hf_hub::{Repo, RepoType, api::sync::Api};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams};

/// Sequence length used when the checkpoint does not specify one.
const DEFAULT_MAX_SEQ_LENGTH: usize = 512;

/// Anything that turns texts into fixed-size vectors.
pub trait Encoder {
    /// Embed a batch of texts. Returns one vector per input, in order.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Length of each embedding vector.
    fn dimension(&self) -> usize;

    /// Identifier of the model, used to name result folders.
    fn name(&self) -> &str;
}

/// How token embeddings are reduced to a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pooling {
    /// Attention-masked mean over tokens.
    Mean,
    /// First (`[CLS]`) token.
    Cls,
}

enum Backbone {
    Bert(BertModel),
    DistilBert(DistilBertModel),
}

/// Fields of `config.json` needed before picking an architecture.
#[derive(Debug, Deserialize)]
struct ConfigHeader {
    model_type: Option<String>,
    hidden_size: Option<usize>,
    dim: Option<usize>,
    max_position_embeddings: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ModuleEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Default, Deserialize)]
struct PoolingConfig {
    #[serde(default)]
    pooling_mode_cls_token: bool,
    #[serde(default)]
    pooling_mode_mean_tokens: bool,
}

#[derive(Debug, Deserialize)]
struct SentenceBertConfig {
    max_seq_length: Option<usize>,
}

/// Files that make up a checkpoint.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
    pub modules: Option<PathBuf>,
    pub pooling_config: Option<PathBuf>,
    pub sentence_config: Option<PathBuf>,
    pub is_local: bool,
}

impl ModelFiles {
    /// Resolve `model_id` to local files, downloading from the Hub when it is
    /// not an existing directory.
    ///
    /// Hub ids have the form `name` or `org/name`; anything deeper is a path.
    pub fn resolve(model_id: &str) -> Result<Self> {
        let path = Path::new(model_id);
        if path.is_dir() {
            Self::from_local(path)
        } else if path.is_absolute() || model_id.starts_with('.') || path.components().count() > 2
        {
            bail!("Model directory does not exist: {}", path.display())
        } else {
            Self::from_hub(model_id)
        }
    }

    /// Locate checkpoint files in a local directory.
    pub fn from_local(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("Model directory does not exist: {}", dir.display());
        }

        let config = dir.join("config.json");
        if !config.exists() {
            bail!("config.json not found in {}", dir.display());
        }

        let tokenizer = dir.join("tokenizer.json");
        if !tokenizer.exists() {
            bail!("tokenizer.json not found in {}", dir.display());
        }

        // Try safetensors first, then pytorch
        let weights = if dir.join("model.safetensors").exists() {
            dir.join("model.safetensors")
        } else if dir.join("pytorch_model.bin").exists() {
            dir.join("pytorch_model.bin")
        } else {
            bail!(
                "No model weights found in {} (tried model.safetensors and pytorch_model.bin)",
                dir.display()
            );
        };

        let existing = |p: PathBuf| p.exists().then_some(p);
        let modules = existing(dir.join("modules.json"));
        let pooling_dir = match &modules {
            Some(m) => pooling_module_path(m)?,
            None => None,
        };
        let pooling_config = pooling_dir
            .or_else(|| Some("1_Pooling".to_string()))
            .and_then(|p| existing(dir.join(p).join("config.json")));

        Ok(Self {
            config,
            tokenizer,
            weights,
            modules,
            pooling_config,
            sentence_config: existing(dir.join("sentence_bert_config.json")),
            is_local: true,
        })
    }

    /// Download checkpoint files from the Hugging Face Hub.
    pub fn from_hub(model_id: &str) -> Result<Self> {
        tracing::info!("Downloading model from HuggingFace Hub: {}", model_id);

        let api = Api::new().context("Failed to create HF Hub API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config = repo.get("config.json").context("Failed to get config.json")?;
        let tokenizer = repo
            .get("tokenizer.json")
            .context("Failed to get tokenizer.json")?;
        let weights = match repo.get("model.safetensors") {
            Ok(path) => path,
            Err(_) => {
                tracing::warn!("Safetensors not available, using pytorch_model.bin");
                repo.get("pytorch_model.bin")
                    .context("Failed to get model weights")?
            }
        };

        let modules = repo.get("modules.json").ok();
        let pooling_dir = match &modules {
            Some(m) => pooling_module_path(m)?,
            None => None,
        }
        .unwrap_or_else(|| "1_Pooling".to_string());
        let pooling_config = repo.get(&format!("{}/config.json", pooling_dir)).ok();
        let sentence_config = repo.get("sentence_bert_config.json").ok();

        Ok(Self {
            config,
            tokenizer,
            weights,
            modules,
            pooling_config,
            sentence_config,
            is_local: false,
        })
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_modules(path: &Path) -> Result<Vec<ModuleEntry>> {
    read_json(path)
}

fn pooling_module_path(modules: &Path) -> Result<Option<String>> {
    Ok(read_modules(modules)?
        .into_iter()
        .find(|m| m.kind.ends_with("Pooling"))
        .map(|m| m.path))
}

/// Embedding model for generating text embeddings.
pub struct EmbeddingModel {
    name: String,
    backbone: Backbone,
    tokenizer: Tokenizer,
    device: Device,
    pooling: Pooling,
    normalize: bool,
    dimension: usize,
}

impl EmbeddingModel {
    /// Load a model from a checkpoint directory or Hub id onto `device`.
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        let files = ModelFiles::resolve(model_id)?;
        Self::from_files(model_id, &files, device)
    }

    /// Load a model from already-resolved files.
    pub fn from_files(name: &str, files: &ModelFiles, device: &Device) -> Result<Self> {
        let config_text = std::fs::read_to_string(&files.config)
            .with_context(|| format!("Failed to read {}", files.config.display()))?;
        let header: ConfigHeader =
            serde_json::from_str(&config_text).context("Failed to parse config")?;

        let (pooling, normalize) = Self::sentence_transformer_head(files)?;

        let max_seq_length = files
            .sentence_config
            .as_deref()
            .map(read_json::<SentenceBertConfig>)
            .transpose()?
            .and_then(|c| c.max_seq_length)
            .unwrap_or(DEFAULT_MAX_SEQ_LENGTH)
            .min(header.max_position_embeddings.unwrap_or(usize::MAX));

        // Load tokenizer
        let mut tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: max_seq_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
        tokenizer.with_padding(None);

        // Load model weights
        let vb = if files.weights.extension().is_some_and(|e| e == "bin") {
            VarBuilder::from_pth(&files.weights, DType::F32, device)
                .context("Failed to load model weights")?
        } else {
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, device)
                    .context("Failed to load model weights")?
            }
        };

        let model_type = header.model_type.as_deref().unwrap_or("bert");
        let (backbone, dimension) = match model_type {
            "bert" => {
                let config: BertConfig =
                    serde_json::from_str(&config_text).context("Failed to parse BERT config")?;
                let model = BertModel::load(vb, &config).context("Failed to load BERT model")?;
                (Backbone::Bert(model), header.hidden_size)
            }
            "distilbert" => {
                let config: DistilBertConfig = serde_json::from_str(&config_text)
                    .context("Failed to parse DistilBERT config")?;
                let model = DistilBertModel::load(vb, &config)
                    .context("Failed to load DistilBERT model")?;
                (Backbone::DistilBert(model), header.dim)
            }
            other => bail!("Architecture '{}' is not supported (expected bert or distilbert)", other),
        };
        let dimension =
            dimension.ok_or_else(|| anyhow!("config.json does not declare a hidden size"))?;

        tracing::info!(
            model = name,
            architecture = model_type,
            ?pooling,
            normalize,
            dimension,
            max_seq_length,
            local = files.is_local,
            "embedding model loaded"
        );

        Ok(Self {
            name: name.to_string(),
            backbone,
            tokenizer,
            device: device.clone(),
            pooling,
            normalize,
            dimension,
        })
    }

    /// Pooling mode and normalization declared by the checkpoint.
    fn sentence_transformer_head(files: &ModelFiles) -> Result<(Pooling, bool)> {
        let normalize = match &files.modules {
            Some(path) => read_modules(path)?
                .iter()
                .any(|m| m.kind.ends_with("Normalize")),
            None => false,
        };

        let pooling = match &files.pooling_config {
            Some(path) => {
                let config: PoolingConfig = read_json(path)?;
                if config.pooling_mode_cls_token && !config.pooling_mode_mean_tokens {
                    Pooling::Cls
                } else {
                    Pooling::Mean
                }
            }
            None => Pooling::Mean,
        };

        Ok((pooling, normalize))
    }

    /// Generate embeddings for a batch of texts.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Tokenize
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .max(1);

        // Prepare tensors
        let batch_size = texts.len();
        let mut input_ids_vec = Vec::with_capacity(batch_size * max_len);
        let mut attention_mask_vec = Vec::with_capacity(batch_size * max_len);
        let mut padding_mask_vec = Vec::with_capacity(batch_size * max_len);

        for encoding in &encodings {
            let mut padded_ids = encoding.get_ids().to_vec();
            let mut padded_mask = encoding.get_attention_mask().to_vec();

            // Pad to max_len
            padded_ids.resize(max_len, 0);
            padded_mask.resize(max_len, 0);

            padding_mask_vec.extend(padded_mask.iter().map(|&m| u8::from(m == 0)));
            input_ids_vec.extend(padded_ids);
            attention_mask_vec.extend(padded_mask);
        }

        let input_ids = Tensor::from_vec(input_ids_vec, (batch_size, max_len), &self.device)?;
        let attention_mask =
            Tensor::from_vec(attention_mask_vec, (batch_size, max_len), &self.device)?;

        // Run model
        let output = match &self.backbone {
            Backbone::Bert(model) => {
                let token_type_ids = input_ids.zeros_like()?;
                model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?
            }
            Backbone::DistilBert(model) => {
                // DistilBERT masks positions where the mask is 1
                let padding_mask =
                    Tensor::from_vec(padding_mask_vec, (batch_size, 1, 1, max_len), &self.device)?;
                model.forward(&input_ids, &padding_mask)?
            }
        };

        let pooled = match self.pooling {
            Pooling::Cls => output.narrow(1, 0, 1)?.squeeze(1)?,
            Pooling::Mean => {
                // Mean pooling over sequence dimension (with attention mask)
                let attention_mask_expanded = attention_mask
                    .unsqueeze(2)?
                    .to_dtype(output.dtype())?
                    .broadcast_as(output.shape())?;

                let sum_embeddings = (output * &attention_mask_expanded)?.sum(1)?;
                let sum_mask = attention_mask_expanded.sum(1)?.clamp(1e-9, f64::MAX)?;
                (sum_embeddings / sum_mask)?
            }
        };

        let final_embeddings = if self.normalize {
            let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
            pooled.broadcast_div(&norms)?
        } else {
            pooled
        };

        Ok(final_embeddings.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

impl Encoder for EmbeddingModel {
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::test_support::KeywordEncoder;

    #[test]
    fn test_missing_model_directory_is_an_error() {
        let err = match EmbeddingModel::load("/nonexistent/checkpoint-106250", &Device::Cpu) {
            Ok(_) => panic!("loading a missing checkpoint should fail"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("/nonexistent/checkpoint-106250"));
    }

    #[test]
    fn test_missing_relative_checkpoint_is_not_fetched() {
        let err = ModelFiles::resolve("output/missing-run/checkpoint-1").unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_local_directory_without_weights_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{\"model_type\": \"bert\"}").unwrap();
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();

        let err = ModelFiles::from_local(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No model weights found"));
    }

    #[test]
    fn test_sentence_transformer_head_detection() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("config.json"), "{}").unwrap();
        std::fs::write(root.join("tokenizer.json"), "{}").unwrap();
        std::fs::write(root.join("model.safetensors"), "").unwrap();
        std::fs::write(
            root.join("modules.json"),
            r#"[
                {"idx": 0, "name": "0", "path": "", "type": "sentence_transformers.models.Transformer"},
                {"idx": 1, "name": "1", "path": "1_Pooling", "type": "sentence_transformers.models.Pooling"},
                {"idx": 2, "name": "2", "path": "2_Normalize", "type": "sentence_transformers.models.Normalize"}
            ]"#,
        )
        .unwrap();
        std::fs::create_dir(root.join("1_Pooling")).unwrap();
        std::fs::write(
            root.join("1_Pooling").join("config.json"),
            r#"{"word_embedding_dimension": 768, "pooling_mode_cls_token": true, "pooling_mode_mean_tokens": false}"#,
        )
        .unwrap();

        let files = ModelFiles::from_local(root).unwrap();
        assert!(files.is_local);
        assert!(files.sentence_config.is_none());
        let (pooling, normalize) = EmbeddingModel::sentence_transformer_head(&files).unwrap();
        assert_eq!(pooling, Pooling::Cls);
        assert!(normalize);
    }

    #[test]
    fn test_head_defaults_to_mean_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("config.json"), "{}").unwrap();
        std::fs::write(root.join("tokenizer.json"), "{}").unwrap();
        std::fs::write(root.join("pytorch_model.bin"), "").unwrap();

        let files = ModelFiles::from_local(root).unwrap();
        assert!(files.weights.ends_with("pytorch_model.bin"));
        let (pooling, normalize) = EmbeddingModel::sentence_transformer_head(&files).unwrap();
        assert_eq!(pooling, Pooling::Mean);
        assert!(!normalize);
    }

    #[test]
    fn test_encoder_trait_object() {
        let encoder: Box<dyn Encoder> = Box::new(KeywordEncoder::default());
        let out = encoder.encode(&["rust rust", "ocean"]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].len(), encoder.dimension());
    }

    const BERT_CONFIG: &str = r#"{
        "model_type": "bert",
        "vocab_size": 8,
        "hidden_size": 8,
        "num_hidden_layers": 1,
        "num_attention_heads": 2,
        "intermediate_size": 16,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.0,
        "max_position_embeddings": 32,
        "type_vocab_size": 2,
        "initializer_range": 0.02,
        "layer_norm_eps": 1e-12,
        "pad_token_id": 0,
        "position_embedding_type": "absolute",
        "use_cache": false
    }"#;

    const DISTILBERT_CONFIG: &str = r#"{
        "model_type": "distilbert",
        "vocab_size": 8,
        "dim": 8,
        "n_layers": 1,
        "n_heads": 2,
        "hidden_dim": 16,
        "activation": "gelu",
        "max_position_embeddings": 32,
        "initializer_range": 0.02,
        "pad_token_id": 0
    }"#;

    const TOKENIZER: &str = r#"{
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": null,
        "decoder": null,
        "model": {
            "type": "WordLevel",
            "vocab": {"[UNK]": 0, "a": 1, "b": 2, "c": 3, "d": 4, "x": 5},
            "unk_token": "[UNK]"
        }
    }"#;

    /// Write a randomly initialized one-layer checkpoint with hidden size 8.
    fn write_tiny_checkpoint(dir: &Path, model_type: &str) {
        let varmap = candle_nn::VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let config = match model_type {
            "bert" => {
                let config: BertConfig = serde_json::from_str(BERT_CONFIG).unwrap();
                BertModel::load(vb, &config).unwrap();
                BERT_CONFIG
            }
            _ => {
                let config: DistilBertConfig = serde_json::from_str(DISTILBERT_CONFIG).unwrap();
                DistilBertModel::load(vb, &config).unwrap();
                DISTILBERT_CONFIG
            }
        };
        varmap.save(dir.join("model.safetensors")).unwrap();
        std::fs::write(dir.join("config.json"), config).unwrap();
        std::fs::write(dir.join("tokenizer.json"), TOKENIZER).unwrap();
    }

    fn load_tiny(dir: &Path) -> EmbeddingModel {
        EmbeddingModel::load(dir.to_str().unwrap(), &Device::Cpu).unwrap()
    }

    fn max_abs_diff(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
    }

    #[test]
    fn test_load_local_checkpoint_binds_device_and_dimension() {
        for model_type in ["bert", "distilbert"] {
            let dir = tempfile::tempdir().unwrap();
            write_tiny_checkpoint(dir.path(), model_type);

            let model = load_tiny(dir.path());
            assert!(matches!(model.device, Device::Cpu));
            assert_eq!(model.dimension(), 8);
            assert_eq!(model.pooling, Pooling::Mean);
            assert!(!model.normalize);

            let out = model.encode(&["a b", "c"]).unwrap();
            assert_eq!(out.len(), 2);
            assert!(out.iter().all(|v| v.len() == 8));
        }
    }

    #[test]
    fn test_padding_does_not_change_embeddings() {
        for model_type in ["bert", "distilbert"] {
            let dir = tempfile::tempdir().unwrap();
            write_tiny_checkpoint(dir.path(), model_type);
            let model = load_tiny(dir.path());

            let alone = model.embed_batch(&["a"]).unwrap();
            let padded = model.embed_batch(&["a", "a b c d b c"]).unwrap();
            let diff = max_abs_diff(&alone[0], &padded[0]);
            assert!(diff < 1e-4, "{}: padded embedding differs by {}", model_type, diff);
        }
    }

    #[test]
    fn test_cls_pooling_ignores_padding() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_checkpoint(dir.path(), "distilbert");
        std::fs::create_dir(dir.path().join("1_Pooling")).unwrap();
        std::fs::write(
            dir.path().join("1_Pooling").join("config.json"),
            r#"{"pooling_mode_cls_token": true, "pooling_mode_mean_tokens": false}"#,
        )
        .unwrap();

        let model = load_tiny(dir.path());
        assert_eq!(model.pooling, Pooling::Cls);

        let alone = model.embed_batch(&["b c"]).unwrap();
        let padded = model.embed_batch(&["b c", "a b c d a b c d"]).unwrap();
        assert!(max_abs_diff(&alone[0], &padded[0]) < 1e-4);
    }

    #[test]
    fn test_normalize_module_yields_unit_vectors() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_checkpoint(dir.path(), "bert");
        std::fs::write(
            dir.path().join("modules.json"),
            r#"[
                {"idx": 0, "name": "0", "path": "", "type": "sentence_transformers.models.Transformer"},
                {"idx": 1, "name": "1", "path": "1_Pooling", "type": "sentence_transformers.models.Pooling"},
                {"idx": 2, "name": "2", "path": "2_Normalize", "type": "sentence_transformers.models.Normalize"}
            ]"#,
        )
        .unwrap();

        let model = load_tiny(dir.path());
        assert!(model.normalize);

        for embedding in model.embed_batch(&["a", "b c d", "x x"]).unwrap() {
            let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4, "norm {}", norm);
        }
    }

    #[test]
    fn test_long_inputs_are_truncated() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_checkpoint(dir.path(), "bert");
        std::fs::write(
            dir.path().join("sentence_bert_config.json"),
            r#"{"max_seq_length": 4, "do_lower_case": false}"#,
        )
        .unwrap();

        let model = load_tiny(dir.path());

        // longer than max_position_embeddings, so only truncation lets it run
        let long = ["a b c d"; 10].join(" ");
        let out = model.embed_batch(&["a b c d", long.as_str()]).unwrap();
        assert!(max_abs_diff(&out[0], &out[1]) < 1e-4);
    }

    #[test]
    fn test_unsupported_architecture_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write_tiny_checkpoint(dir.path(), "bert");
        std::fs::write(
            dir.path().join("config.json"),
            BERT_CONFIG.replace("\"bert\"", "\"roberta\""),
        )
        .unwrap();

        let err = match EmbeddingModel::load(dir.path().to_str().unwrap(), &Device::Cpu) {
            Ok(_) => panic!("roberta checkpoints are not supported"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("roberta"));
    }
}
