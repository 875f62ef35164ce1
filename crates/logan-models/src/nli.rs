//! Candle NLI cross-encoder backend for the zero-shot classifier
//!
//! Each (text, hypothesis) pair is encoded and run on its own, so scores never depend on how
//! inputs are grouped into batches.

use crate::zero_shot::{PipelineLoader, ZeroShotPipeline, ZeroShotSettings};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use candle_transformers::models::xlm_roberta::{
    Config as XlmRobertaConfig, XLMRobertaForSequenceClassification,
};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use logan_core::{ClassificationResult, Error, Result};
use serde_json::Value;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tokenizers::{Tokenizer, TruncationParams, TruncationStrategy};

/// Loads NLI sequence-classification checkpoints from the hub or a local directory
#[derive(Debug, Default, Clone, Copy)]
pub struct CandleNliLoader;

impl CandleNliLoader {
    pub fn new() -> Self {
        Self
    }
}

impl PipelineLoader for CandleNliLoader {
    fn load(
        &self,
        model_id: &str,
        settings: &ZeroShotSettings,
    ) -> Result<Box<dyn ZeroShotPipeline>> {
        let model_dir = match &settings.local_path {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::not_found(format!(
                        "model path does not exist: {}",
                        path.display()
                    )));
                }
                path.clone()
            }
            None => download_from_hub(model_id, &settings.revision)?,
        };

        let config_path = model_dir.join("config.json");
        let config: Value = parse_json_config(&config_path)?;
        let labels = NliLabels::from_config(&config)?;
        let model_type = config
            .get("model_type")
            .and_then(Value::as_str)
            .unwrap_or("bert")
            .to_string();
        let architecture = Architecture::from_model_type(&model_type, model_id)?;

        let device = get_device(&settings.device)?;
        let vb = load_var_builder(&model_dir, &device)?;
        let tokenizer = load_tokenizer(&model_dir, settings.max_length)?;

        let model = match architecture {
            Architecture::Bert => {
                let bert_config: BertConfig = from_config_value(&config, &config_path)?;
                let backbone = load_bert_backbone(&vb, &bert_config)?;
                let hidden = bert_config.hidden_size;
                let pooler = candle_nn::linear(hidden, hidden, vb.pp("bert.pooler.dense"))
                    .map_err(backend_err("failed to load pooler"))?;
                let classifier = candle_nn::linear(hidden, labels.num_labels, vb.pp("classifier"))
                    .map_err(backend_err("failed to load classification head"))?;
                NliModel::Bert {
                    backbone,
                    pooler,
                    classifier,
                }
            }
            Architecture::Roberta => {
                let roberta_config: XlmRobertaConfig = from_config_value(&config, &config_path)?;
                let model =
                    XLMRobertaForSequenceClassification::new(labels.num_labels, &roberta_config, vb)
                        .map_err(backend_err("failed to load RoBERTa sequence model"))?;
                NliModel::Roberta(model)
            }
        };

        tracing::info!(
            "Loaded {} NLI model '{}' (entailment={}, contradiction={})",
            model_type,
            model_id,
            labels.entailment,
            labels.contradiction
        );

        Ok(Box::new(NliPipeline {
            tokenizer,
            model,
            labels,
            device,
            settings: settings.clone(),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Architecture {
    Bert,
    Roberta,
}

impl Architecture {
    fn from_model_type(model_type: &str, model_id: &str) -> Result<Self> {
        match model_type {
            "bert" => Ok(Self::Bert),
            "roberta" | "xlm-roberta" => Ok(Self::Roberta),
            other => Err(Error::backend(format!(
                "unsupported NLI architecture '{}' for '{}' (supported: bert, roberta, xlm-roberta)",
                other, model_id
            ))),
        }
    }
}

/// Output indices of the NLI head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NliLabels {
    num_labels: usize,
    entailment: usize,
    contradiction: usize,
}

impl NliLabels {
    fn from_config(config: &Value) -> Result<Self> {
        let id2label: Vec<(usize, String)> = config
            .get("id2label")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .filter_map(|(id, label)| {
                        Some((id.parse().ok()?, label.as_str()?.to_lowercase()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let num_labels = if id2label.is_empty() {
            config
                .get("num_labels")
                .and_then(Value::as_u64)
                .map(|n| n as usize)
                .unwrap_or(3)
        } else {
            id2label.len()
        };
        if num_labels < 2 {
            return Err(Error::backend(format!(
                "NLI head needs at least two labels, config declares {}",
                num_labels
            )));
        }

        let find = |prefix: &str| {
            id2label
                .iter()
                .find(|(_, label)| label.starts_with(prefix))
                .map(|(id, _)| *id)
        };
        let entailment = find("entail").unwrap_or(num_labels - 1);
        let contradiction = find("contradict")
            .or_else(|| find("not_entail"))
            .unwrap_or(if entailment == 0 { 1 } else { 0 });

        if entailment >= num_labels || contradiction >= num_labels || entailment == contradiction {
            return Err(Error::backend(format!(
                "invalid NLI label mapping: entailment={}, contradiction={}, labels={}",
                entailment, contradiction, num_labels
            )));
        }

        Ok(Self {
            num_labels,
            entailment,
            contradiction,
        })
    }
}

enum NliModel {
    Bert {
        backbone: BertModel,
        pooler: Linear,
        classifier: Linear,
    },
    Roberta(XLMRobertaForSequenceClassification),
}

impl NliModel {
    fn logits(&self, input_ids: &Tensor, type_ids: &Tensor, mask: &Tensor) -> Result<Tensor> {
        match self {
            Self::Bert {
                backbone,
                pooler,
                classifier,
            } => {
                let hidden = backbone
                    .forward(input_ids, type_ids, Some(mask))
                    .map_err(backend_err("model forward pass failed"))?;
                let cls = hidden
                    .i((.., 0, ..))
                    .map_err(backend_err("failed to get CLS token"))?;
                let pooled = pooler
                    .forward(&cls)
                    .and_then(|t| t.tanh())
                    .map_err(backend_err("pooler failed"))?;
                classifier
                    .forward(&pooled)
                    .map_err(backend_err("classification head failed"))
            }
            Self::Roberta(model) => model
                .forward(input_ids, mask, type_ids)
                .map_err(backend_err("model forward pass failed")),
        }
    }
}

struct NliPipeline {
    tokenizer: Tokenizer,
    model: NliModel,
    labels: NliLabels,
    device: Device,
    settings: ZeroShotSettings,
}

impl NliPipeline {
    /// Raw logits for one premise/hypothesis pair
    fn pair_logits(&self, premise: &str, hypothesis: &str) -> Result<Vec<f32>> {
        let encoding = self
            .tokenizer
            .encode((premise, hypothesis), true)
            .map_err(backend_err("tokenization failed"))?;

        let input_ids = row_tensor(encoding.get_ids(), &self.device)?;
        let type_ids = row_tensor(encoding.get_type_ids(), &self.device)?;
        let mask = row_tensor(encoding.get_attention_mask(), &self.device)?;

        self.model
            .logits(&input_ids, &type_ids, &mask)?
            .squeeze(0)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(backend_err("failed to read logits"))
    }

    fn score_text(
        &self,
        text: &str,
        candidate_labels: &[&str],
        multi_label: bool,
    ) -> Result<ClassificationResult> {
        let mut entail = Vec::with_capacity(candidate_labels.len());
        let mut contra = Vec::with_capacity(candidate_labels.len());
        for label in candidate_labels {
            let logits = self.pair_logits(text, &self.settings.hypothesis(label))?;
            if logits.len() != self.labels.num_labels {
                return Err(Error::backend(format!(
                    "NLI head returned {} logits, expected {}",
                    logits.len(),
                    self.labels.num_labels
                )));
            }
            entail.push(logits[self.labels.entailment]);
            contra.push(logits[self.labels.contradiction]);
        }

        let scores = if multi_label {
            entail
                .iter()
                .zip(&contra)
                .map(|(e, c)| softmax(&[*c, *e])[1])
                .collect()
        } else {
            softmax(&entail)
        };

        let mut pairs: Vec<(&str, f32)> = candidate_labels.iter().copied().zip(scores).collect();
        pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ClassificationResult::from_pairs(pairs))
    }
}

impl ZeroShotPipeline for NliPipeline {
    fn predict(
        &self,
        texts: &[String],
        candidate_labels: &[&str],
        multi_label: bool,
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let batch_size = batch_size.max(1);
        let total_batches = texts.len().div_ceil(batch_size);
        let mut results = Vec::with_capacity(texts.len());

        for (batch_idx, batch) in texts.chunks(batch_size).enumerate() {
            tracing::debug!(
                "Zero-shot batch {}/{} ({} texts, {} labels)",
                batch_idx + 1,
                total_batches,
                batch.len(),
                candidate_labels.len()
            );
            for text in batch {
                results.push(self.score_text(text, candidate_labels, multi_label)?);
            }
        }

        Ok(results)
    }
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn backend_err<E: Display>(context: &'static str) -> impl Fn(E) -> Error {
    move |e| Error::backend(format!("{}: {}", context, e))
}

fn row_tensor(values: &[u32], device: &Device) -> Result<Tensor> {
    Tensor::new(values, device)
        .and_then(|t| t.unsqueeze(0))
        .map_err(backend_err("failed to build input tensor"))
}

fn get_device(device: &str) -> Result<Device> {
    match device.to_lowercase().as_str() {
        "cuda" | "cuda:0" => {
            Device::new_cuda(0).map_err(backend_err("failed to initialize CUDA"))
        }
        "mps" | "metal" => Device::new_metal(0).map_err(backend_err("failed to initialize Metal")),
        _ => Ok(Device::Cpu),
    }
}

fn download_from_hub(model_id: &str, revision: &str) -> Result<PathBuf> {
    tracing::info!("Fetching {}@{} from the HuggingFace hub", model_id, revision);

    let api = Api::new().map_err(backend_err("failed to initialize HuggingFace API"))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));

    let config_path = repo
        .get("config.json")
        .map_err(backend_err("failed to download config.json"))?;
    repo.get("model.safetensors")
        .map_err(backend_err("failed to download model.safetensors"))?;

    let has_tokenizer = ["tokenizer.json", "vocab.txt"]
        .iter()
        .any(|file| match repo.get(file) {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("{} not available: {}", file, e);
                false
            }
        });
    if !has_tokenizer {
        return Err(Error::backend(format!(
            "no tokenizer found for {} (tried tokenizer.json, vocab.txt)",
            model_id
        )));
    }

    config_path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::backend("invalid hub cache path"))
}

fn parse_json_config(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        Error::backend(format!("failed to read config {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::backend(format!("failed to parse config {}: {}", path.display(), e))
    })
}

fn from_config_value<T: serde::de::DeserializeOwned>(config: &Value, path: &Path) -> Result<T> {
    serde_json::from_value(config.clone()).map_err(|e| {
        Error::backend(format!(
            "config {} does not match the model architecture: {}",
            path.display(),
            e
        ))
    })
}

fn load_var_builder(model_dir: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let weights = model_dir.join("model.safetensors");
    if !weights.exists() {
        return Err(Error::backend(format!(
            "model.safetensors not found in {}",
            model_dir.display()
        )));
    }

    // SAFETY: the weights file is memory-mapped read-only and not modified while loaded.
    unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, device) }
        .map_err(backend_err("failed to load weights"))
}

fn load_bert_backbone(vb: &VarBuilder, config: &BertConfig) -> Result<BertModel> {
    let mut errors = Vec::new();
    for prefix in ["bert", ""] {
        let scoped = if prefix.is_empty() {
            vb.clone()
        } else {
            vb.pp(prefix)
        };
        match BertModel::load(scoped, config) {
            Ok(model) => return Ok(model),
            Err(e) => errors.push(format!(
                "{}: {}",
                if prefix.is_empty() { "<root>" } else { prefix },
                e
            )),
        }
    }

    Err(Error::backend(format!(
        "failed to load BERT backbone with tried prefixes [{}]",
        errors.join(" | ")
    )))
}

fn load_tokenizer(model_dir: &Path, max_length: usize) -> Result<Tokenizer> {
    let mut tokenizer = build_tokenizer(model_dir)?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length,
            strategy: TruncationStrategy::LongestFirst,
            ..Default::default()
        }))
        .map_err(backend_err("failed to configure truncation"))?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

fn build_tokenizer(model_dir: &Path) -> Result<Tokenizer> {
    let tokenizer_json = model_dir.join("tokenizer.json");
    if tokenizer_json.exists() {
        return Tokenizer::from_file(&tokenizer_json)
            .map_err(backend_err("failed to load tokenizer.json"));
    }

    let vocab = model_dir.join("vocab.txt");
    if vocab.exists() {
        use tokenizers::models::wordpiece::WordPiece;
        use tokenizers::normalizers::BertNormalizer;
        use tokenizers::pre_tokenizers::bert::BertPreTokenizer;
        use tokenizers::processors::bert::BertProcessing;

        tracing::debug!("Building WordPiece tokenizer from vocab.txt");
        let wordpiece = WordPiece::from_file(vocab.to_string_lossy().as_ref())
            .unk_token("[UNK]".to_string())
            .build()
            .map_err(backend_err("failed to build WordPiece model"))?;

        let mut tokenizer = Tokenizer::new(wordpiece);
        tokenizer.with_normalizer(Some(BertNormalizer::default()));
        tokenizer.with_pre_tokenizer(Some(BertPreTokenizer));
        tokenizer.with_post_processor(Some(BertProcessing::new(
            ("[SEP]".to_string(), 102),
            ("[CLS]".to_string(), 101),
        )));
        return Ok(tokenizer);
    }

    Err(Error::backend(format!(
        "no tokenizer found in {} (tried tokenizer.json, vocab.txt)",
        model_dir.display()
    )))
}
