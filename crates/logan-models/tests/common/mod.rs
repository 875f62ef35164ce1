//! Stub backends for testing
//!
//! Deterministic pipelines and models that exercise the manager, registry and zero-shot
//! classifier without loading any weights.

#![allow(dead_code)]

use logan_core::{
    ClassificationModel, ClassificationResult, Error, FromKwargs, ModelKwargs, Operations, Result,
};
use logan_models::{PipelineLoader, ZeroShotPipeline, ZeroShotSettings};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Zero-shot pipeline answering from a fixed score table.
///
/// Labels missing from the table get a deterministic score derived from the text, below the
/// fallback ceiling (0.25 unless changed).
#[derive(Clone)]
pub struct StubPipeline {
    scores: HashMap<String, Vec<(String, f32)>>,
    fallback_ceiling: f32,
    ascending: bool,
}

impl StubPipeline {
    pub fn new() -> Self {
        Self {
            scores: HashMap::new(),
            fallback_ceiling: 0.25,
            ascending: false,
        }
    }

    /// Return pairs lowest score first
    pub fn with_ascending_order(mut self) -> Self {
        self.ascending = true;
        self
    }

    /// Upper bound of scores given to labels missing from the table
    pub fn with_fallback_ceiling(mut self, ceiling: f32) -> Self {
        self.fallback_ceiling = ceiling;
        self
    }

    /// Fix the score of `label` for `text`
    pub fn with_score(mut self, text: &str, label: &str, score: f32) -> Self {
        self.scores
            .entry(text.to_string())
            .or_default()
            .push((label.to_string(), score));
        self
    }

    fn raw_score(&self, text: &str, label: &str) -> f32 {
        self.scores
            .get(text)
            .and_then(|scores| scores.iter().find(|(l, _)| l == label))
            .map(|(_, score)| *score)
            .unwrap_or_else(|| self.fallback_score(text, label))
    }

    fn fallback_score(&self, text: &str, label: &str) -> f32 {
        let sum: u32 = text.bytes().chain(label.bytes()).map(u32::from).sum();
        (sum % 97) as f32 / 97.0 * self.fallback_ceiling
    }
}

impl ZeroShotPipeline for StubPipeline {
    fn predict(
        &self,
        texts: &[String],
        candidate_labels: &[&str],
        multi_label: bool,
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut pairs: Vec<(&str, f32)> = candidate_labels
                    .iter()
                    .map(|label| (*label, self.raw_score(text, label)))
                    .collect();

                if !multi_label {
                    let total: f32 = pairs.iter().map(|(_, s)| s).sum();
                    if total > 0.0 {
                        for pair in &mut pairs {
                            pair.1 /= total;
                        }
                    }
                }

                pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
                if self.ascending {
                    pairs.reverse();
                }
                ClassificationResult::from_pairs(pairs)
            })
            .collect())
    }
}

/// Pipeline loader handing out clones of one [`StubPipeline`], counting loads
pub struct StubLoader {
    pipeline: StubPipeline,
    loads: Arc<AtomicUsize>,
    fail: bool,
}

impl StubLoader {
    pub fn new(pipeline: StubPipeline) -> Self {
        Self {
            pipeline,
            loads: Arc::new(AtomicUsize::new(0)),
            fail: false,
        }
    }

    /// A loader whose every load fails with a backend error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(StubPipeline::new())
        }
    }

    pub fn load_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.loads)
    }
}

impl PipelineLoader for StubLoader {
    fn load(
        &self,
        model_id: &str,
        _settings: &ZeroShotSettings,
    ) -> Result<Box<dyn ZeroShotPipeline>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::backend(format!("weights for {} unavailable", model_id)));
        }
        Ok(Box::new(self.pipeline.clone()))
    }
}

/// Keyword-driven model counting its `init_model` calls
pub struct StubModel {
    inits: Arc<AtomicUsize>,
    fault_label: String,
}

impl StubModel {
    pub fn new() -> Self {
        Self {
            inits: Arc::new(AtomicUsize::new(0)),
            fault_label: "io".to_string(),
        }
    }

    pub fn init_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.inits)
    }

    fn is_initialized(&self) -> bool {
        self.inits.load(Ordering::SeqCst) > 0
    }
}

impl FromKwargs for StubModel {
    fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self> {
        let mut model = Self::new();
        if let Some(label) = kwargs.get("fault_label") {
            model.fault_label = label
                .as_str()
                .ok_or_else(|| Error::config("fault_label must be a string"))?
                .to_string();
        }
        Ok(model)
    }
}

impl ClassificationModel for StubModel {
    fn init_model(&mut self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        if !self.is_initialized() {
            return Err(Error::backend("stub model not initialised"));
        }
        Ok(texts
            .iter()
            .map(|text| {
                if text.to_lowercase().contains("error") {
                    ClassificationResult::single("error", 0.9)
                } else {
                    ClassificationResult::single("information", 0.6)
                }
            })
            .collect())
    }

    fn classify_fault_category(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        if !self.is_initialized() {
            return Err(Error::backend("stub model not initialised"));
        }
        Ok(texts
            .iter()
            .map(|text| {
                if text.to_lowercase().contains("disk") {
                    ClassificationResult::single(self.fault_label.clone(), 0.8)
                } else {
                    ClassificationResult::empty()
                }
            })
            .collect())
    }

    fn name(&self) -> &str {
        "StubModel"
    }
}

/// Model that only provides part of the contract
pub struct PartialModel {
    pub inits: Arc<AtomicUsize>,
}

impl PartialModel {
    pub fn new() -> Self {
        Self {
            inits: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl FromKwargs for PartialModel {
    fn from_kwargs(_kwargs: &ModelKwargs) -> Result<Self> {
        Ok(Self::new())
    }
}

impl ClassificationModel for PartialModel {
    fn init_model(&mut self) -> Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        Ok(texts
            .iter()
            .map(|_| ClassificationResult::single("traffic", 0.5))
            .collect())
    }

    fn classify_fault_category(
        &self,
        _texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        Err(Error::unsupported("fault categories"))
    }

    fn name(&self) -> &str {
        "PartialModel"
    }

    fn operations(&self) -> Operations {
        Operations::INIT_MODEL | Operations::CLASSIFY_GOLDEN_SIGNAL
    }
}

/// Model that breaks the result-shape guarantees
pub enum BrokenModel {
    /// Returns one result fewer than asked for
    DropsResults,
    /// Returns a label outside the taxonomy
    UnknownLabel,
    /// Returns two golden signals per text
    MultiGolden,
}

impl ClassificationModel for BrokenModel {
    fn init_model(&mut self) -> Result<()> {
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let result = match self {
            Self::MultiGolden => {
                ClassificationResult::from_pairs([("error", 0.5), ("latency", 0.4)])
            }
            Self::UnknownLabel => ClassificationResult::single("disk_full", 0.9),
            Self::DropsResults => ClassificationResult::single("error", 0.9),
        };
        let count = match self {
            Self::DropsResults => texts.len().saturating_sub(1),
            _ => texts.len(),
        };
        Ok(vec![result; count])
    }

    fn classify_fault_category(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        Ok(vec![ClassificationResult::empty(); texts.len()])
    }

    fn name(&self) -> &str {
        "BrokenModel"
    }
}

/// Route logs to the test harness; `RUST_LOG=logan=debug` shows them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
