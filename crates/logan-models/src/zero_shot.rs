//! Built-in zero-shot classifier
//!
//! Scores every candidate label with a pretrained NLI model. Golden signals are scored as a
//! single-label problem and narrowed to the top label; fault categories are scored
//! multi-label and filtered by [`ZeroShotSettings::fault_threshold`].

use logan_core::{
    ClassificationModel, ClassificationResult, Error, FaultCategory, GoldenSignal, Result,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Pretrained zero-shot backends known by name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ZeroShotModel {
    /// `facebook/bart-large-mnli`
    ///
    /// The Candle NLI loader has no BART sequence classifier and rejects this model at
    /// `init_model` with a backend error. Use it with a custom [`PipelineLoader`].
    Bart,
    /// `cross-encoder/nli-MiniLM2-L6-H768`
    #[default]
    CrossEncoder,
    /// Any other model identifier, passed to the loader as is
    Custom(String),
}

impl ZeroShotModel {
    pub const BART_ID: &'static str = "facebook/bart-large-mnli";
    pub const CROSS_ENCODER_ID: &'static str = "cross-encoder/nli-MiniLM2-L6-H768";

    /// Model identifier handed to the pipeline loader
    pub fn model_id(&self) -> &str {
        match self {
            Self::Bart => Self::BART_ID,
            Self::CrossEncoder => Self::CROSS_ENCODER_ID,
            Self::Custom(id) => id,
        }
    }
}

impl FromStr for ZeroShotModel {
    type Err = Error;

    /// Accepts an enum name (`bart`, `crossencoder`), a known model identifier, or any other
    /// identifier which is kept literally.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::config("zero-shot model identifier cannot be empty"));
        }

        let model = if s.eq_ignore_ascii_case("bart") || s == Self::BART_ID {
            Self::Bart
        } else if s.eq_ignore_ascii_case("crossencoder") || s == Self::CROSS_ENCODER_ID {
            Self::CrossEncoder
        } else {
            Self::Custom(s.to_string())
        };
        Ok(model)
    }
}

impl fmt::Display for ZeroShotModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.model_id())
    }
}

/// Zero-shot classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroShotSettings {
    /// Minimum score for a fault category to be kept
    #[serde(default = "default_fault_threshold")]
    pub fault_threshold: f32,

    /// Hypothesis each candidate label is inserted into, at `{}`
    #[serde(default = "default_hypothesis_template")]
    pub hypothesis_template: String,

    /// Inference device: cpu, cuda or metal
    #[serde(default = "default_device")]
    pub device: String,

    /// Maximum tokens per premise/hypothesis pair
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Hub revision to download
    #[serde(default = "default_revision")]
    pub revision: String,

    /// Load weights from this directory instead of the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
}

fn default_fault_threshold() -> f32 {
    0.3
}

fn default_hypothesis_template() -> String {
    "This example is {}.".to_string()
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_max_length() -> usize {
    512
}

fn default_revision() -> String {
    "main".to_string()
}

impl Default for ZeroShotSettings {
    fn default() -> Self {
        Self {
            fault_threshold: default_fault_threshold(),
            hypothesis_template: default_hypothesis_template(),
            device: default_device(),
            max_length: default_max_length(),
            revision: default_revision(),
            local_path: None,
        }
    }
}

impl ZeroShotSettings {
    /// Fill the hypothesis template with `label`
    pub fn hypothesis(&self, label: &str) -> String {
        if self.hypothesis_template.contains("{}") {
            self.hypothesis_template.replacen("{}", label, 1)
        } else {
            format!("{} {}", self.hypothesis_template, label)
        }
    }

    /// Reject settings that cannot produce meaningful scores
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.fault_threshold) {
            return Err(Error::config(format!(
                "fault_threshold must be within [0, 1], got {}",
                self.fault_threshold
            )));
        }
        if self.max_length == 0 {
            return Err(Error::config("max_length must be greater than zero"));
        }
        Ok(())
    }
}

/// A loaded zero-shot classification backend
pub trait ZeroShotPipeline: Send {
    /// Score every candidate label for every text.
    ///
    /// Returns one result per text, covering all candidates, sorted by descending score. With
    /// `multi_label` false the scores of one text sum to one; with `multi_label` true each
    /// label is scored independently.
    fn predict(
        &self,
        texts: &[String],
        candidate_labels: &[&str],
        multi_label: bool,
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>>;
}

/// Builds a pipeline for a model identifier
pub trait PipelineLoader: Send + Sync {
    fn load(&self, model_id: &str, settings: &ZeroShotSettings)
        -> Result<Box<dyn ZeroShotPipeline>>;
}

/// Loader used when the crate is built without an inference backend
#[cfg(not(feature = "ml-models"))]
struct UnavailableLoader;

#[cfg(not(feature = "ml-models"))]
impl PipelineLoader for UnavailableLoader {
    fn load(
        &self,
        model_id: &str,
        _settings: &ZeroShotSettings,
    ) -> Result<Box<dyn ZeroShotPipeline>> {
        Err(Error::backend(format!(
            "zero-shot model '{}' requires the ml-models feature",
            model_id
        )))
    }
}

fn default_loader() -> Arc<dyn PipelineLoader> {
    #[cfg(feature = "ml-models")]
    {
        Arc::new(crate::nli::CandleNliLoader::new())
    }
    #[cfg(not(feature = "ml-models"))]
    {
        Arc::new(UnavailableLoader)
    }
}

/// The built-in classification backend
pub struct ZeroShotClassifier {
    model: ZeroShotModel,
    settings: ZeroShotSettings,
    loader: Arc<dyn PipelineLoader>,
    pipeline: Option<Box<dyn ZeroShotPipeline>>,
}

impl ZeroShotClassifier {
    /// Create a classifier using the default inference backend
    pub fn new(model: ZeroShotModel, settings: ZeroShotSettings) -> Self {
        Self::with_loader(model, settings, default_loader())
    }

    /// Create a classifier that builds its pipeline with `loader`
    pub fn with_loader(
        model: ZeroShotModel,
        settings: ZeroShotSettings,
        loader: Arc<dyn PipelineLoader>,
    ) -> Self {
        Self {
            model,
            settings,
            loader,
            pipeline: None,
        }
    }

    pub fn model(&self) -> &ZeroShotModel {
        &self.model
    }

    pub fn settings(&self) -> &ZeroShotSettings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.pipeline.is_some()
    }

    fn pipeline(&self) -> Result<&dyn ZeroShotPipeline> {
        self.pipeline
            .as_deref()
            .ok_or_else(|| Error::backend("zero-shot model not initialised; call init_model first"))
    }
}

impl ClassificationModel for ZeroShotClassifier {
    fn init_model(&mut self) -> Result<()> {
        self.settings.validate()?;
        tracing::info!("Loading zero-shot model {}", self.model);
        let pipeline = self.loader.load(self.model.model_id(), &self.settings)?;
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let predictions = self
            .pipeline()?
            .predict(texts, GoldenSignal::LABELS, false, batch_size)?;

        predictions
            .iter()
            .map(|prediction| {
                prediction
                    .pairs()
                    .max_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(label, score)| ClassificationResult::single(label, score))
                    .ok_or_else(|| Error::backend("zero-shot pipeline returned no scores"))
            })
            .collect()
    }

    fn classify_fault_category(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let predictions = self
            .pipeline()?
            .predict(texts, FaultCategory::LABELS, true, batch_size)?;

        let threshold = self.settings.fault_threshold;
        Ok(predictions
            .iter()
            .map(|prediction| {
                let mut kept: Vec<(&str, f32)> = prediction
                    .pairs()
                    .filter(|(_, score)| *score >= threshold)
                    .collect();
                kept.sort_by(|a, b| b.1.total_cmp(&a.1));
                ClassificationResult::from_pairs(kept)
            })
            .collect())
    }

    fn name(&self) -> &str {
        self.model.model_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_from_str() {
        assert_eq!("bart".parse::<ZeroShotModel>().unwrap(), ZeroShotModel::Bart);
        assert_eq!("BART".parse::<ZeroShotModel>().unwrap(), ZeroShotModel::Bart);
        assert_eq!(
            "CrossEncoder".parse::<ZeroShotModel>().unwrap(),
            ZeroShotModel::CrossEncoder
        );
        assert_eq!(
            "facebook/bart-large-mnli".parse::<ZeroShotModel>().unwrap(),
            ZeroShotModel::Bart
        );
        assert_eq!(
            "cross-encoder/nli-MiniLM2-L6-H768"
                .parse::<ZeroShotModel>()
                .unwrap(),
            ZeroShotModel::CrossEncoder
        );
        assert_eq!(
            "org/my-nli".parse::<ZeroShotModel>().unwrap(),
            ZeroShotModel::Custom("org/my-nli".to_string())
        );
        assert!("  ".parse::<ZeroShotModel>().is_err());
        assert_eq!(ZeroShotModel::default(), ZeroShotModel::CrossEncoder);
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ZeroShotSettings = serde_yaml::from_str("device: cuda").unwrap();
        assert_eq!(settings.device, "cuda");
        assert!((settings.fault_threshold - 0.3).abs() < f32::EPSILON);
        assert_eq!(settings.max_length, 512);
        assert_eq!(settings.revision, "main");
        assert_eq!(settings.hypothesis("latency"), "This example is latency.");
    }

    #[test]
    fn test_settings_validation() {
        let settings = ZeroShotSettings {
            fault_threshold: 1.5,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(Error::Config(_))));

        let settings = ZeroShotSettings {
            max_length: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_classify_before_init_is_backend_error() {
        let classifier = ZeroShotClassifier::new(ZeroShotModel::default(), Default::default());
        assert!(!classifier.is_initialized());

        let err = classifier
            .classify_golden_signal(&["boom".to_string()], 32)
            .unwrap_err();
        assert!(matches!(err, Error::Backend(_)));
    }
}
