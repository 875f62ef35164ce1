//! Model manager: resolves a backend once and delegates classification to it

use crate::config::ManagerConfig;
use crate::registry::ModelRegistry;
use crate::zero_shot::{PipelineLoader, ZeroShotClassifier, ZeroShotModel, ZeroShotSettings};
use logan_core::{
    validate_results, ClassificationModel, ClassificationResult, Error, ModelKwargs, Result, Task,
    DEFAULT_BATCH_SIZE,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

/// Prefix of registry keys derived from path-specs
pub const AUTO_KEY_PREFIX: &str = "_auto_";

/// Backend family selected by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    /// Built-in zero-shot classifier
    #[default]
    #[serde(alias = "zero-shot", alias = "zeroshot")]
    ZeroShot,
    /// Embedding similarity (recognised, not implemented)
    Similarity,
    /// User-supplied class or instance
    Custom,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZeroShot => "zero_shot",
            Self::Similarity => "similarity",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "zero_shot" | "zeroshot" => Ok(Self::ZeroShot),
            "similarity" => Ok(Self::Similarity),
            "custom" => Ok(Self::Custom),
            other => Err(Error::config(format!(
                "unknown model type '{}' (expected zero_shot, similarity or custom)",
                other
            ))),
        }
    }
}

/// How the manager obtains its backend
pub enum ModelSpec {
    /// Built-in zero-shot classifier
    ZeroShot {
        model: ZeroShotModel,
        settings: ZeroShotSettings,
    },
    /// Similarity classifier (not implemented)
    Similarity,
    /// Class loaded from `<library>:<Class>`, constructed with `kwargs`
    CustomPath { path: String, kwargs: ModelKwargs },
    /// Ready-made backend
    CustomInstance(Box<dyn ClassificationModel>),
}

impl ModelSpec {
    /// Built-in zero-shot classifier with default settings
    pub fn zero_shot(model: ZeroShotModel) -> Self {
        Self::ZeroShot {
            model,
            settings: ZeroShotSettings::default(),
        }
    }

    /// Plugin class without constructor arguments
    pub fn custom_path(path: impl Into<String>) -> Self {
        Self::CustomPath {
            path: path.into(),
            kwargs: ModelKwargs::new(),
        }
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Self::ZeroShot { .. } => ModelType::ZeroShot,
            Self::Similarity => ModelType::Similarity,
            Self::CustomPath { .. } | Self::CustomInstance(_) => ModelType::Custom,
        }
    }
}

impl fmt::Debug for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroShot { model, settings } => f
                .debug_struct("ZeroShot")
                .field("model", model)
                .field("settings", settings)
                .finish(),
            Self::Similarity => f.write_str("Similarity"),
            Self::CustomPath { path, kwargs } => f
                .debug_struct("CustomPath")
                .field("path", path)
                .field("kwargs", kwargs)
                .finish(),
            Self::CustomInstance(model) => f
                .debug_tuple("CustomInstance")
                .field(&model.name())
                .finish(),
        }
    }
}

/// Deterministic registry key for a path-spec: `_auto_` plus 16 hex digits of its SHA-256
pub fn registry_key(path_spec: &str) -> String {
    let digest = Sha256::digest(path_spec.trim().as_bytes());
    let hex: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", AUTO_KEY_PREFIX, hex)
}

/// Facade over one initialised classification backend
pub struct ModelManager {
    model: Box<dyn ClassificationModel>,
    backend: String,
    batch_size: usize,
}

impl ModelManager {
    /// Resolve `spec`, construct the backend and initialise it
    pub fn new(spec: ModelSpec, registry: &ModelRegistry) -> Result<Self> {
        Self::build(spec, registry, None)
    }

    /// Like [`new`](Self::new), building zero-shot pipelines with `loader`
    pub fn with_pipeline_loader(
        spec: ModelSpec,
        registry: &ModelRegistry,
        loader: Arc<dyn PipelineLoader>,
    ) -> Result<Self> {
        Self::build(spec, registry, Some(loader))
    }

    /// Build from configuration, with an optional pre-built instance for `type: custom`
    pub fn from_config(
        config: &ManagerConfig,
        instance: Option<Box<dyn ClassificationModel>>,
        registry: &ModelRegistry,
    ) -> Result<Self> {
        let spec = config.into_spec(instance)?;
        let mut manager = Self::new(spec, registry)?;
        manager.batch_size = config.batch_size;
        Ok(manager)
    }

    fn build(
        spec: ModelSpec,
        registry: &ModelRegistry,
        loader: Option<Arc<dyn PipelineLoader>>,
    ) -> Result<Self> {
        let (mut model, backend): (Box<dyn ClassificationModel>, String) = match spec {
            ModelSpec::ZeroShot { model, settings } => {
                let backend = format!("zero_shot:{}", model);
                let classifier = match loader {
                    Some(loader) => ZeroShotClassifier::with_loader(model, settings, loader),
                    None => ZeroShotClassifier::new(model, settings),
                };
                (Box::new(classifier), backend)
            }
            ModelSpec::Similarity => {
                return Err(Error::unsupported(
                    "similarity-based classification is not implemented",
                ))
            }
            ModelSpec::CustomPath { path, kwargs } => {
                let key = registry_key(&path);
                let class = match registry.get(&key) {
                    Some(class) => {
                        debug!("Reusing registered class {} for '{}'", key, path);
                        class
                    }
                    None => registry.register_from_path(&key, &path)?,
                };
                let model = class.instantiate(&kwargs)?;
                (model, format!("custom:{}", class.class_name()))
            }
            ModelSpec::CustomInstance(instance) => {
                let backend = format!("custom:{}", instance.name());
                (instance, backend)
            }
        };

        model
            .operations()
            .ensure_complete(&format!("model backend '{}'", backend))?;

        info!("Initialising model backend {}", backend);
        model.init_model()?;
        info!("Model backend {} ready", backend);

        Ok(Self {
            model,
            backend,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    /// Pick exactly one golden signal per text
    pub fn classify_golden_signal(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        self.classify(Task::GoldenSignal, texts, batch_size)
    }

    /// Pick zero or more fault categories per text
    pub fn classify_fault_category(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        self.classify(Task::FaultCategory, texts, batch_size)
    }

    /// Run `task`, checking the backend's output before returning it
    pub fn classify(
        &self,
        task: Task,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        if batch_size == 0 {
            return Err(Error::config("batch_size must be greater than zero"));
        }

        debug!(
            "Classifying {} texts for {} with {} (batch_size={})",
            texts.len(),
            task,
            self.backend,
            batch_size
        );
        let results = self.model.classify(task, texts, batch_size)?;
        validate_results(&self.backend, task, texts.len(), &results)?;
        Ok(results)
    }

    /// Description of the bound backend, e.g. `custom:KeywordModel`
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// The bound backend
    pub fn model(&self) -> &dyn ClassificationModel {
        self.model.as_ref()
    }

    /// Batch size from configuration, or the default
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelManager")
            .field("backend", &self.backend)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}
