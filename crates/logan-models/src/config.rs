//! Model manager configuration

use crate::manager::{ModelSpec, ModelType};
use crate::zero_shot::{ZeroShotModel, ZeroShotSettings};
use logan_core::{ClassificationModel, Error, ModelKwargs, Result, DEFAULT_BATCH_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Manager configuration, usually read from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Backend family
    #[serde(rename = "type", default)]
    pub model_type: ModelType,

    /// Built-in selector for `zero_shot`, `<library>:<Class>` for `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Constructor arguments for custom classes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_model_kwargs: Option<ModelKwargs>,

    /// Default batch size for classify calls
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Settings of the built-in zero-shot classifier
    #[serde(default)]
    pub zero_shot: ZeroShotSettings,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            model_type: ModelType::default(),
            model: None,
            custom_model_kwargs: None,
            batch_size: DEFAULT_BATCH_SIZE,
            zero_shot: ZeroShotSettings::default(),
        }
    }
}

impl ManagerConfig {
    /// Parse from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid manager configuration: {}", e)))
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            Error::config(format!("failed to parse config {}: {}", path.display(), e))
        })
    }

    /// Resolve the configured options, plus an optional pre-built instance, into a model spec.
    ///
    /// Fails with a config error when options are missing or contradict each other.
    pub fn into_spec(&self, instance: Option<Box<dyn ClassificationModel>>) -> Result<ModelSpec> {
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than zero"));
        }

        let has_kwargs = self
            .custom_model_kwargs
            .as_ref()
            .map(|kwargs| !kwargs.is_empty())
            .unwrap_or(false);

        if self.model_type != ModelType::Custom {
            if instance.is_some() {
                return Err(Error::config(format!(
                    "a model instance can only be supplied with type 'custom', not '{}'",
                    self.model_type
                )));
            }
            if has_kwargs {
                return Err(Error::config(format!(
                    "custom_model_kwargs only apply to type 'custom', not '{}'",
                    self.model_type
                )));
            }
        }

        match self.model_type {
            ModelType::ZeroShot => {
                let model = match &self.model {
                    Some(selector) => selector.parse()?,
                    None => ZeroShotModel::default(),
                };
                Ok(ModelSpec::ZeroShot {
                    model,
                    settings: self.zero_shot.clone(),
                })
            }
            ModelType::Similarity => Ok(ModelSpec::Similarity),
            ModelType::Custom => match (&self.model, instance) {
                (Some(path), None) => Ok(ModelSpec::CustomPath {
                    path: path.clone(),
                    kwargs: self.custom_model_kwargs.clone().unwrap_or_default(),
                }),
                (None, Some(instance)) => {
                    if has_kwargs {
                        return Err(Error::config(
                            "custom_model_kwargs cannot be applied to a pre-built model instance",
                        ));
                    }
                    Ok(ModelSpec::CustomInstance(instance))
                }
                (Some(_), Some(_)) => Err(Error::config(
                    "custom type takes either a model path or a model instance, not both",
                )),
                (None, None) => Err(Error::config(
                    "custom type requires a model path ('<library>:<Class>') or a model instance",
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
type: custom
model: ./plugins/libkeyword.so:KeywordModel
custom_model_kwargs:
  threshold: 0.5
batch_size: 8
zero_shot:
  fault_threshold: 0.4
"#;
        let config = ManagerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.model_type, ModelType::Custom);
        assert_eq!(config.batch_size, 8);
        assert!((config.zero_shot.fault_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(
            config.custom_model_kwargs.as_ref().unwrap()["threshold"],
            serde_json::json!(0.5)
        );

        match config.into_spec(None).unwrap() {
            ModelSpec::CustomPath { path, kwargs } => {
                assert_eq!(path, "./plugins/libkeyword.so:KeywordModel");
                assert_eq!(kwargs.len(), 1);
            }
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config, ManagerConfig::default());
        assert_eq!(config.model_type, ModelType::ZeroShot);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);

        match config.into_spec(None).unwrap() {
            ModelSpec::ZeroShot { model, .. } => assert_eq!(model, ZeroShotModel::CrossEncoder),
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[test]
    fn test_zero_shot_selector() {
        let config = ManagerConfig::from_yaml_str("type: zero_shot\nmodel: bart").unwrap();
        match config.into_spec(None).unwrap() {
            ModelSpec::ZeroShot { model, .. } => assert_eq!(model, ZeroShotModel::Bart),
            other => panic!("unexpected spec: {:?}", other),
        }
    }

    #[test]
    fn test_conflicting_options() {
        let kwargs_on_zero_shot =
            ManagerConfig::from_yaml_str("type: zero_shot\ncustom_model_kwargs: {a: 1}").unwrap();
        assert!(matches!(
            kwargs_on_zero_shot.into_spec(None),
            Err(Error::Config(_))
        ));

        let custom_without_model = ManagerConfig::from_yaml_str("type: custom").unwrap();
        assert!(matches!(
            custom_without_model.into_spec(None),
            Err(Error::Config(_))
        ));

        let zero_batch = ManagerConfig::from_yaml_str("batch_size: 0").unwrap();
        assert!(zero_batch.into_spec(None).is_err());
    }

    #[test]
    fn test_unknown_type_is_config_error() {
        let err = ManagerConfig::from_yaml_str("type: generative").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logan.yaml");
        std::fs::write(&path, "type: similarity\n").unwrap();

        let config = ManagerConfig::from_file(&path).unwrap();
        assert!(matches!(config.into_spec(None), Ok(ModelSpec::Similarity)));

        let missing = ManagerConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, Error::Config(_)));
    }
}
