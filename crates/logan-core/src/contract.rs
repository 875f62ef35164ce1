//! The classification contract every backend implements

use crate::types::{ClassificationResult, Task};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::fmt;

/// Batch size used when the caller has no preference
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Constructor arguments passed to a model class
pub type ModelKwargs = serde_json::Map<String, serde_json::Value>;

/// Trait for all classification backends.
///
/// The manager calls [`init_model`](Self::init_model) exactly once, before any classify call.
/// Both classify operations return one result per input text, in input order. `batch_size`
/// only groups inputs for throughput and never changes the labels returned.
///
/// Implementations are `Send` but not required to be `Sync`: one caller at a time.
pub trait ClassificationModel: Send {
    /// One-time setup (weights, pipelines, warm-up)
    fn init_model(&mut self) -> Result<()>;

    /// Assign exactly one golden signal label per text
    fn classify_golden_signal(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>>;

    /// Assign zero or more fault category labels per text
    fn classify_fault_category(
        &self,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>>;

    /// Get the backend name
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Operations this backend actually provides.
    ///
    /// Native implementations provide all of them. Foreign backends report the slots they
    /// filled, which is what registration and construction check against.
    fn operations(&self) -> Operations {
        Operations::ALL
    }

    /// Dispatch to the classify operation for `task`
    fn classify(
        &self,
        task: Task,
        texts: &[String],
        batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        match task {
            Task::GoldenSignal => self.classify_golden_signal(texts, batch_size),
            Task::FaultCategory => self.classify_fault_category(texts, batch_size),
        }
    }
}

/// Construction from keyword arguments, for types registered as model classes
pub trait FromKwargs: Sized {
    fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self>;
}

/// Deserialize keyword arguments into a settings struct
pub fn kwargs_into<T: DeserializeOwned>(kwargs: &ModelKwargs) -> Result<T> {
    serde_json::from_value(serde_json::Value::Object(kwargs.clone()))
        .map_err(|e| Error::config(format!("invalid model arguments: {}", e)))
}

/// Set of contract operations
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Operations(u8);

impl Operations {
    pub const NONE: Self = Self(0);
    pub const INIT_MODEL: Self = Self(1 << 0);
    pub const CLASSIFY_GOLDEN_SIGNAL: Self = Self(1 << 1);
    pub const CLASSIFY_FAULT_CATEGORY: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    const NAMES: [(Self, &'static str); 3] = [
        (Self::INIT_MODEL, "init_model"),
        (Self::CLASSIFY_GOLDEN_SIGNAL, "classify_golden_signal"),
        (Self::CLASSIFY_FAULT_CATEGORY, "classify_fault_category"),
    ];

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_complete(self) -> bool {
        self.contains(Self::ALL)
    }

    /// Names of the contract operations absent from this set
    pub fn missing(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(op, _)| !self.contains(*op))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Fail with a contract violation unless every operation is present
    pub fn ensure_complete(self, subject: &str) -> Result<()> {
        if self.is_complete() {
            return Ok(());
        }
        Err(Error::contract(format!(
            "{} does not implement the classification contract; missing: {}",
            subject,
            self.missing().join(", ")
        )))
    }
}

impl std::ops::BitOr for Operations {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl fmt::Debug for Operations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(op, _)| self.contains(*op))
            .map(|(_, name)| *name)
            .collect();
        f.debug_tuple("Operations").field(&present).finish()
    }
}

/// Check a backend's output against the result-shape guarantees of `task`.
///
/// One result per input, parallel label/score vectors, scores within [0, 1], labels drawn from
/// the task taxonomy, and exactly one label per golden signal result.
pub fn validate_results(
    backend: &str,
    task: Task,
    input_len: usize,
    results: &[ClassificationResult],
) -> Result<()> {
    if results.len() != input_len {
        return Err(Error::contract(format!(
            "{} returned {} {} results for {} inputs",
            backend,
            results.len(),
            task,
            input_len
        )));
    }

    let taxonomy = task.candidate_labels();
    for (idx, result) in results.iter().enumerate() {
        if result.labels.len() != result.scores.len() {
            return Err(Error::contract(format!(
                "{} result {} for {} has {} labels but {} scores",
                backend,
                idx,
                task,
                result.labels.len(),
                result.scores.len()
            )));
        }
        if task == Task::GoldenSignal && result.labels.len() != 1 {
            return Err(Error::contract(format!(
                "{} result {} for golden_signal must carry exactly one label, got {}",
                backend,
                idx,
                result.labels.len()
            )));
        }
        for (label, score) in result.pairs() {
            if !taxonomy.iter().any(|known| *known == label) {
                return Err(Error::contract(format!(
                    "{} result {} for {} uses unknown label '{}'",
                    backend, idx, task, label
                )));
            }
            if !(0.0..=1.0).contains(&score) {
                return Err(Error::contract(format!(
                    "{} result {} for {} has score {} outside [0, 1]",
                    backend, idx, task, score
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operations_missing() {
        let ops = Operations::INIT_MODEL | Operations::CLASSIFY_FAULT_CATEGORY;
        assert!(!ops.is_complete());
        assert_eq!(ops.missing(), vec!["classify_golden_signal"]);
        assert!(Operations::ALL.missing().is_empty());
    }

    #[test]
    fn test_ensure_complete_names_missing_operations() {
        let err = Operations::INIT_MODEL
            .ensure_complete("HalfModel")
            .unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, Error::ContractViolation(_)));
        assert!(msg.contains("classify_golden_signal"));
        assert!(msg.contains("classify_fault_category"));
    }

    #[test]
    fn test_validate_results_accepts_well_formed_output() {
        let golden = vec![ClassificationResult::single("error", 0.8)];
        assert!(validate_results("stub", Task::GoldenSignal, 1, &golden).is_ok());

        let fault = vec![
            ClassificationResult::from_pairs([("io", 0.9), ("device", 0.35)]),
            ClassificationResult::empty(),
        ];
        assert!(validate_results("stub", Task::FaultCategory, 2, &fault).is_ok());
    }

    #[test]
    fn test_validate_results_rejects_bad_shapes() {
        let count = vec![ClassificationResult::single("error", 0.8)];
        assert!(validate_results("stub", Task::GoldenSignal, 2, &count).is_err());

        let multi_golden = vec![ClassificationResult::from_pairs([
            ("error", 0.6),
            ("latency", 0.3),
        ])];
        assert!(validate_results("stub", Task::GoldenSignal, 1, &multi_golden).is_err());

        let unknown = vec![ClassificationResult::single("disk", 0.9)];
        assert!(validate_results("stub", Task::FaultCategory, 1, &unknown).is_err());

        let out_of_range = vec![ClassificationResult::single("io", 1.5)];
        assert!(validate_results("stub", Task::FaultCategory, 1, &out_of_range).is_err());

        let ragged = vec![ClassificationResult {
            labels: vec!["io".to_string()],
            scores: vec![],
        }];
        assert!(validate_results("stub", Task::FaultCategory, 1, &ragged).is_err());
    }

    #[test]
    fn test_kwargs_into() {
        #[derive(Debug, serde::Deserialize)]
        struct Settings {
            threshold: f32,
        }

        let mut kwargs = ModelKwargs::new();
        kwargs.insert("threshold".to_string(), serde_json::json!(0.8));
        let settings: Settings = kwargs_into(&kwargs).unwrap();
        assert!((settings.threshold - 0.8).abs() < f32::EPSILON);

        let err = kwargs_into::<Settings>(&ModelKwargs::new()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
