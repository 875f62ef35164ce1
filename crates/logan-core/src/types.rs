//! Result and taxonomy types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Labels and scores assigned to one input text.
///
/// `labels` and `scores` are parallel: `scores[i]` is the confidence of `labels[i]`,
/// ordered by descending confidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Assigned labels
    pub labels: Vec<String>,

    /// Confidence scores (0.0-1.0), one per label
    pub scores: Vec<f32>,
}

impl ClassificationResult {
    /// Create a result carrying exactly one label
    pub fn single(label: impl Into<String>, score: f32) -> Self {
        Self {
            labels: vec![label.into()],
            scores: vec![score],
        }
    }

    /// Create a result carrying no labels
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a result from `(label, score)` pairs, keeping their order
    pub fn from_pairs<I, L>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (L, f32)>,
        L: Into<String>,
    {
        let (labels, scores) = pairs
            .into_iter()
            .map(|(label, score)| (label.into(), score))
            .unzip();
        Self { labels, scores }
    }

    /// Append a label with its score
    pub fn push(&mut self, label: impl Into<String>, score: f32) {
        self.labels.push(label.into());
        self.scores.push(score);
    }

    /// Iterate over `(label, score)` pairs
    pub fn pairs(&self) -> impl Iterator<Item = (&str, f32)> {
        self.labels
            .iter()
            .map(String::as_str)
            .zip(self.scores.iter().copied())
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when no label was assigned
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Highest-ranked label, if any
    pub fn top(&self) -> Option<(&str, f32)> {
        self.pairs().next()
    }
}

/// Which of the two taxonomies a classification call targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    /// Single-label golden signal classification
    GoldenSignal,
    /// Multi-label fault category classification
    FaultCategory,
}

impl Task {
    /// Candidate labels for this task, in taxonomy order
    pub fn candidate_labels(&self) -> &'static [&'static str] {
        match self {
            Self::GoldenSignal => GoldenSignal::LABELS,
            Self::FaultCategory => FaultCategory::LABELS,
        }
    }

    /// Whether several labels may be assigned to one text
    pub fn is_multi_label(&self) -> bool {
        matches!(self, Self::FaultCategory)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoldenSignal => "golden_signal",
            Self::FaultCategory => "fault_category",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational concern of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoldenSignal {
    Information,
    Error,
    Availability,
    Latency,
    Saturation,
    Traffic,
}

impl GoldenSignal {
    pub const ALL: [GoldenSignal; 6] = [
        Self::Information,
        Self::Error,
        Self::Availability,
        Self::Latency,
        Self::Saturation,
        Self::Traffic,
    ];

    pub const LABELS: &'static [&'static str] = &[
        "information",
        "error",
        "availability",
        "latency",
        "saturation",
        "traffic",
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Error => "error",
            Self::Availability => "availability",
            Self::Latency => "latency",
            Self::Saturation => "saturation",
            Self::Traffic => "traffic",
        }
    }
}

impl fmt::Display for GoldenSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GoldenSignal {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|signal| signal.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::config(format!("unknown golden signal '{}'", s)))
    }
}

/// Failure domain of a log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCategory {
    Io,
    Authentication,
    Network,
    Application,
    Device,
}

impl FaultCategory {
    pub const ALL: [FaultCategory; 5] = [
        Self::Io,
        Self::Authentication,
        Self::Network,
        Self::Application,
        Self::Device,
    ];

    pub const LABELS: &'static [&'static str] =
        &["io", "authentication", "network", "application", "device"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Io => "io",
            Self::Authentication => "authentication",
            Self::Network => "network",
            Self::Application => "application",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for FaultCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultCategory {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::config(format!("unknown fault category '{}'", s)))
    }
}
