//! Keyword rule classifier for log lines
//!
//! A lightweight, weight-free backend. Each label owns a list of keywords; a label's score
//! grows with the number of distinct keywords found in the text (1 hit = 0.5, 2 hits = 0.75,
//! ...). Keywords only match whole words, so `oom` does not match inside `room`. Built as a `cdylib`, the crate is loadable by path:
//!
//! ```text
//! target/release/liblogan_keyword_plugin.so:KeywordModel
//! ```
//!
//! Constructor arguments:
//! - `fault_threshold` (default 0.3): minimum score for a fault category
//! - `information_score` (default 0.5): score given to `information` when no golden signal
//!   keyword matches
//! - `extra_keywords`: map of label to additional keywords

use aho_corasick::{AhoCorasick, MatchKind};
use logan_core::{
    kwargs_into, ClassificationModel, ClassificationResult, Error, FaultCategory, FromKwargs,
    GoldenSignal, ModelKwargs, Result,
};
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};

const GOLDEN_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "error",
        &[
            "error", "exception", "failed", "failure", "fatal", "panic", "traceback",
        ],
    ),
    (
        "availability",
        &[
            "unavailable",
            "unreachable",
            "offline",
            "connection refused",
            "not responding",
            "outage",
            "is down",
        ],
    ),
    (
        "latency",
        &["timeout", "timed out", "slow", "latency", "delayed", "took too long"],
    ),
    (
        "saturation",
        &[
            "out of memory",
            "oom",
            "disk full",
            "no space left",
            "quota exceeded",
            "exhausted",
            "too many open files",
        ],
    ),
    (
        "traffic",
        &[
            "requests per",
            "rate limit",
            "throttle",
            "throttled",
            "throttling",
            "qps",
            "spike",
            "burst",
        ],
    ),
];

const FAULT_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "io",
        &[
            "i/o", "io error", "read error", "write error", "disk", "filesystem", "fsync",
            "file", "files",
        ],
    ),
    (
        "authentication",
        &[
            "login",
            "password",
            "unauthorized",
            "forbidden",
            "token",
            "credential",
            "permission denied",
            "auth",
            "authentication",
        ],
    ),
    (
        "network",
        &[
            "connection", "socket", "network", "dns", "tcp", "unreachable", "reset by peer",
            "host",
        ],
    ),
    (
        "application",
        &[
            "exception", "null pointer", "stack trace", "traceback", "assert", "panic",
            "segfault",
        ],
    ),
    (
        "device",
        &["device", "sda", "nvme", "gpu", "hardware", "sensor", "controller"],
    ),
];

/// Constructor arguments of [`KeywordModel`]
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KeywordSettings {
    pub fault_threshold: f32,
    pub information_score: f32,
    pub extra_keywords: HashMap<String, Vec<String>>,
}

impl Default for KeywordSettings {
    fn default() -> Self {
        Self {
            fault_threshold: 0.3,
            information_score: 0.5,
            extra_keywords: HashMap::new(),
        }
    }
}

impl KeywordSettings {
    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fault_threshold", self.fault_threshold),
            ("information_score", self.information_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        for label in self.extra_keywords.keys() {
            let known = GoldenSignal::LABELS
                .iter()
                .chain(FaultCategory::LABELS)
                .any(|known| *known == label.as_str());
            if !known {
                return Err(Error::config(format!(
                    "extra_keywords uses unknown label '{}'",
                    label
                )));
            }
        }
        Ok(())
    }
}

/// Keyword automaton for one taxonomy
struct Matcher {
    automaton: AhoCorasick,
    labels: Vec<&'static str>,
    pattern_labels: Vec<usize>,
}

impl Matcher {
    fn build(
        table: &[(&'static str, &[&str])],
        extra: &HashMap<String, Vec<String>>,
    ) -> Result<Self> {
        let mut labels = Vec::with_capacity(table.len());
        let mut patterns: Vec<String> = Vec::new();
        let mut pattern_labels = Vec::new();

        for (idx, (label, keywords)) in table.iter().enumerate() {
            labels.push(*label);
            let extra_keywords = extra.get(*label).into_iter().flatten();
            for keyword in keywords.iter().map(|k| k.to_string()).chain(extra_keywords.cloned()) {
                if keyword.trim().is_empty() {
                    continue;
                }
                patterns.push(keyword);
                pattern_labels.push(idx);
            }
        }

        let automaton = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .map_err(|e| Error::backend(format!("failed to build keyword matcher: {}", e)))?;

        Ok(Self {
            automaton,
            labels,
            pattern_labels,
        })
    }

    /// Labels with at least one keyword hit, by descending score
    fn scores(&self, text: &str) -> Vec<(&'static str, f32)> {
        let mut hits: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); self.labels.len()];
        for found in self.automaton.find_overlapping_iter(text) {
            if !is_whole_word(text, found.start(), found.end()) {
                continue;
            }
            let pattern = found.pattern().as_usize();
            hits[self.pattern_labels[pattern]].insert(pattern);
        }

        let mut scored: Vec<(&'static str, f32)> = hits
            .iter()
            .enumerate()
            .filter(|(_, patterns)| !patterns.is_empty())
            .map(|(idx, patterns)| (self.labels[idx], hit_score(patterns.len())))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored
    }
}

/// Whether `text[start..end]` is not glued to a letter, digit or `_` on either side
fn is_whole_word(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let before = text[..start].chars().next_back().map_or(false, is_word);
    let after = text[end..].chars().next().map_or(false, is_word);
    !before && !after
}

fn hit_score(hits: usize) -> f32 {
    1.0 - 0.5f32.powi(hits.min(24) as i32)
}

struct Matchers {
    golden: Matcher,
    fault: Matcher,
}

/// Rule-based golden signal and fault category classifier
pub struct KeywordModel {
    settings: KeywordSettings,
    matchers: Option<Matchers>,
}

impl KeywordModel {
    pub fn new(settings: KeywordSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            matchers: None,
        })
    }

    pub fn settings(&self) -> &KeywordSettings {
        &self.settings
    }

    fn matchers(&self) -> Result<&Matchers> {
        self.matchers
            .as_ref()
            .ok_or_else(|| Error::backend("keyword model not initialised; call init_model first"))
    }
}

impl FromKwargs for KeywordModel {
    fn from_kwargs(kwargs: &ModelKwargs) -> Result<Self> {
        Self::new(kwargs_into(kwargs)?)
    }
}

impl ClassificationModel for KeywordModel {
    fn init_model(&mut self) -> Result<()> {
        self.matchers = Some(Matchers {
            golden: Matcher::build(GOLDEN_KEYWORDS, &self.settings.extra_keywords)?,
            fault: Matcher::build(FAULT_KEYWORDS, &self.settings.extra_keywords)?,
        });
        Ok(())
    }

    fn classify_golden_signal(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let matcher = &self.matchers()?.golden;
        Ok(texts
            .iter()
            .map(|text| match matcher.scores(text).first() {
                Some((label, score)) => ClassificationResult::single(*label, *score),
                None => ClassificationResult::single(
                    GoldenSignal::Information.as_str(),
                    self.settings.information_score,
                ),
            })
            .collect())
    }

    fn classify_fault_category(
        &self,
        texts: &[String],
        _batch_size: usize,
    ) -> Result<Vec<ClassificationResult>> {
        let matcher = &self.matchers()?.fault;
        let threshold = self.settings.fault_threshold;
        Ok(texts
            .iter()
            .map(|text| {
                ClassificationResult::from_pairs(
                    matcher
                        .scores(text)
                        .into_iter()
                        .filter(|(_, score)| *score >= threshold),
                )
            })
            .collect())
    }

    fn name(&self) -> &str {
        "KeywordModel"
    }
}

logan_core::export_models! {
    "KeywordModel" => KeywordModel,
}
