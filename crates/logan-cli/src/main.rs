//! Logan Classify
//!
//! Classifies log lines into golden signals and fault categories and prints the results as a
//! JSON array. Logs go to stderr so stdout stays machine-readable.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use logan_core::{ClassificationResult, ModelKwargs};
use logan_models::{ManagerConfig, ModelManager, ModelRegistry, ModelType};
use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "logan-classify")]
#[command(about = "Classify log lines into golden signals and fault categories", long_about = None)]
struct Cli {
    /// Input file with one log line per record, or '-' for stdin
    #[arg(short, long, default_value = "-")]
    input: String,

    /// Manager configuration file (YAML)
    #[arg(short, long, env = "LOGAN_CONFIG")]
    config: Option<PathBuf>,

    /// Backend family: zero_shot, similarity or custom
    #[arg(short = 't', long)]
    model_type: Option<String>,

    /// Built-in selector (bart, crossencoder, hub id) or '<library>:<Class>' for custom models
    #[arg(short, long)]
    model: Option<String>,

    /// Constructor arguments for custom models, as a JSON object
    #[arg(short, long)]
    kwargs: Option<String>,

    /// Which classification to run
    #[arg(long, value_enum, default_value_t = TaskArg::Both)]
    task: TaskArg,

    /// Texts per batch (defaults to the configured batch size)
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum TaskArg {
    GoldenSignal,
    FaultCategory,
    Both,
}

impl TaskArg {
    fn golden_signal(self) -> bool {
        matches!(self, Self::GoldenSignal | Self::Both)
    }

    fn fault_category(self) -> bool {
        matches!(self, Self::FaultCategory | Self::Both)
    }
}

#[derive(Serialize, Debug)]
struct Record<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    golden_signal: Option<&'a ClassificationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fault_category: Option<&'a ClassificationResult>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = build_config(&cli)?;
    let texts = read_texts(&cli.input)?;
    info!("Read {} log lines from {}", texts.len(), cli.input);

    let registry = ModelRegistry::new();
    let manager = ModelManager::from_config(&config, None, &registry)?;
    let batch_size = cli.batch_size.unwrap_or(manager.batch_size());

    let golden = if cli.task.golden_signal() {
        Some(manager.classify_golden_signal(&texts, batch_size)?)
    } else {
        None
    };
    let fault = if cli.task.fault_category() {
        Some(manager.classify_fault_category(&texts, batch_size)?)
    } else {
        None
    };

    let records = build_records(&texts, golden.as_deref(), fault.as_deref());
    println!("{}", serde_json::to_string_pretty(&records)?);

    info!("Classified {} log lines with {}", texts.len(), manager.backend());
    Ok(())
}

/// Configuration file (or defaults) with command-line overrides applied
fn build_config(cli: &Cli) -> Result<ManagerConfig> {
    let mut config = match &cli.config {
        Some(path) => ManagerConfig::from_file(path)?,
        None => ManagerConfig::default(),
    };

    if let Some(model_type) = &cli.model_type {
        config.model_type = model_type.parse::<ModelType>()?;
    }
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
    if let Some(kwargs) = &cli.kwargs {
        let kwargs: ModelKwargs =
            serde_json::from_str(kwargs).context("--kwargs must be a JSON object")?;
        config.custom_model_kwargs = Some(kwargs);
    }
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }

    Ok(config)
}

fn read_texts(input: &str) -> Result<Vec<String>> {
    let reader: Box<dyn Read> = if input == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(
            std::fs::File::open(input).with_context(|| format!("failed to open {}", input))?,
        )
    };

    let mut texts = Vec::new();
    for line in BufReader::new(reader).lines() {
        let line = line?;
        let line = line.trim();
        if !line.is_empty() {
            texts.push(line.to_string());
        }
    }
    Ok(texts)
}

fn build_records<'a>(
    texts: &'a [String],
    golden: Option<&'a [ClassificationResult]>,
    fault: Option<&'a [ClassificationResult]>,
) -> Vec<Record<'a>> {
    texts
        .iter()
        .enumerate()
        .map(|(idx, text)| Record {
            text,
            golden_signal: golden.and_then(|results| results.get(idx)),
            fault_category: fault.and_then(|results| results.get(idx)),
        })
        .collect()
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("logan=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logan=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["logan-classify"]).unwrap();
        assert_eq!(cli.input, "-");
        assert_eq!(cli.task, TaskArg::Both);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_overrides_apply_to_config() {
        let cli = Cli::try_parse_from([
            "logan-classify",
            "--model-type",
            "custom",
            "--model",
            "./libkw.so:KeywordModel",
            "--kwargs",
            r#"{"threshold": 0.5}"#,
            "--batch-size",
            "8",
            "--task",
            "fault-category",
        ])
        .unwrap();
        assert!(!cli.task.golden_signal());
        assert!(cli.task.fault_category());

        let config = build_config(&cli).unwrap();
        assert_eq!(config.model_type, ModelType::Custom);
        assert_eq!(config.model.as_deref(), Some("./libkw.so:KeywordModel"));
        assert_eq!(config.batch_size, 8);
        assert_eq!(
            config.custom_model_kwargs.unwrap()["threshold"],
            serde_json::json!(0.5)
        );
    }

    #[test]
    fn test_overrides_on_top_of_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logan.yaml");
        std::fs::write(&path, "type: zero_shot\nmodel: bart\nbatch_size: 16\n").unwrap();

        let cli = Cli::try_parse_from([
            "logan-classify",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "crossencoder",
        ])
        .unwrap();
        let config = build_config(&cli).unwrap();
        assert_eq!(config.model_type, ModelType::ZeroShot);
        assert_eq!(config.model.as_deref(), Some("crossencoder"));
        assert_eq!(config.batch_size, 16);
    }

    #[test]
    fn test_bad_kwargs_rejected() {
        let cli = Cli::try_parse_from(["logan-classify", "--kwargs", "[1, 2]"]).unwrap();
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn test_read_texts_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, "first line\n\n   \n  second line  \n").unwrap();

        let texts = read_texts(path.to_str().unwrap()).unwrap();
        assert_eq!(texts, vec!["first line", "second line"]);
    }

    #[test]
    fn test_records_omit_tasks_not_run() {
        let texts = vec!["disk failure".to_string()];
        let fault = vec![ClassificationResult::single("io", 0.9)];
        let records = build_records(&texts, None, Some(fault.as_slice()));

        let json = serde_json::to_value(&records).unwrap();
        assert_eq!(json[0]["text"], "disk failure");
        assert!(json[0].get("golden_signal").is_none());
        assert_eq!(json[0]["fault_category"]["labels"][0], "io");
    }
}
