use std::io::BufRead;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use npoclass::{ClassifyOptions, Granularity, Input, NpoClass, DEFAULT_MODEL_PATH};

/// Classify nonprofit descriptions into NTEE categories.
///
/// Texts come from the arguments, or one per line on stdin when none are
/// given. Predictions are printed to stdout as a JSON array.
#[derive(Debug, Parser)]
#[command(name = "npoclass", version)]
struct Cli {
    /// Texts to classify.
    texts: Vec<String>,

    /// Directory with config.json, model.safetensors, the tokenizer and the
    /// label encoders.
    #[arg(long, env = "NPOCLASS_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    model_path: PathBuf,

    /// Category granularity: `bc` (broad category) or `mg` (major group).
    #[arg(long, env = "NPOCLASS_NTEE_TYPE", default_value = "bc")]
    ntee_type: String,

    /// Stay on the CPU even when a GPU is available.
    #[arg(long)]
    cpu: bool,

    /// Pretty-print the JSON output.
    #[arg(long)]
    pretty: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("npoclass=info".parse()?),
        )
        .init();

    let granularity: Granularity = cli.ntee_type.parse()?;
    let options = ClassifyOptions {
        use_accelerator: !cli.cpu,
        model_path: cli.model_path,
        granularity,
    };

    let texts = if cli.texts.is_empty() {
        std::io::stdin()
            .lock()
            .lines()
            .filter(|line| line.as_ref().map_or(true, |l| !l.trim().is_empty()))
            .collect::<std::io::Result<Vec<_>>>()
            .context("failed to read texts from stdin")?
    } else {
        cli.texts
    };

    let classifier = NpoClass::new();
    let predictions = classifier
        .classify(Input::Batch(texts), &options)
        .with_context(|| format!("classification with model at {}", options.model_path.display()))?;

    let output = if cli.pretty {
        serde_json::to_string_pretty(&predictions)?
    } else {
        serde_json::to_string(&predictions)?
    };
    println!("{output}");
    Ok(())
}
