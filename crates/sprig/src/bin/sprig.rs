use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sprig::bundle::ModelBundle;
use sprig::config::PipelineConfig;
use sprig::pipeline::Pipeline;
use sprig::rank::KeepPolicy;

/// Prune the third convolution of a quantized model and retrain its head
#[derive(Parser)]
#[command(name = "sprig", version)]
struct Cli {
    /// Model bundle JSON (model, train and test images)
    #[arg(long)]
    bundle: PathBuf,
    /// Pipeline config JSON; every field is optional
    #[arg(long)]
    config: Option<PathBuf>,
    /// Filters to keep, overrides the config
    #[arg(long)]
    keep: Option<usize>,
    /// Retraining epochs, overrides the config
    #[arg(long)]
    epochs: Option<usize>,
    /// Keep the least salient filters instead of the most salient
    #[arg(long)]
    keep_lowest: bool,
    /// Materializer worker threads, overrides the config
    #[arg(long)]
    workers: Option<usize>,
    /// Where to write the outcome JSON; stdout when absent
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .init();
}

/// Command-line flags win over the config file.
fn apply_overrides(mut config: PipelineConfig, cli: &Cli) -> PipelineConfig {
    if let Some(keep) = cli.keep {
        config = config.keep_filters(keep);
    }
    if let Some(epochs) = cli.epochs {
        config = config.epochs(epochs);
    }
    if let Some(workers) = cli.workers {
        config = config.num_workers(workers);
    }
    if cli.keep_lowest {
        config = config.policy(KeepPolicy::Lowest);
    }
    config
}

fn run(cli: Cli) -> sprig::Result<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let config = apply_overrides(config, &cli);

    let bundle = ModelBundle::load(&cli.bundle)?;
    tracing::info!(
        bundle = %cli.bundle.display(),
        train = bundle.train.len(),
        test = bundle.test.len(),
        "bundle loaded"
    );
    let outcome = Pipeline::new(&bundle.model, config)?.run(&bundle.train, &bundle.test)?;

    let json = serde_json::to_string_pretty(&outcome)?;
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!(output = %path.display(), "outcome written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn main() {
    init_tracing();
    if let Err(e) = run(Cli::parse()) {
        tracing::error!(error = %e, "pruning event failed");
        process::exit(1);
    }
}
