use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use demo_cdk::{DemoCdkStack, DeploymentConfig};

/// Declares the website and its release pipeline, and writes the
/// cloudformation templates for them.
#[derive(Parser, Debug)]
#[command(name = "demo-cdk", version, about)]
struct Cli {
    /// directory the templates and manifest are written to
    #[arg(long, default_value = "cdk.out")]
    output: PathBuf,

    /// dotenv file layered under the process environment. May be missing.
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,
}

/// RUST_LOG, defaulting to info. Logs go to stderr.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = DeploymentConfig::from_env(&cli.env_file)
        .with_context(|| format!("Failed to resolve configuration from {:?}", cli.env_file))?;
    tracing::info!(prefix = %config.prefix(), region = %config.region, stage = %config.stage(), "resolved configuration");

    let app = DemoCdkStack::build(&config).context("Failed to declare stacks")?;
    let summary = app
        .synth(&cli.output)
        .with_context(|| format!("Failed to synthesize into {:?}", cli.output))?;

    for template in summary.templates.iter() {
        tracing::info!(path = ?template, "wrote template");
    }
    for ((stack, key), value) in summary.outputs.iter() {
        tracing::debug!(%stack, %key, %value, "output");
    }
    tracing::info!(manifest = ?summary.manifest, stacks = summary.templates.len(), "synthesis complete");
    Ok(())
}
