//! ARTK CLI - Main Entry Point

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use artk_cli::commands::{self, Commands};
use artk_cli::output::{print_error, OutputFormat};
use artk_common::config::ArtkConfig;
use artk_e2e::pipeline::CONFIG_FILE;
use artk_e2e::Pipeline;

/// ARTK - compile Journey documents into Playwright tests
#[derive(Parser, Debug)]
#[command(name = "artk")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root
    #[arg(long, default_value = ".", env = "ARTK_ROOT", global = true)]
    root: PathBuf,

    /// Configuration file, defaults to artk.toml under the root
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.root.join(CONFIG_FILE));
    let config = ArtkConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let pipeline = Pipeline::new(&cli.root, config)?;

    match commands::execute(cli.command, &pipeline, cli.format).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(2);
        }
    }
}
