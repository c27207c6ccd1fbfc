//! CLI Commands

pub mod compile;
pub mod run;
pub mod state;

use anyhow::Result;
use clap::Subcommand;

use artk_e2e::Pipeline;

use crate::output::OutputFormat;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Parse and validate journeys
    Analyze(compile::AnalyzeArgs),

    /// Compile analyzed journeys to IR
    Plan,

    /// Write Playwright tests from the compiled IR
    Generate,

    /// Run the generated tests
    Test,

    /// Repair failing tests with bounded fixes
    Heal,

    /// Show pipeline state
    Status(state::StatusArgs),

    /// Reset pipeline state and compiled IR, keeping test files
    Clean,
}

/// Run one command. `Ok(false)` means it ran but the outcome calls for a non-zero exit.
pub async fn execute(command: Commands, pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    match command {
        Commands::Analyze(args) => compile::analyze(pipeline, args, format),
        Commands::Plan => compile::plan(pipeline, format),
        Commands::Generate => compile::generate(pipeline, format),
        Commands::Test => run::test(pipeline, format).await,
        Commands::Heal => run::heal(pipeline, format).await,
        Commands::Status(args) => state::status(pipeline, args, format),
        Commands::Clean => state::clean(pipeline, format),
    }
}
