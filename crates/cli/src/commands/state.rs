//! status and clean

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use artk_e2e::Pipeline;

use crate::output::{print_list, print_success, print_warning, render_structured, stage_label, OutputFormat};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Also list the command history
    #[arg(long)]
    pub history: bool,
}

pub fn status(pipeline: &Pipeline, args: StatusArgs, format: OutputFormat) -> Result<bool> {
    let loaded = pipeline.status();
    if let Some(backup) = &loaded.recovered_from {
        print_warning(&format!(
            "state file was unreadable; moved to {} and started fresh",
            backup.display()
        ));
    }
    let state = loaded.state;

    if let Some(rendered) = render_structured(&state, format) {
        println!("{rendered}");
        return Ok(true);
    }

    println!("{}", " ARTK Pipeline".bold());
    println!("  Stage:        {}", stage_label(state.stage));
    if let Some(reason) = &state.blocked_reason {
        println!("  Blocked:      {}", reason.red());
    }
    if let (Some(command), Some(at)) = (&state.last_command, state.last_command_at) {
        println!(
            "  Last command: {} {}",
            command,
            format!("({})", at.format("%Y-%m-%d %H:%M:%S")).dimmed()
        );
    }
    println!("  Journeys:     {}", state.journey_ids.len());
    println!("  Test files:   {}", state.test_paths.len());
    println!("  Refinements:  {}", state.refinement_attempts);
    let next = state
        .stage
        .successors()
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    println!("  Next stages:  {}", next.dimmed());

    if args.history {
        println!();
        print_list(&state.history, format);
    }
    Ok(true)
}

pub fn clean(pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    let state = pipeline.clean().context("clean failed")?;
    if let Some(rendered) = render_structured(&state, format) {
        println!("{rendered}");
    } else {
        print_success("pipeline reset; generated tests were kept");
    }
    Ok(true)
}
