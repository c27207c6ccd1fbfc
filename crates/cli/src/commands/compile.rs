//! analyze, plan and generate

use anyhow::{Context, Result};
use clap::Args;

use artk_e2e::Pipeline;

use crate::output::{print_list, print_success, print_warning, OutputFormat};

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Only analyze these journey ids
    #[arg(long = "only", value_name = "ID")]
    pub only: Vec<String>,
}

pub fn analyze(pipeline: &Pipeline, args: AnalyzeArgs, format: OutputFormat) -> Result<bool> {
    let journeys = pipeline
        .analyze(&args.only)
        .context("journey analysis failed")?;
    print_list(&journeys, format);

    if format == OutputFormat::Table {
        for journey in journeys.iter().filter(|j| !j.warnings.is_empty()) {
            for warning in &journey.warnings {
                print_warning(&format!("{}: {warning}", journey.id));
            }
        }
        print_success(&format!("{} journey(s) ready for planning", journeys.len()));
    }
    Ok(true)
}

pub fn plan(pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    let coverage = pipeline.plan().context("planning failed")?;
    print_list(&coverage, format);

    let blocked: usize = coverage.iter().map(|c| c.blocked).sum();
    if format == OutputFormat::Table {
        if blocked > 0 {
            print_warning(&format!(
                "{blocked} step(s) could not be resolved and will fail at runtime; see {}",
                pipeline.paths().telemetry_file.display()
            ));
        } else {
            print_success("every step resolved");
        }
    }
    Ok(true)
}

pub fn generate(pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    let files = pipeline.generate().context("code generation failed")?;
    print_list(&files, format);
    if format == OutputFormat::Table {
        let changed = files.iter().filter(|f| f.created || f.changed).count();
        print_success(&format!("{changed} of {} test file(s) written", files.len()));
    }
    Ok(true)
}
