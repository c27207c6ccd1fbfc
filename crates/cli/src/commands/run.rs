//! test and heal

use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use artk_e2e::Pipeline;

use crate::output::{
    print_error, print_list, print_success, render_structured, stage_label, OutputFormat,
};

fn spinner(message: &str, format: OutputFormat) -> ProgressBar {
    if format != OutputFormat::Table {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
        bar.set_style(style);
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub async fn test(pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    let bar = spinner("running tests", format);
    let result = pipeline.test().await;
    bar.finish_and_clear();
    let report = result.context("test run failed")?;

    if let Some(rendered) = render_structured(&report, format) {
        println!("{rendered}");
        return Ok(report.outcome.passed());
    }

    let secs = report.outcome.duration_ms as f64 / 1000.0;
    if report.outcome.passed() {
        print_success(&format!("all tests passed in {secs:.1}s"));
        return Ok(true);
    }

    print_list(&report.failures, format);
    print_error(&format!(
        "tests {} after {secs:.1}s ({} attempt(s))",
        report.outcome.status.as_str(),
        report.outcome.attempts
    ));
    println!("{} run `artk heal` to attempt repairs", "→".cyan());
    Ok(false)
}

pub async fn heal(pipeline: &Pipeline, format: OutputFormat) -> Result<bool> {
    let bar = spinner("healing failing tests", format);
    let result = pipeline.heal().await;
    bar.finish_and_clear();
    let report = result.context("healing failed")?;

    if let Some(rendered) = render_structured(&report, format) {
        println!("{rendered}");
        return Ok(report.sessions.iter().all(|s| s.is_healed()));
    }

    print_list(&report.sessions, format);
    println!("Stage: {}", stage_label(report.stage));
    let healed = report.sessions.iter().all(|s| s.is_healed());
    if healed {
        print_success("all journeys pass");
    } else {
        let reason = pipeline.status().state.blocked_reason.unwrap_or_default();
        print_error(&format!("pipeline blocked: {reason}"));
        println!("{} fix the journeys by hand, then `artk clean`", "→".cyan());
    }
    Ok(healed)
}
