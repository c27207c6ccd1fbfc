//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use artk_common::journey::CoverageSummary;
use artk_common::state::{HistoryEntry, Stage};
use artk_e2e::{ClassifiedFailure, GeneratedFile, HealingSession, JourneySummary};

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Serialize for the machine-readable formats; `None` for table and plain output
pub fn render_structured<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Option<String> {
    match format {
        OutputFormat::Json => Some(serde_json::to_string_pretty(value).unwrap_or_default()),
        OutputFormat::Yaml => Some(serde_yaml::to_string(value).unwrap_or_default()),
        OutputFormat::Table | OutputFormat::Plain => None,
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if let Some(rendered) = render_structured(items, format) {
        println!("{rendered}");
        return;
    }
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                for (header, value) in T::headers().iter().zip(item.row()) {
                    println!("{header}: {value}");
                }
            }
        }
        _ => {
            let mut table = table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            println!("{table}");
        }
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.red());
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

pub fn stage_label(stage: Stage) -> String {
    let name = stage.as_str();
    match stage {
        Stage::Completed => name.green().bold().to_string(),
        Stage::Blocked => name.red().bold().to_string(),
        Stage::Refining | Stage::Tested => name.yellow().to_string(),
        _ => name.cyan().to_string(),
    }
}

impl TableDisplay for JourneySummary {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "TITLE", "STEPS", "WARNINGS", "PATH"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.title.clone(),
            self.steps.to_string(),
            self.warnings.len().to_string(),
            self.path.display().to_string(),
        ]
    }
}

impl TableDisplay for CoverageSummary {
    fn headers() -> Vec<&'static str> {
        vec!["JOURNEY", "STEPS", "INSTRUCTIONS", "BLOCKED", "RESOLVED", "TIERS"]
    }

    fn row(&self) -> Vec<String> {
        let tiers = self
            .by_tier
            .iter()
            .map(|(tier, count)| format!("{tier}={count}"))
            .collect::<Vec<_>>()
            .join(" ");
        vec![
            self.journey_id.clone(),
            self.steps.to_string(),
            self.instructions.to_string(),
            self.blocked.to_string(),
            format!("{:.0}%", self.resolved_ratio() * 100.0),
            tiers,
        ]
    }
}

impl TableDisplay for GeneratedFile {
    fn headers() -> Vec<&'static str> {
        vec!["JOURNEY", "FILE", "RESULT"]
    }

    fn row(&self) -> Vec<String> {
        let result = match (self.created, self.changed) {
            (true, _) => "created",
            (false, true) => "updated",
            (false, false) => "unchanged",
        };
        vec![
            self.journey_id.clone(),
            self.path.display().to_string(),
            result.to_string(),
        ]
    }
}

impl TableDisplay for ClassifiedFailure {
    fn headers() -> Vec<&'static str> {
        vec!["CATEGORY", "TEST", "LOCATION", "SUGGESTION"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.category.to_string(),
            self.title.clone().unwrap_or_default(),
            self.location
                .as_ref()
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.suggestion.clone(),
        ]
    }
}

impl TableDisplay for HealingSession {
    fn headers() -> Vec<&'static str> {
        vec!["JOURNEY", "OUTCOME", "APPLIED", "FIXES", "SESSION"]
    }

    fn row(&self) -> Vec<String> {
        let fixes = self
            .attempts
            .iter()
            .filter(|a| a.applied)
            .map(|a| a.fix_type.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            self.journey_id.clone(),
            self.outcome.map(|o| o.as_str()).unwrap_or("-").to_string(),
            self.applied_count().to_string(),
            fixes,
            self.id.to_string(),
        ]
    }
}

impl TableDisplay for HistoryEntry {
    fn headers() -> Vec<&'static str> {
        vec!["TIME", "COMMAND", "STAGE", "RESULT"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            self.command.clone(),
            self.stage.to_string(),
            if self.success { "ok" } else { "failed" }.to_string(),
        ]
    }
}
