//! Blocked-step telemetry
//!
//! Every step the matcher cannot resolve is recorded with its normalized text and an
//! inferred category, then appended as one JSON object per line. The log exists for
//! offline pattern-gap analysis; nothing reads it back during a run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::Result;

/// Coarse category of a step, inferred from its verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCategory {
    Navigation,
    Interaction,
    Assertion,
    Wait,
    Unknown,
}

impl std::fmt::Display for StepCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepCategory::Navigation => write!(f, "navigation"),
            StepCategory::Interaction => write!(f, "interaction"),
            StepCategory::Assertion => write!(f, "assertion"),
            StepCategory::Wait => write!(f, "wait"),
            StepCategory::Unknown => write!(f, "unknown"),
        }
    }
}

const WAIT_WORDS: &[&str] = &["wait", "until", "loading", "loaded", "appears"];
const ASSERTION_WORDS: &[&str] = &[
    "see", "sees", "should", "verify", "assert", "ensure", "confirm", "visible", "displayed",
    "shown", "contains", "expect",
];
const NAVIGATION_WORDS: &[&str] = &[
    "navigate", "go", "goes", "open", "opens", "visit", "visits", "url", "redirected",
    "browse",
];
const INTERACTION_WORDS: &[&str] = &[
    "click", "clicks", "tap", "fill", "fills", "enter", "enters", "type", "types", "select",
    "selects", "check", "uncheck", "press", "presses", "hover", "drag", "drags", "drop",
    "upload", "uploads", "submit", "submits", "scroll", "choose",
];

/// Infer a step category from normalized step text.
///
/// Checked in order wait, assertion, navigation, interaction; the first family with a
/// matching word wins.
pub fn infer_category(normalized: &str) -> StepCategory {
    let words: Vec<&str> = normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let has_any = |family: &[&str]| words.iter().any(|w| family.contains(w));

    if has_any(WAIT_WORDS) {
        StepCategory::Wait
    } else if has_any(ASSERTION_WORDS) {
        StepCategory::Assertion
    } else if has_any(NAVIGATION_WORDS) {
        StepCategory::Navigation
    } else if has_any(INTERACTION_WORDS) {
        StepCategory::Interaction
    } else {
        StepCategory::Unknown
    }
}

/// Hint shown next to a blocked step
pub fn suggest_fix(category: StepCategory) -> Option<String> {
    let hint = match category {
        StepCategory::Navigation => "rewrite as `**Action**: Navigate to \"/path\"`",
        StepCategory::Interaction => {
            "rewrite as `**Action**: Click the \"Name\" button` or `Fill \"Field\" with \"value\"`"
        }
        StepCategory::Assertion => "rewrite as `**Assert**: \"Text\" is visible`",
        StepCategory::Wait => "rewrite as `**Wait for**: \"Element\" to be visible`",
        StepCategory::Unknown => return None,
    };
    Some(hint.to_string())
}

/// One blocked step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub journey_id: String,
    pub step_text: String,
    pub normalized_text: String,
    pub category: StepCategory,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_fix: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    pub fn new(
        journey_id: impl Into<String>,
        step_text: impl Into<String>,
        normalized_text: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let normalized_text = normalized_text.into();
        let category = infer_category(&normalized_text);
        Self {
            journey_id: journey_id.into(),
            step_text: step_text.into(),
            normalized_text,
            category,
            reason: reason.into(),
            suggested_fix: suggest_fix(category),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only JSON-lines sink
#[derive(Debug, Clone)]
pub struct TelemetrySink {
    path: PathBuf,
}

impl TelemetrySink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append records, one JSON object per line
    pub fn append(&self, records: &[TelemetryRecord]) -> Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&buf)?;

        debug!(path = %self.path.display(), count = records.len(), "appended telemetry");
        Ok(records.len())
    }

    /// Append records, logging instead of failing
    pub fn append_best_effort(&self, records: &[TelemetryRecord]) {
        if let Err(e) = self.append(records) {
            warn!(path = %self.path.display(), error = %e, "failed to write telemetry");
        }
    }

    /// Read every record back; malformed lines are skipped
    pub fn read_all(&self) -> Result<Vec<TelemetryRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        Ok(content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case("drag item to dropzone", StepCategory::Interaction)]
    #[test_case("wait for spinner to go away", StepCategory::Wait)]
    #[test_case("user should see {}", StepCategory::Assertion)]
    #[test_case("navigate to {}", StepCategory::Navigation)]
    #[test_case("celebrate", StepCategory::Unknown)]
    fn test_infer_category(text: &str, expected: StepCategory) {
        assert_eq!(infer_category(text), expected);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = TelemetryRecord::new("JRN-0001", "Drag it", "drag it", "no matching pattern");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["journeyId"], "JRN-0001");
        assert_eq!(value["normalizedText"], "drag it");
        assert_eq!(value["category"], "interaction");
        assert!(value.get("suggestedFix").is_some());
    }

    #[test]
    fn test_append_is_line_oriented() {
        let tmp = TempDir::new().unwrap();
        let sink = TelemetrySink::new(tmp.path().join("t/blocked.jsonl"));
        let a = TelemetryRecord::new("J1", "a", "a", "r");
        let b = TelemetryRecord::new("J1", "b", "b", "r");
        sink.append(&[a]).unwrap();
        sink.append(&[b]).unwrap();

        let content = std::fs::read_to_string(sink.path()).unwrap();
        assert_eq!(content.lines().count(), 2);
        let records = sink.read_all().unwrap();
        assert_eq!(records[1].step_text, "b");
    }
}
