//! Failure classification for test runner output
//!
//! Output is split into one section per failing test (Playwright numbers them
//! `  1) [chromium] › file:line:col › title`). Each section gets exactly one category
//! from an ordered list of text checks, the first file:line[:col] reference found in
//! it, and a category-specific fix suggestion. A passed run has no failures, however
//! alarming its output looks.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::runner::{RunOutcome, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Compile,
    Selector,
    Navigation,
    Timeout,
    Assertion,
    Runtime,
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Compile => "compile",
            FailureCategory::Selector => "selector",
            FailureCategory::Navigation => "navigation",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Assertion => "assertion",
            FailureCategory::Runtime => "runtime",
            FailureCategory::Unknown => "unknown",
        }
    }

    pub fn suggestion(&self) -> &'static str {
        match self {
            FailureCategory::Compile => {
                "Generated source does not compile: check module imports and fixtures, then regenerate"
            }
            FailureCategory::Selector => {
                "Locator did not resolve to exactly one element: prefer a role or label locator, or add a test id"
            }
            FailureCategory::Navigation => {
                "Page did not reach the expected URL: wait for the navigation or load state before continuing"
            }
            FailureCategory::Timeout => {
                "Operation timed out: wait for the triggering response or raise the assertion timeout"
            }
            FailureCategory::Assertion => {
                "Expectation did not hold: check the expected text or make test data unique per run"
            }
            FailureCategory::Runtime => {
                "Test threw at runtime: check blocked steps and module calls in the generated source"
            }
            FailureCategory::Unknown => "Inspect the raw runner output",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file:line[:col] reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.column {
            Some(col) => write!(f, "{}:{}:{}", self.file, self.line, col),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedFailure {
    pub category: FailureCategory,
    /// Title line of the failing test, when the output names one
    pub title: Option<String>,
    pub location: Option<SourceLocation>,
    pub suggestion: String,
    /// The section of output this failure was read from
    pub output: String,
}

/// Ordered checks; the first category with a matching pattern wins
const RULES: &[(FailureCategory, &[&str])] = &[
    (
        FailureCategory::Compile,
        &[
            r"error TS\d+",
            r"SyntaxError",
            r"Cannot find module",
            r"is not exported by",
            r"Transform failed",
        ],
    ),
    (
        FailureCategory::Selector,
        &[
            r"strict mode violation",
            r"resolved to \d+ elements",
            r"element\(s\) not found",
            r"waiting for (?:locator|getBy\w+)\(",
            r"Element is not attached",
            r"No node found",
        ],
    ),
    (
        FailureCategory::Navigation,
        &[
            r"net::ERR_",
            r"page\.goto:",
            r"waitForURL",
            r"toHaveURL",
            r"NS_ERROR_",
            r"navigation (?:failed|interrupted)",
        ],
    ),
    (
        FailureCategory::Timeout,
        &[
            r"Timeout \d+ms exceeded",
            r"Timed out \d+ms",
            r"exceeded timeout",
            r"Test timeout of \d+ms",
        ],
    ),
    (
        FailureCategory::Assertion,
        &[
            r"expect\([^)]*\)\.\w+",
            r"Expected(?: string| substring| pattern)?:",
            r"AssertionError",
        ],
    ),
    (
        FailureCategory::Runtime,
        &[
            r"TypeError",
            r"ReferenceError",
            r"RangeError",
            r"ARTK BLOCKED",
            r"Error:",
        ],
    ),
];

fn compiled_rules() -> &'static Vec<(FailureCategory, Regex)> {
    static RULES_RE: OnceLock<Vec<(FailureCategory, Regex)>> = OnceLock::new();
    RULES_RE.get_or_init(|| {
        RULES
            .iter()
            .map(|(category, patterns)| {
                let joined = patterns.join("|");
                (*category, Regex::new(&joined).expect("static regex"))
            })
            .collect()
    })
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\d+\) (.+)$").expect("static regex"))
}

fn location_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([\w./\\-]+\.(?:[cm]?[jt]sx?)):(\d+)(?::(\d+))?").expect("static regex")
    })
}

/// Category of a block of output
pub fn classify_text(text: &str) -> FailureCategory {
    compiled_rules()
        .iter()
        .find(|(_, re)| re.is_match(text))
        .map(|(category, _)| *category)
        .unwrap_or(FailureCategory::Unknown)
}

/// First file:line[:col] reference in `text`
pub fn extract_location(text: &str) -> Option<SourceLocation> {
    let caps = location_re().captures(text)?;
    Some(SourceLocation {
        file: caps[1].to_string(),
        line: caps[2].parse().ok()?,
        column: caps.get(3).and_then(|m| m.as_str().parse().ok()),
    })
}

/// Split output into per-test sections keyed by their header line
fn sections(output: &str) -> Vec<(Option<String>, String)> {
    let mut sections: Vec<(Option<String>, Vec<&str>)> = Vec::new();
    for line in output.lines() {
        if let Some(caps) = header_re().captures(line) {
            sections.push((Some(caps[1].trim().to_string()), vec![line]));
        } else if let Some((_, lines)) = sections.last_mut() {
            lines.push(line);
        }
    }

    if sections.is_empty() {
        return vec![(None, output.to_string())];
    }
    sections
        .into_iter()
        .map(|(title, lines)| (title, lines.join("\n")))
        .collect()
}

fn classify_section(title: Option<String>, text: String) -> ClassifiedFailure {
    let category = classify_text(&text);
    ClassifiedFailure {
        category,
        title,
        location: extract_location(&text),
        suggestion: category.suggestion().to_string(),
        output: text,
    }
}

/// Classify every failure in a run
pub fn classify(outcome: &RunOutcome) -> Vec<ClassifiedFailure> {
    let failures = match outcome.status {
        RunStatus::Passed => Vec::new(),
        RunStatus::TimedOut => vec![ClassifiedFailure {
            category: FailureCategory::Timeout,
            title: None,
            location: extract_location(&outcome.combined_output()),
            suggestion: FailureCategory::Timeout.suggestion().to_string(),
            output: outcome.combined_output(),
        }],
        RunStatus::SpawnFailed => vec![ClassifiedFailure {
            category: FailureCategory::Unknown,
            title: None,
            location: None,
            suggestion: "Test runner could not be started: check runner.command".to_string(),
            output: outcome.stderr.clone(),
        }],
        RunStatus::Failed => sections(&outcome.combined_output())
            .into_iter()
            .map(|(title, text)| classify_section(title, text))
            .collect(),
    };
    debug!(status = outcome.status.as_str(), failures = failures.len(), "classified run");
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn failed(stdout: &str) -> RunOutcome {
        RunOutcome {
            status: RunStatus::Failed,
            exit_code: Some(1),
            stdout: stdout.to_string(),
            stderr: String::new(),
            duration_ms: 10,
            attempts: 1,
        }
    }

    #[test_case("tests/a.spec.ts(3,1): error TS2304: Cannot find name 'auth'.", FailureCategory::Compile ; "type error")]
    #[test_case("Error: strict mode violation: getByText('Save') resolved to 2 elements", FailureCategory::Selector ; "strict mode")]
    #[test_case("locator.click: Timeout 30000ms exceeded.\nCall log:\n  - waiting for getByRole('button', { name: 'Submit' })", FailureCategory::Selector ; "missing element")]
    #[test_case("page.goto: net::ERR_CONNECTION_REFUSED at http://localhost:3000/", FailureCategory::Navigation ; "connection refused")]
    #[test_case("page.waitForURL: Timeout 10000ms exceeded.", FailureCategory::Navigation ; "url wait")]
    #[test_case("Test timeout of 30000ms exceeded.", FailureCategory::Timeout ; "test timeout")]
    #[test_case("Error: expect(received).toContainText(expected)\nExpected substring: \"Saved\"", FailureCategory::Assertion ; "text assertion")]
    #[test_case("TypeError: Cannot read properties of undefined (reading 'email')", FailureCategory::Runtime ; "type error at runtime")]
    #[test_case("Error: ARTK BLOCKED: no matching pattern: Drag it", FailureCategory::Runtime ; "blocked step")]
    #[test_case("something odd happened", FailureCategory::Unknown ; "unknown")]
    fn test_classify_text(text: &str, expected: FailureCategory) {
        assert_eq!(classify_text(text), expected);
    }

    #[test]
    fn test_first_location_wins() {
        let location = extract_location(
            "  1) [chromium] › tests/jrn-0001.spec.ts:12:7 › login\n    at tests/helpers.ts:40:3",
        )
        .unwrap();
        assert_eq!(location.file, "tests/jrn-0001.spec.ts");
        assert_eq!(location.line, 12);
        assert_eq!(location.column, Some(7));
        assert_eq!(location.to_string(), "tests/jrn-0001.spec.ts:12:7");
    }

    #[test]
    fn test_location_without_column() {
        let location = extract_location("at login.spec.js:8").unwrap();
        assert_eq!(location.line, 8);
        assert_eq!(location.column, None);
    }

    #[test]
    fn test_splits_playwright_sections() {
        let output = "\
Running 2 tests using 1 worker

  1) [chromium] › a.spec.ts:5:3 › first ─────

    Error: strict mode violation: getByText('Save') resolved to 2 elements

  2) [chromium] › a.spec.ts:20:3 › second ─────

    Error: expect(locator).toBeVisible() failed
    Expected: visible

  2 failed";
        let failures = classify(&failed(output));
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].category, FailureCategory::Selector);
        assert_eq!(failures[0].location.as_ref().unwrap().line, 5);
        assert!(failures[0].title.as_deref().unwrap().ends_with("first ─────"));
        assert_eq!(failures[1].category, FailureCategory::Assertion);
        assert_eq!(failures[1].location.as_ref().unwrap().line, 20);
    }

    #[test]
    fn test_unstructured_failure_is_one_section() {
        let failures = classify(&failed("TypeError: x is not a function"));
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].category, FailureCategory::Runtime);
        assert!(failures[0].title.is_none());
    }

    #[test]
    fn test_passed_run_has_no_failures() {
        let mut outcome = failed("Error: strict mode violation\n1) looks like a header");
        outcome.status = RunStatus::Passed;
        outcome.exit_code = Some(0);
        assert!(classify(&outcome).is_empty());
    }

    #[test]
    fn test_timed_out_run() {
        let mut outcome = failed("");
        outcome.status = RunStatus::TimedOut;
        let failures = classify(&outcome);
        assert_eq!(failures[0].category, FailureCategory::Timeout);
    }
}
