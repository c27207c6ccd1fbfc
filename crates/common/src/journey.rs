//! Journey documents
//!
//! A Journey is markdown with a YAML frontmatter block:
//!
//! ```markdown
//! ---
//! id: JRN-0001
//! title: User logs in
//! status: clarified
//! tier: smoke
//! actor: standard-user
//! completion:
//!   - type: url
//!     value: /dashboard
//! ---
//!
//! ## Acceptance Criteria
//!
//! ### AC-1: Login form
//! - **Action**: Navigate to "/login"
//! - Click the Submit button
//!
//! ## Procedural Steps
//!
//! 1. Log in as admin
//! ```
//!
//! Parsing ([`parse_journey`]) only enforces the document shape and required
//! fields. [`validate_journey`] checks whether the Journey may be compiled, and
//! [`build_ir`] resolves every step line through the cascading matcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ir::{Instruction, IrJourney, IrStep, LocatorSpec, ToastKind};
use crate::locator::LocatorResolver;
use crate::matcher::normalize::clean_step_text;
use crate::matcher::{CascadingMatcher, MatchContext, MatchTier};
use crate::{Error, Result};

const REQUIRED_FIELDS: [&str; 4] = ["id", "title", "status", "tier"];

/// Step id used for the assertions derived from completion signals
pub const COMPLETION_STEP_ID: &str = "completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyStatus {
    Proposed,
    Defined,
    Clarified,
    Implemented,
    Quarantined,
    Deprecated,
}

impl JourneyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyStatus::Proposed => "proposed",
            JourneyStatus::Defined => "defined",
            JourneyStatus::Clarified => "clarified",
            JourneyStatus::Implemented => "implemented",
            JourneyStatus::Quarantined => "quarantined",
            JourneyStatus::Deprecated => "deprecated",
        }
    }

    /// Only clarified (or already implemented) Journeys are compiled
    pub fn is_generatable(&self) -> bool {
        matches!(self, JourneyStatus::Clarified | JourneyStatus::Implemented)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JourneyTier {
    Smoke,
    Release,
    Regression,
}

impl JourneyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            JourneyTier::Smoke => "smoke",
            JourneyTier::Release => "release",
            JourneyTier::Regression => "regression",
        }
    }
}

/// What "done" looks like at the end of a Journey
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSignal {
    #[serde(rename = "type")]
    pub kind: CompletionKind,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Url,
    Toast,
    Element,
    Text,
    Title,
}

impl CompletionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionKind::Url => "url",
            CompletionKind::Toast => "toast",
            CompletionKind::Element => "element",
            CompletionKind::Text => "text",
            CompletionKind::Title => "title",
        }
    }

    /// Toast is the only kind whose value may be empty (any success toast)
    pub fn requires_value(&self) -> bool {
        !matches!(self, CompletionKind::Toast)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyModules {
    #[serde(default)]
    pub foundation: Vec<String>,
    #[serde(default)]
    pub feature: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyFrontmatter {
    pub id: String,
    pub title: String,
    pub status: JourneyStatus,
    pub tier: JourneyTier,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub completion: Vec<CompletionSignal>,
    #[serde(default)]
    pub modules: JourneyModules,
    #[serde(default)]
    pub test_data: Option<String>,
}

/// One step of the Journey body with its raw step lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JourneyStep {
    pub id: String,
    pub title: String,
    pub lines: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Journey {
    pub frontmatter: JourneyFrontmatter,
    pub steps: Vec<JourneyStep>,
    /// File name or other label used in error messages
    pub source_name: String,
}

impl Journey {
    pub fn id(&self) -> &str {
        &self.frontmatter.id
    }
}

/// Split `---\n<yaml>\n---\n<body>` into its two parts
fn split_frontmatter<'a>(content: &'a str, source_name: &str) -> Result<(&'a str, &'a str)> {
    let trimmed = content.trim_start_matches('\u{feff}').trim_start();
    let missing = || Error::MissingFrontmatter {
        source_name: source_name.to_string(),
    };

    let rest = trimmed.strip_prefix("---").ok_or_else(missing)?;
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .ok_or_else(missing)?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Ok((yaml, body));
        }
        offset += line.len();
    }
    Err(missing())
}

fn parse_frontmatter(yaml: &str, source_name: &str) -> Result<JourneyFrontmatter> {
    let invalid = |reason: String| Error::InvalidFrontmatter {
        source_name: source_name.to_string(),
        reason,
    };

    let value: serde_yaml::Value = serde_yaml::from_str(yaml).map_err(|e| invalid(e.to_string()))?;
    let mapping = value
        .as_mapping()
        .ok_or_else(|| invalid("frontmatter is not a mapping".to_string()))?;

    for field in REQUIRED_FIELDS {
        let present = mapping
            .get(field)
            .map(|v| !v.is_null() && v.as_str().map_or(true, |s| !s.trim().is_empty()))
            .unwrap_or(false);
        if !present {
            return Err(Error::MissingJourneyField {
                source_name: source_name.to_string(),
                field: field.to_string(),
            });
        }
    }

    serde_yaml::from_value(value).map_err(|e| invalid(e.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Other,
    AcceptanceCriteria,
    ProceduralSteps,
}

fn is_bullet(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ") || t.starts_with("* ") || t.starts_with("+ ")
}

/// `1. text` or `1) text`, returning the text
fn numbered_item(line: &str) -> Option<&str> {
    let t = line.trim_start();
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &t[digits..];
    let rest = rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))?;
    rest.strip_prefix(' ').map(str::trim)
}

/// `### AC-1: Title` → (`AC-1`, `Title`)
fn ac_heading(line: &str) -> Option<(String, String)> {
    let heading = line.trim().strip_prefix("###")?.trim();
    let (id, title) = match heading.split_once(':') {
        Some((id, title)) => (id.trim(), title.trim()),
        None => (heading, ""),
    };
    let upper = id.to_uppercase();
    if !upper.starts_with("AC-") && !upper.starts_with("AC ") {
        return None;
    }
    let id = upper.replace(' ', "-");
    let title = if title.is_empty() { id.clone() } else { title.to_string() };
    Some((id, title))
}

fn parse_body(body: &str) -> Vec<JourneyStep> {
    let mut section = Section::Other;
    let mut acceptance: Vec<JourneyStep> = Vec::new();
    let mut procedural: Vec<JourneyStep> = Vec::new();
    let mut in_fence = false;

    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }

        if let Some(h2) = trimmed.strip_prefix("## ") {
            let h2 = h2.trim().to_lowercase();
            section = if h2.starts_with("acceptance criteria") {
                Section::AcceptanceCriteria
            } else if h2.starts_with("procedural steps") {
                Section::ProceduralSteps
            } else {
                Section::Other
            };
            continue;
        }

        match section {
            Section::AcceptanceCriteria => {
                if let Some((id, title)) = ac_heading(trimmed) {
                    acceptance.push(JourneyStep {
                        id,
                        title,
                        lines: Vec::new(),
                    });
                } else if is_bullet(line) || numbered_item(line).is_some() {
                    if let Some(step) = acceptance.last_mut() {
                        let text = clean_step_text(line);
                        if !text.is_empty() {
                            step.lines.push(text);
                        }
                    }
                }
            }
            Section::ProceduralSteps => {
                let indented = line.starts_with(' ') || line.starts_with('\t');
                if let (Some(text), false) = (numbered_item(line), indented) {
                    let id = format!("PS-{}", procedural.len() + 1);
                    procedural.push(JourneyStep {
                        id,
                        title: text.to_string(),
                        lines: vec![clean_step_text(text)],
                    });
                } else if is_bullet(line) || numbered_item(line).is_some() {
                    if let Some(step) = procedural.last_mut() {
                        let text = clean_step_text(line);
                        if !text.is_empty() {
                            step.lines.push(text);
                        }
                    }
                }
            }
            Section::Other => {}
        }
    }

    // A criterion without bullets is a one-line step
    for step in &mut acceptance {
        if step.lines.is_empty() && step.title != step.id {
            step.lines.push(step.title.clone());
        }
    }

    acceptance.extend(procedural);
    acceptance
}

/// Parse a Journey document
pub fn parse_journey(content: &str, source_name: &str) -> Result<Journey> {
    let (yaml, body) = split_frontmatter(content, source_name)?;
    let frontmatter = parse_frontmatter(yaml, source_name)?;
    let steps = parse_body(body);
    debug!(id = %frontmatter.id, steps = steps.len(), "parsed journey");
    Ok(Journey {
        frontmatter,
        steps,
        source_name: source_name.to_string(),
    })
}

pub fn load_journey(path: &Path) -> Result<Journey> {
    let content = std::fs::read_to_string(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    parse_journey(&content, &name)
}

/// Every `*.md` file under `dir`, sorted by path
pub fn discover_journeys(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.path().extension().map(|ext| ext == "md").unwrap_or(false))
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub journey_id: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn push(&mut self, code: &str, severity: Severity, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            code: code.to_string(),
            severity,
            message: message.into(),
        });
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    pub fn is_valid(&self) -> bool {
        self.errors().next().is_none()
    }

    /// Turn error-level issues into a hard error, logging warnings
    pub fn into_result(self) -> Result<Self> {
        for warning in self.warnings() {
            warn!(journey = %self.journey_id, code = %warning.code, "{}", warning.message);
        }
        if self.is_valid() {
            return Ok(self);
        }
        let reason = self
            .errors()
            .map(|i| format!("{}: {}", i.code, i.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(Error::JourneyValidation {
            id: self.journey_id,
            reason,
        })
    }
}

/// Check whether a Journey can be compiled
pub fn validate_journey(journey: &Journey) -> ValidationReport {
    let fm = &journey.frontmatter;
    let mut report = ValidationReport {
        journey_id: fm.id.clone(),
        issues: Vec::new(),
    };

    if !fm.id.starts_with("JRN-") {
        report.push(
            "ARTK-J010",
            Severity::Error,
            format!("id '{}' must start with 'JRN-'", fm.id),
        );
    }
    if !fm.status.is_generatable() {
        report.push(
            "ARTK-J004",
            Severity::Error,
            format!(
                "status '{}' is not clarified or implemented",
                fm.status.as_str()
            ),
        );
    }
    if journey.steps.is_empty() {
        report.push("ARTK-J011", Severity::Error, "journey has no steps");
    }
    for step in journey.steps.iter().filter(|s| s.lines.is_empty()) {
        report.push(
            "ARTK-J012",
            Severity::Warning,
            format!("step {} has no step lines", step.id),
        );
    }
    if fm.completion.is_empty() {
        report.push(
            "ARTK-J013",
            Severity::Warning,
            "no completion signals; the test ends without a final assertion",
        );
    }
    for (i, signal) in fm.completion.iter().enumerate() {
        if signal.kind.requires_value() && signal.value.trim().is_empty() {
            report.push(
                "ARTK-J015",
                Severity::Error,
                format!(
                    "completion signal {} ({}) has an empty value",
                    i + 1,
                    signal.kind.as_str()
                ),
            );
        }
    }
    let mut seen = std::collections::HashSet::new();
    for step in &journey.steps {
        if !seen.insert(step.id.as_str()) {
            report.push(
                "ARTK-J014",
                Severity::Error,
                format!("duplicate step id {}", step.id),
            );
        }
    }

    report
}

fn completion_instruction(signal: &CompletionSignal, resolver: &LocatorResolver) -> Instruction {
    let value = signal.value.trim();
    let source = if value.is_empty() {
        format!("{} completion signal", signal.kind.as_str())
    } else {
        value.to_string()
    };
    let visible = |candidates: Vec<LocatorSpec>| match resolver.resolve(&candidates) {
        Some(locator) => Instruction::ExpectVisible {
            locator,
            timeout: None,
        },
        None => Instruction::blocked("empty completion signal", source.clone()),
    };

    let instruction = match signal.kind {
        CompletionKind::Url => Instruction::ExpectUrl {
            pattern: value.to_string(),
            timeout: None,
        },
        CompletionKind::Title => Instruction::ExpectTitle {
            title: value.to_string(),
        },
        CompletionKind::Toast => Instruction::ExpectToast {
            toast_type: ToastKind::Success,
            message: (!value.is_empty()).then(|| value.to_string()),
            timeout: None,
        },
        CompletionKind::Element => visible(LocatorResolver::candidates_for(value, None)),
        CompletionKind::Text => visible(vec![LocatorSpec::new(
            crate::ir::LocatorStrategy::Text,
            value,
        )]),
    };

    match instruction.validate() {
        Ok(()) => instruction,
        Err(reason) => {
            warn!(kind = signal.kind.as_str(), %reason, "completion signal cannot be asserted");
            Instruction::blocked(format!("empty completion signal: {reason}"), source)
        }
    }
}

/// Resolved/blocked counts for one compiled Journey
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageSummary {
    pub journey_id: String,
    pub steps: usize,
    pub instructions: usize,
    pub blocked: usize,
    pub by_tier: BTreeMap<MatchTier, usize>,
}

impl CoverageSummary {
    /// Share of instructions that resolved, in `[0, 1]`
    pub fn resolved_ratio(&self) -> f64 {
        if self.instructions == 0 {
            return 1.0;
        }
        (self.instructions - self.blocked) as f64 / self.instructions as f64
    }
}

/// Compile a Journey into IR. The context's telemetry buffer receives one record
/// per blocked step line.
pub fn build_ir(
    journey: &Journey,
    matcher: &CascadingMatcher,
    resolver: &LocatorResolver,
    ctx: &mut MatchContext,
) -> (IrJourney, CoverageSummary) {
    let fm = &journey.frontmatter;
    ctx.set_journey(&fm.id);

    let mut by_tier: BTreeMap<MatchTier, usize> = BTreeMap::new();
    let mut steps = Vec::with_capacity(journey.steps.len() + 1);

    for step in &journey.steps {
        let instructions = step
            .lines
            .iter()
            .map(|line| {
                let outcome = matcher.resolve(line, ctx);
                *by_tier.entry(outcome.tier).or_default() += 1;
                outcome.instruction
            })
            .collect();
        steps.push(IrStep {
            id: step.id.clone(),
            description: step.title.clone(),
            instructions,
        });
    }

    if !fm.completion.is_empty() {
        steps.push(IrStep {
            id: COMPLETION_STEP_ID.to_string(),
            description: "Completion signals".to_string(),
            instructions: fm
                .completion
                .iter()
                .map(|s| completion_instruction(s, resolver))
                .collect(),
        });
    }

    let ir = IrJourney {
        id: fm.id.clone(),
        title: fm.title.clone(),
        tier: fm.tier.as_str().to_string(),
        scope: fm.scope.clone(),
        actor: fm.actor.clone(),
        tags: fm.tags.clone(),
        test_data: fm.test_data.clone(),
        steps,
    };

    let summary = CoverageSummary {
        journey_id: ir.id.clone(),
        steps: ir.steps.len(),
        instructions: ir.instruction_count(),
        blocked: ir.blocked_count(),
        by_tier,
    };
    info!(
        journey = %ir.id,
        instructions = summary.instructions,
        blocked = summary.blocked,
        "compiled journey"
    );
    (ir, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ArtkConfig;
    use test_case::test_case;

    const JOURNEY: &str = r#"---
id: JRN-0001
title: User logs in
status: clarified
tier: smoke
actor: standard-user
tags: [auth]
completion:
  - type: url
    value: /dashboard
  - type: text
    value: Welcome back
---

# User logs in

## Acceptance Criteria

### AC-1: Login form is reachable
- **Action**: Navigate to "/login"
- **Assert**: "Sign in" is visible

### AC-2: Submit credentials
- Fill the "Email" field with "{{actor.email}}"
- Click the Submit button
- Drag the item to the dropzone

## Procedural Steps

1. Log in as admin
   - Press Enter
2. Go to the dashboard page

## Notes

- not a step
"#;

    #[test]
    fn test_parse_sections() {
        let journey = parse_journey(JOURNEY, "login.md").unwrap();
        assert_eq!(journey.id(), "JRN-0001");
        assert_eq!(journey.frontmatter.status, JourneyStatus::Clarified);
        let ids: Vec<&str> = journey.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["AC-1", "AC-2", "PS-1", "PS-2"]);
        assert_eq!(journey.steps[1].lines.len(), 3);
        assert_eq!(journey.steps[2].lines, vec!["Log in as admin", "Press Enter"]);
    }

    #[test]
    fn test_missing_required_field() {
        let content = "---\nid: JRN-1\ntitle: x\nstatus: clarified\n---\n";
        let err = parse_journey(content, "x.md").unwrap_err();
        assert_eq!(err.code(), "ARTK-J001");
        assert!(err.to_string().contains("'tier'"));
    }

    #[test]
    fn test_missing_frontmatter() {
        let err = parse_journey("# just markdown", "x.md").unwrap_err();
        assert_eq!(err.code(), "ARTK-J003");
    }

    #[test]
    fn test_invalid_status_value() {
        let content = "---\nid: JRN-1\ntitle: x\nstatus: done\ntier: smoke\n---\n";
        let err = parse_journey(content, "x.md").unwrap_err();
        assert_eq!(err.code(), "ARTK-J002");
    }

    #[test]
    fn test_validation_requires_clarified_status() {
        let content = JOURNEY.replace("status: clarified", "status: proposed");
        let journey = parse_journey(&content, "login.md").unwrap();
        let report = validate_journey(&journey);
        assert!(!report.is_valid());
        let err = report.into_result().unwrap_err();
        assert_eq!(err.code(), "ARTK-J004");
    }

    #[test]
    fn test_build_ir_blocks_and_completion() {
        let journey = parse_journey(JOURNEY, "login.md").unwrap();
        let config = ArtkConfig::default();
        let matcher = CascadingMatcher::from_config(&config, None, None).unwrap();
        let resolver = LocatorResolver::default();
        let mut ctx = MatchContext::new();

        let (ir, summary) = build_ir(&journey, &matcher, &resolver, &mut ctx);
        assert_eq!(ir.steps.last().unwrap().id, COMPLETION_STEP_ID);
        assert_eq!(summary.blocked, 1);
        assert_eq!(ctx.telemetry().len(), 1);
        assert_eq!(ctx.telemetry()[0].journey_id, "JRN-0001");
        assert_eq!(
            ir.steps[2].instructions[0],
            Instruction::CallModule {
                module: "auth".to_string(),
                method: "login".to_string(),
                args: vec!["admin".to_string()],
            }
        );
        assert!(summary.resolved_ratio() > 0.8);
    }

    #[test_case(CompletionKind::Url ; "url")]
    #[test_case(CompletionKind::Title ; "title")]
    #[test_case(CompletionKind::Element ; "element")]
    #[test_case(CompletionKind::Text ; "text")]
    fn test_empty_completion_value_blocks(kind: CompletionKind) {
        let resolver = LocatorResolver::default();
        let signal = CompletionSignal {
            kind,
            value: "   ".to_string(),
        };
        let instruction = completion_instruction(&signal, &resolver);
        assert!(instruction.is_blocked(), "{instruction:?}");
        assert!(instruction.validate().is_ok());
        match instruction {
            Instruction::Blocked { source_text, .. } => {
                assert_eq!(source_text, format!("{} completion signal", kind.as_str()))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test_case(CompletionKind::Url ; "url")]
    #[test_case(CompletionKind::Title ; "title")]
    #[test_case(CompletionKind::Element ; "element")]
    #[test_case(CompletionKind::Text ; "text")]
    fn test_empty_completion_value_fails_validation(kind: CompletionKind) {
        let mut journey = parse_journey(JOURNEY, "login.md").unwrap();
        journey.frontmatter.completion = vec![CompletionSignal {
            kind,
            value: String::new(),
        }];
        let report = validate_journey(&journey);
        assert!(!report.is_valid());
        let codes: Vec<&str> = report.errors().map(|i| i.code.as_str()).collect();
        assert_eq!(codes, ["ARTK-J015"]);
    }

    #[test]
    fn test_empty_toast_completion_is_any_success_toast() {
        let resolver = LocatorResolver::default();
        let signal = CompletionSignal {
            kind: CompletionKind::Toast,
            value: String::new(),
        };
        let instruction = completion_instruction(&signal, &resolver);
        assert!(instruction.validate().is_ok());
        assert!(matches!(instruction, Instruction::ExpectToast { message: None, .. }));
    }
}
