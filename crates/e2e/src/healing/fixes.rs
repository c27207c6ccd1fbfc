//! Fix strategies applied to compiled IR
//!
//! Fixes change how a step finds or waits for the page, never what it checks. Fix
//! types that would alter test intent exist only so they can be named and refused.

use std::fmt;

use serde::{Deserialize, Serialize};

use artk_common::codegen::render_locator;
use artk_common::ir::{Instruction, IrJourney, LoadState, LocatorSpec, LocatorStrategy, ValueSpec};
use artk_common::locator::LocatorResolver;

use crate::classifier::FailureCategory;

/// Default and ceiling for adjusted timeouts, in milliseconds
const BASE_TIMEOUT_MS: u64 = 10_000;
const MAX_TIMEOUT_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixType {
    SelectorRewrite,
    NavigationWait,
    TimingAdjust,
    DataNamespace,
    AddSleep,
    WeakenAssertion,
    ForceAction,
    SkipTest,
}

impl FixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixType::SelectorRewrite => "selectorRewrite",
            FixType::NavigationWait => "navigationWait",
            FixType::TimingAdjust => "timingAdjust",
            FixType::DataNamespace => "dataNamespace",
            FixType::AddSleep => "addSleep",
            FixType::WeakenAssertion => "weakenAssertion",
            FixType::ForceAction => "forceAction",
            FixType::SkipTest => "skipTest",
        }
    }

    /// Fix types that change test intent; never applied
    pub fn is_forbidden(&self) -> bool {
        matches!(
            self,
            FixType::AddSleep | FixType::WeakenAssertion | FixType::ForceAction | FixType::SkipTest
        )
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories the engine will try to repair
pub fn is_healable(category: FailureCategory) -> bool {
    matches!(
        category,
        FailureCategory::Selector
            | FailureCategory::Timeout
            | FailureCategory::Navigation
            | FailureCategory::Assertion
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixCandidate {
    pub fix_type: FixType,
    pub confidence: f64,
}

/// Candidate fixes for a category, highest confidence first
pub fn candidates(category: FailureCategory) -> Vec<FixCandidate> {
    let list: &[(FixType, f64)] = match category {
        FailureCategory::Selector => &[
            (FixType::SelectorRewrite, 0.8),
            (FixType::ForceAction, 0.6),
            (FixType::TimingAdjust, 0.4),
        ],
        FailureCategory::Timeout => &[
            (FixType::AddSleep, 0.8),
            (FixType::TimingAdjust, 0.7),
            (FixType::NavigationWait, 0.5),
        ],
        FailureCategory::Navigation => &[
            (FixType::NavigationWait, 0.8),
            (FixType::TimingAdjust, 0.5),
        ],
        FailureCategory::Assertion => &[
            (FixType::WeakenAssertion, 0.7),
            (FixType::DataNamespace, 0.6),
            (FixType::TimingAdjust, 0.5),
            (FixType::SkipTest, 0.1),
        ],
        _ => &[],
    };
    let mut candidates: Vec<FixCandidate> = list
        .iter()
        .map(|&(fix_type, confidence)| FixCandidate {
            fix_type,
            confidence,
        })
        .collect();
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates
}

/// Instruction a failure points at, as (step index, instruction index)
pub type Target = (usize, usize);

/// Find the instruction whose locator is quoted in the runner output
pub fn target_from_output(ir: &IrJourney, output: &str) -> Option<Target> {
    ir.steps.iter().enumerate().find_map(|(si, step)| {
        step.instructions.iter().enumerate().find_map(|(ii, instruction)| {
            let locator = instruction.locator()?;
            let rendered = render_locator(locator);
            let expression = rendered.trim_start_matches("page.");
            output.contains(expression).then_some((si, ii))
        })
    })
}

fn slug(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Alternative ways to address the element `spec` addresses, in preference order
pub fn alternative_locators(spec: &LocatorSpec) -> Vec<LocatorSpec> {
    let text = spec.name().unwrap_or(&spec.value).to_string();
    let mut alternatives = Vec::new();
    let supports_exact = !matches!(
        spec.strategy,
        LocatorStrategy::Css | LocatorStrategy::Xpath | LocatorStrategy::Testid
    );
    if supports_exact && !spec.is_exact() {
        alternatives.push(spec.clone().with_exact(true));
    }
    match spec.strategy {
        LocatorStrategy::Role => {
            alternatives.push(LocatorSpec::new(LocatorStrategy::Text, &text).with_exact(true));
            alternatives.push(LocatorSpec::new(LocatorStrategy::Label, &text));
        }
        LocatorStrategy::Label => {
            alternatives.push(LocatorSpec::new(LocatorStrategy::Placeholder, &text));
            alternatives.push(LocatorSpec::role("textbox", &text));
        }
        LocatorStrategy::Placeholder => {
            alternatives.push(LocatorSpec::new(LocatorStrategy::Label, &text));
            alternatives.push(LocatorSpec::role("textbox", &text));
        }
        LocatorStrategy::Text => {
            alternatives.push(LocatorSpec::role("button", &text));
            alternatives.push(LocatorSpec::role("link", &text));
        }
        LocatorStrategy::Testid | LocatorStrategy::Css | LocatorStrategy::Xpath => {}
    }
    if spec.strategy != LocatorStrategy::Testid && !text.is_empty() {
        alternatives.push(LocatorSpec::new(LocatorStrategy::Testid, slug(&text)));
    }
    alternatives.retain(|alt| alt != spec);
    alternatives
}

fn rewrite_selector(
    ir: &mut IrJourney,
    target: Option<Target>,
    resolver: &LocatorResolver,
    tried: &[LocatorSpec],
) -> Option<String> {
    let (si, ii) = target?;
    let instruction = ir.steps.get_mut(si)?.instructions.get_mut(ii)?;
    let locator = instruction.locator_mut()?;
    let replacement = alternative_locators(locator)
        .into_iter()
        .find(|alt| !resolver.is_forbidden(alt) && !tried.contains(alt))?;
    let description = format!(
        "rewrote {} to {}",
        render_locator(locator),
        render_locator(&replacement)
    );
    *locator = replacement;
    Some(description)
}

fn insert_navigation_wait(ir: &mut IrJourney, target: Option<Target>) -> Option<String> {
    let wait = Instruction::WaitForLoadState {
        state: LoadState::Domcontentloaded,
        timeout: None,
    };

    if let Some((si, ii)) = target {
        let step = ir.steps.get_mut(si)?;
        let preceded_by_wait = ii > 0 && step.instructions.get(ii - 1).is_some_and(Instruction::is_wait);
        if preceded_by_wait || ii > step.instructions.len() {
            return None;
        }
        step.instructions.insert(ii, wait);
        return Some(format!("inserted load-state wait before {}:{}", step.id, ii + 1));
    }

    // No target: wait after every goto not already followed by a wait
    let mut inserted = 0;
    for step in &mut ir.steps {
        let mut i = 0;
        while i < step.instructions.len() {
            let followed_by_wait = step.instructions.get(i + 1).is_some_and(Instruction::is_wait);
            if matches!(step.instructions[i], Instruction::Goto { .. }) && !followed_by_wait {
                step.instructions.insert(i + 1, wait.clone());
                inserted += 1;
                i += 1;
            }
            i += 1;
        }
    }
    (inserted > 0).then(|| format!("inserted {inserted} load-state wait(s) after navigation"))
}

fn bump(timeout: &mut Option<u64>) -> bool {
    let next = match *timeout {
        Some(current) if current >= MAX_TIMEOUT_MS => return false,
        Some(current) => (current * 2).min(MAX_TIMEOUT_MS),
        None => BASE_TIMEOUT_MS,
    };
    *timeout = Some(next);
    true
}

fn adjust_timing(ir: &mut IrJourney, target: Option<Target>) -> Option<String> {
    if let Some((si, ii)) = target {
        let instruction = ir.steps.get_mut(si)?.instructions.get_mut(ii)?;
        let timeout = instruction.timeout_mut()?;
        return bump(timeout).then(|| format!("raised timeout to {}ms", timeout.unwrap_or_default()));
    }

    let mut adjusted = 0;
    for instruction in ir.steps.iter_mut().flat_map(|s| s.instructions.iter_mut()) {
        if let Some(timeout) = instruction.timeout_mut() {
            if bump(timeout) {
                adjusted += 1;
            }
        }
    }
    (adjusted > 0).then(|| format!("raised {adjusted} timeout(s)"))
}

fn namespace_data(ir: &mut IrJourney, target: Option<Target>) -> Option<String> {
    let steps: Vec<usize> = match target {
        Some((si, _)) => vec![si],
        None => (0..ir.steps.len()).collect(),
    };
    let mut namespaced = 0;
    for si in steps {
        let Some(step) = ir.steps.get_mut(si) else {
            continue;
        };
        for instruction in &mut step.instructions {
            if let Instruction::Fill { value, .. } = instruction {
                if let ValueSpec::Literal { value: literal } = value {
                    *value = ValueSpec::RunId {
                        prefix: Some(literal.clone()),
                    };
                    namespaced += 1;
                }
            }
        }
    }
    (namespaced > 0).then(|| format!("namespaced {namespaced} literal value(s) with the run id"))
}

/// Apply `fix` to the IR. Returns a description, or `None` if the fix does not apply.
pub fn apply_fix(
    fix: FixType,
    ir: &mut IrJourney,
    target: Option<Target>,
    resolver: &LocatorResolver,
    tried_locators: &[LocatorSpec],
) -> Option<String> {
    match fix {
        FixType::SelectorRewrite => rewrite_selector(ir, target, resolver, tried_locators),
        FixType::NavigationWait => insert_navigation_wait(ir, target),
        FixType::TimingAdjust => adjust_timing(ir, target),
        FixType::DataNamespace => namespace_data(ir, target),
        FixType::AddSleep | FixType::WeakenAssertion | FixType::ForceAction | FixType::SkipTest => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use artk_common::ir::IrStep;

    fn journey(instructions: Vec<Instruction>) -> IrJourney {
        IrJourney {
            id: "JRN-0001".to_string(),
            title: "t".to_string(),
            tier: "smoke".to_string(),
            scope: None,
            actor: None,
            tags: vec![],
            test_data: None,
            steps: vec![IrStep {
                id: "AC-1".to_string(),
                description: "step".to_string(),
                instructions,
            }],
        }
    }

    fn submit() -> Instruction {
        Instruction::Click {
            locator: LocatorSpec::role("button", "Submit"),
        }
    }

    #[test]
    fn test_forbidden_types() {
        assert!(FixType::AddSleep.is_forbidden());
        assert!(FixType::WeakenAssertion.is_forbidden());
        assert!(!FixType::SelectorRewrite.is_forbidden());
    }

    #[test]
    fn test_candidates_sorted_by_confidence() {
        let list = candidates(FailureCategory::Timeout);
        assert_eq!(list[0].fix_type, FixType::AddSleep);
        assert!(list.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert!(candidates(FailureCategory::Compile).is_empty());
    }

    #[test]
    fn test_target_from_quoted_locator() {
        let ir = journey(vec![
            Instruction::Goto {
                url: "/".to_string(),
                wait_until: None,
            },
            submit(),
        ]);
        let output = "waiting for getByRole('button', { name: 'Submit' })";
        assert_eq!(target_from_output(&ir, output), Some((0, 1)));
        assert_eq!(target_from_output(&ir, "nothing"), None);
    }

    #[test]
    fn test_selector_rewrite_walks_alternatives() {
        let mut ir = journey(vec![submit()]);
        let resolver = LocatorResolver::default();
        let mut tried = vec![LocatorSpec::role("button", "Submit")];

        let first = apply_fix(FixType::SelectorRewrite, &mut ir, Some((0, 0)), &resolver, &tried).unwrap();
        assert!(first.contains("exact: true"));
        tried.push(ir.steps[0].instructions[0].locator().unwrap().clone());

        apply_fix(FixType::SelectorRewrite, &mut ir, Some((0, 0)), &resolver, &tried).unwrap();
        assert_eq!(
            ir.steps[0].instructions[0].locator().unwrap(),
            &LocatorSpec::new(LocatorStrategy::Text, "Submit").with_exact(true)
        );
    }

    #[test]
    fn test_selector_rewrite_needs_target() {
        let mut ir = journey(vec![submit()]);
        assert!(apply_fix(FixType::SelectorRewrite, &mut ir, None, &LocatorResolver::default(), &[]).is_none());
    }

    #[test]
    fn test_navigation_wait_after_goto() {
        let mut ir = journey(vec![
            Instruction::Goto {
                url: "/".to_string(),
                wait_until: None,
            },
            submit(),
        ]);
        assert!(apply_fix(FixType::NavigationWait, &mut ir, None, &LocatorResolver::default(), &[]).is_some());
        assert!(ir.steps[0].instructions[1].is_wait());
        // Already waited: nothing more to insert
        assert!(apply_fix(FixType::NavigationWait, &mut ir, None, &LocatorResolver::default(), &[]).is_none());
    }

    #[test]
    fn test_timing_adjust_is_capped() {
        let mut ir = journey(vec![Instruction::ExpectVisible {
            locator: LocatorSpec::role("heading", "Done"),
            timeout: Some(40_000),
        }]);
        let resolver = LocatorResolver::default();
        assert!(apply_fix(FixType::TimingAdjust, &mut ir, Some((0, 0)), &resolver, &[]).is_some());
        assert_eq!(
            ir.steps[0].instructions[0],
            Instruction::ExpectVisible {
                locator: LocatorSpec::role("heading", "Done"),
                timeout: Some(MAX_TIMEOUT_MS),
            }
        );
        assert!(apply_fix(FixType::TimingAdjust, &mut ir, Some((0, 0)), &resolver, &[]).is_none());
    }

    #[test]
    fn test_data_namespace_rewrites_literals() {
        let mut ir = journey(vec![Instruction::Fill {
            locator: LocatorSpec::new(LocatorStrategy::Label, "Name"),
            value: ValueSpec::literal("Widget"),
        }]);
        assert!(apply_fix(FixType::DataNamespace, &mut ir, None, &LocatorResolver::default(), &[]).is_some());
        assert_eq!(
            ir.steps[0].instructions[0],
            Instruction::Fill {
                locator: LocatorSpec::new(LocatorStrategy::Label, "Name"),
                value: ValueSpec::RunId {
                    prefix: Some("Widget".to_string())
                },
            }
        );
    }

    #[test]
    fn test_forbidden_fix_never_applies() {
        let mut ir = journey(vec![submit()]);
        let before = ir.clone();
        for fix in [FixType::AddSleep, FixType::WeakenAssertion, FixType::ForceAction, FixType::SkipTest] {
            assert!(apply_fix(fix, &mut ir, Some((0, 0)), &LocatorResolver::default(), &[]).is_none());
        }
        assert_eq!(ir, before);
    }
}
