//! Structured step markup: `**Action**:`, `**Wait for**:` and `**Assert**:` lines

use std::sync::OnceLock;

use regex::Regex;

use super::normalize::{clean_step_text, extract_literals};
use super::patterns::{rules, Family, PatternRule};
use super::{MatchContext, MatchOutcome, MatchTier, StepMatcher};
use crate::ir::{Instruction, LocatorSpec};
use crate::locator::LocatorResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Action,
    WaitFor,
    Assert,
}

impl Marker {
    fn families(&self) -> &'static [Family] {
        match self {
            Marker::Action => &[Family::Module, Family::Navigation, Family::Interaction],
            Marker::WaitFor => &[Family::Wait],
            Marker::Assert => &[Family::Assertion],
        }
    }
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\**\s*(action|wait\s+for|assert)\s*\**\s*:\s*\**\s*(.+)$")
            .expect("static regex")
    })
}

/// Split `**Marker**: body` into its marker and body
fn split_marker(step: &str) -> Option<(Marker, String)> {
    let cleaned = clean_step_text(step);
    let caps = marker_re().captures(&cleaned)?;
    let marker = match caps.get(1)?.as_str().to_lowercase().as_str() {
        "action" => Marker::Action,
        "assert" => Marker::Assert,
        _ => Marker::WaitFor,
    };
    let body = clean_step_text(caps.get(2)?.as_str());
    Some((marker, body))
}

/// Highest-priority tier: exact, markup-driven patterns
pub struct StructuredPatternMatcher {
    resolver: LocatorResolver,
    rules: Vec<PatternRule>,
}

impl StructuredPatternMatcher {
    pub fn new(resolver: LocatorResolver) -> Self {
        Self {
            resolver,
            rules: rules(),
        }
    }

    fn apply_family(&self, marker: Marker, text: &str) -> Option<(&'static str, Instruction)> {
        self.rules
            .iter()
            .filter(|rule| marker.families().contains(&rule.family))
            .find_map(|rule| rule.apply(text, &self.resolver).map(|i| (rule.name, i)))
    }

    /// Bodies that are only a quoted target or a path
    fn shortcut(&self, marker: Marker, body: &str) -> Option<Instruction> {
        let literals = extract_literals(body);
        let bare_literal = literals.len() == 1 && {
            let stripped: String = body
                .chars()
                .filter(|c| !matches!(c, '"' | '\'' | '`' | '“' | '”'))
                .collect();
            stripped.trim() == literals[0].trim()
        };

        match marker {
            Marker::Assert if bare_literal => {
                let locator = self.locate(&literals[0])?;
                Some(Instruction::ExpectVisible {
                    locator,
                    timeout: None,
                })
            }
            Marker::WaitFor if bare_literal && literals[0].starts_with('/') => {
                Some(Instruction::WaitForUrl {
                    pattern: literals[0].clone(),
                    timeout: None,
                })
            }
            Marker::WaitFor if bare_literal => {
                let locator = self.locate(&literals[0])?;
                Some(Instruction::WaitForVisible {
                    locator,
                    timeout: None,
                })
            }
            Marker::WaitFor if body.starts_with('/') && !body.contains(' ') => {
                Some(Instruction::WaitForUrl {
                    pattern: body.to_string(),
                    timeout: None,
                })
            }
            _ => None,
        }
    }

    fn locate(&self, target: &str) -> Option<LocatorSpec> {
        self.resolver
            .resolve(&LocatorResolver::candidates_for(target, None))
    }
}

impl StepMatcher for StructuredPatternMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Structured
    }

    fn try_match(&self, step: &str, _ctx: &mut MatchContext) -> Option<MatchOutcome> {
        let (marker, body) = split_marker(step)?;

        let candidate = match marker {
            Marker::WaitFor => format!("wait for {body}"),
            _ => body.clone(),
        };
        if let Some((rule, instruction)) = self.apply_family(marker, &candidate) {
            return Some(MatchOutcome::new(instruction, MatchTier::Structured, 1.0).with_rule(rule));
        }

        self.shortcut(marker, &body)
            .map(|i| MatchOutcome::new(i, MatchTier::Structured, 1.0).with_rule("shortcut"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LoadState, LocatorStrategy};

    fn matcher() -> StructuredPatternMatcher {
        StructuredPatternMatcher::new(LocatorResolver::default())
    }

    fn run(step: &str) -> Option<Instruction> {
        matcher()
            .try_match(step, &mut MatchContext::new())
            .map(|o| o.instruction)
    }

    #[test]
    fn test_plain_text_is_ignored() {
        assert!(run("Click the Submit button").is_none());
    }

    #[test]
    fn test_action_click() {
        assert_eq!(
            run("**Action**: Click the 'Save' button"),
            Some(Instruction::Click {
                locator: LocatorSpec::role("button", "Save")
            })
        );
    }

    #[test]
    fn test_marker_without_bold() {
        assert_eq!(
            run("Action: Navigate to '/settings'"),
            Some(Instruction::Goto {
                url: "/settings".to_string(),
                wait_until: None
            })
        );
    }

    #[test]
    fn test_action_does_not_accept_assertions() {
        assert!(run("**Action**: 'Saved' is visible").is_none());
    }

    #[test]
    fn test_wait_for_element() {
        assert_eq!(
            run("**Wait for**: 'Dashboard' heading to be visible"),
            Some(Instruction::WaitForVisible {
                locator: LocatorSpec::role("heading", "Dashboard"),
                timeout: None
            })
        );
    }

    #[test]
    fn test_wait_for_network_idle() {
        assert_eq!(
            run("**Wait for**: network idle"),
            Some(Instruction::WaitForLoadState {
                state: LoadState::Networkidle,
                timeout: None
            })
        );
    }

    #[test]
    fn test_wait_for_bare_path() {
        assert_eq!(
            run("**Wait for**: '/orders'"),
            Some(Instruction::WaitForUrl {
                pattern: "/orders".to_string(),
                timeout: None
            })
        );
    }

    #[test]
    fn test_assert_bare_text() {
        assert_eq!(
            run("**Assert**: \"Order confirmed\""),
            Some(Instruction::ExpectVisible {
                locator: LocatorSpec::new(LocatorStrategy::Text, "Order confirmed"),
                timeout: None
            })
        );
    }

    #[test]
    fn test_assert_url() {
        assert_eq!(
            run("- **Assert**: URL contains '/checkout'."),
            Some(Instruction::ExpectUrl {
                pattern: "/checkout".to_string(),
                timeout: None
            })
        );
    }

    #[test]
    fn test_outcome_metadata() {
        let outcome = matcher()
            .try_match("**Action**: Press Enter", &mut MatchContext::new())
            .unwrap();
        assert_eq!(outcome.tier, MatchTier::Structured);
        assert_eq!(outcome.confidence, 1.0);
        assert_eq!(outcome.rule.as_deref(), Some("press-key"));
    }
}
