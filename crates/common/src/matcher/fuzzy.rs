//! Typo-tolerant matching against canonical phrasings
//!
//! Steps are compared in placeholder form (`click {} button`) against a fixed set of
//! templates. Quoted literals are lifted out before comparison and slotted back into
//! the winning template, so a template only matches steps with the same literal count.

use super::normalize::{extract_literals, normalize_step_text, similarity, LITERAL_PLACEHOLDER};
use super::patterns::parse_value;
use super::{MatchContext, MatchOutcome, MatchTier, StepMatcher};
use crate::ir::{Instruction, LocatorSpec};
use crate::locator::LocatorResolver;

type Build = fn(&[String], &LocatorResolver) -> Option<Instruction>;

struct Template {
    text: &'static str,
    build: Build,
}

impl Template {
    fn slots(&self) -> usize {
        self.text.matches(LITERAL_PLACEHOLDER).count()
    }
}

fn element(target: &str, role: Option<&str>, resolver: &LocatorResolver) -> Option<LocatorSpec> {
    resolver.resolve(&LocatorResolver::candidates_for(target, role))
}

fn field(name: &str, resolver: &LocatorResolver) -> Option<LocatorSpec> {
    resolver.resolve(&LocatorResolver::field_candidates(name))
}

fn click(lits: &[String], role: Option<&str>, resolver: &LocatorResolver) -> Option<Instruction> {
    Some(Instruction::Click {
        locator: element(lits.first()?, role, resolver)?,
    })
}

fn templates() -> Vec<Template> {
    vec![
        Template {
            text: "click {}",
            build: |l, r| click(l, None, r),
        },
        Template {
            text: "click {} button",
            build: |l, r| click(l, Some("button"), r),
        },
        Template {
            text: "click {} link",
            build: |l, r| click(l, Some("link"), r),
        },
        Template {
            text: "click on {} tab",
            build: |l, r| click(l, Some("tab"), r),
        },
        Template {
            text: "fill {} with {}",
            build: |l, r| {
                Some(Instruction::Fill {
                    locator: field(l.first()?, r)?,
                    value: parse_value(l.get(1)?),
                })
            },
        },
        Template {
            text: "fill {} field with {}",
            build: |l, r| {
                Some(Instruction::Fill {
                    locator: field(l.first()?, r)?,
                    value: parse_value(l.get(1)?),
                })
            },
        },
        Template {
            text: "enter {} in {} field",
            build: |l, r| {
                Some(Instruction::Fill {
                    locator: field(l.get(1)?, r)?,
                    value: parse_value(l.first()?),
                })
            },
        },
        Template {
            text: "type {} into {}",
            build: |l, r| {
                Some(Instruction::Fill {
                    locator: field(l.get(1)?, r)?,
                    value: parse_value(l.first()?),
                })
            },
        },
        Template {
            text: "select {} from {} dropdown",
            build: |l, r| {
                Some(Instruction::Select {
                    locator: field(l.get(1)?, r)?,
                    option: l.first()?.clone(),
                })
            },
        },
        Template {
            text: "navigate to {}",
            build: |l, _| {
                Some(Instruction::Goto {
                    url: l.first()?.clone(),
                    wait_until: None,
                })
            },
        },
        Template {
            text: "{} should be visible",
            build: |l, r| {
                Some(Instruction::ExpectVisible {
                    locator: element(l.first()?, None, r)?,
                    timeout: None,
                })
            },
        },
        Template {
            text: "verify {} is displayed",
            build: |l, r| {
                Some(Instruction::ExpectVisible {
                    locator: element(l.first()?, None, r)?,
                    timeout: None,
                })
            },
        },
        Template {
            text: "user should see {}",
            build: |l, r| {
                Some(Instruction::ExpectVisible {
                    locator: element(l.first()?, None, r)?,
                    timeout: None,
                })
            },
        },
        Template {
            text: "{} should not be visible",
            build: |l, r| {
                Some(Instruction::ExpectHidden {
                    locator: element(l.first()?, None, r)?,
                    timeout: None,
                })
            },
        },
        Template {
            text: "url should contain {}",
            build: |l, _| {
                Some(Instruction::ExpectUrl {
                    pattern: l.first()?.clone(),
                    timeout: None,
                })
            },
        },
        Template {
            text: "wait for {} to be visible",
            build: |l, r| {
                Some(Instruction::WaitForVisible {
                    locator: element(l.first()?, None, r)?,
                    timeout: None,
                })
            },
        },
    ]
}

/// Fourth tier: nearest canonical template above a similarity threshold
pub struct FuzzyMatcher {
    resolver: LocatorResolver,
    threshold: f64,
    templates: Vec<Template>,
}

impl FuzzyMatcher {
    pub fn new(resolver: LocatorResolver, threshold: f64) -> Self {
        Self {
            resolver,
            threshold,
            templates: templates(),
        }
    }
}

impl StepMatcher for FuzzyMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Fuzzy
    }

    fn try_match(&self, step: &str, _ctx: &mut MatchContext) -> Option<MatchOutcome> {
        let normalized = normalize_step_text(step);
        let literals = extract_literals(step);

        let (template, score) = self
            .templates
            .iter()
            .filter(|t| t.slots() == literals.len())
            .map(|t| (t, similarity(t.text, &normalized)))
            .filter(|(_, score)| *score >= self.threshold)
            .max_by(|a, b| a.1.total_cmp(&b.1))?;

        let instruction = (template.build)(&literals, &self.resolver)?;
        tracing::debug!(template = template.text, score, "fuzzy template matched");
        Some(MatchOutcome::new(instruction, MatchTier::Fuzzy, score).with_rule(template.text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LocatorStrategy, ValueSpec};

    fn matcher() -> FuzzyMatcher {
        FuzzyMatcher::new(LocatorResolver::default(), 0.85)
    }

    #[test]
    fn test_typo_in_verb_and_role() {
        let outcome = matcher()
            .try_match("Clik the 'Save' buton", &mut MatchContext::new())
            .unwrap();
        assert_eq!(
            outcome.instruction,
            Instruction::Click {
                locator: LocatorSpec::role("button", "Save")
            }
        );
        assert!(outcome.confidence >= 0.85 && outcome.confidence < 1.0);
    }

    #[test]
    fn test_literal_order_for_enter_template() {
        let outcome = matcher()
            .try_match("Entr 'bob' in the 'Username' field", &mut MatchContext::new())
            .unwrap();
        assert_eq!(
            outcome.instruction,
            Instruction::Fill {
                locator: LocatorSpec::new(LocatorStrategy::Label, "Username"),
                value: ValueSpec::literal("bob"),
            }
        );
    }

    #[test]
    fn test_literal_count_must_match() {
        assert!(matcher()
            .try_match("Click the button", &mut MatchContext::new())
            .is_none());
    }

    #[test]
    fn test_below_threshold() {
        assert!(matcher()
            .try_match("Drag the item to the dropzone", &mut MatchContext::new())
            .is_none());
        assert!(matcher()
            .try_match("Archive 'Q3' report", &mut MatchContext::new())
            .is_none());
    }
}
