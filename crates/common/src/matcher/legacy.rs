//! Free-text step phrasing, as written in older Journeys

use std::sync::OnceLock;

use regex::Regex;

use super::normalize::clean_step_text;
use super::patterns::{rules, PatternRule};
use super::{MatchContext, MatchOutcome, MatchTier, StepMatcher};
use crate::locator::LocatorResolver;

const CONFIDENCE: f64 = 0.9;

fn keyword_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:given|when|then|and|but)\s+(?:that\s+)?").expect("static regex")
    })
}

/// Strip Gherkin keywords and markdown emphasis
fn prepare(step: &str) -> String {
    let cleaned = clean_step_text(step).replace("**", "");
    keyword_re().replace(&cleaned, "").trim().to_string()
}

/// Second tier: every phrase rule, no markup required
pub struct LegacyPatternMatcher {
    resolver: LocatorResolver,
    rules: Vec<PatternRule>,
}

impl LegacyPatternMatcher {
    pub fn new(resolver: LocatorResolver) -> Self {
        Self {
            resolver,
            rules: rules(),
        }
    }
}

impl StepMatcher for LegacyPatternMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Legacy
    }

    fn try_match(&self, step: &str, _ctx: &mut MatchContext) -> Option<MatchOutcome> {
        let text = prepare(step);
        if text.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|rule| {
            rule.apply(&text, &self.resolver).map(|instruction| {
                MatchOutcome::new(instruction, MatchTier::Legacy, CONFIDENCE).with_rule(rule.name)
            })
        })
    }
}
