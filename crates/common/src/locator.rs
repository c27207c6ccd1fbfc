//! Locator priority resolution
//!
//! Picks the best [`LocatorSpec`] among candidates describing the same element:
//! forbidden candidates are dropped (unless that would leave nothing), the rest are
//! ranked by strategy priority, and ties keep their original order.

use std::sync::OnceLock;

use regex::Regex;

use crate::config::LocatorConfig;
use crate::ir::{LocatorSpec, LocatorStrategy};
use crate::{Error, Result};

/// Selects one locator from a candidate set
#[derive(Debug, Clone)]
pub struct LocatorResolver {
    priority: Vec<LocatorStrategy>,
    forbidden_patterns: Vec<Regex>,
    forbidden_strategies: Vec<LocatorStrategy>,
}

impl Default for LocatorResolver {
    fn default() -> Self {
        Self {
            priority: LocatorConfig::default().priority,
            forbidden_patterns: Vec::new(),
            forbidden_strategies: Vec::new(),
        }
    }
}

impl LocatorResolver {
    pub fn new(priority: Vec<LocatorStrategy>) -> Self {
        Self {
            priority,
            ..Default::default()
        }
    }

    /// Build a resolver from configuration, compiling forbidden patterns
    pub fn from_config(config: &LocatorConfig) -> Result<Self> {
        let forbidden_patterns = config
            .forbidden_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            priority: config.priority.clone(),
            forbidden_patterns,
            forbidden_strategies: config.forbidden_strategies.clone(),
        })
    }

    pub fn with_forbidden_patterns(mut self, patterns: &[&str]) -> Result<Self> {
        for pattern in patterns {
            let compiled = Regex::new(pattern).map_err(|e| Error::InvalidPattern {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;
            self.forbidden_patterns.push(compiled);
        }
        Ok(self)
    }

    pub fn with_forbidden_strategies(mut self, strategies: &[LocatorStrategy]) -> Self {
        self.forbidden_strategies.extend_from_slice(strategies);
        self
    }

    /// Rank of a strategy; unlisted strategies rank after every listed one
    pub fn score(&self, strategy: LocatorStrategy) -> usize {
        self.priority
            .iter()
            .position(|s| *s == strategy)
            .unwrap_or(self.priority.len())
    }

    pub fn is_forbidden(&self, candidate: &LocatorSpec) -> bool {
        self.forbidden_strategies.contains(&candidate.strategy)
            || self
                .forbidden_patterns
                .iter()
                .any(|re| re.is_match(&candidate.value))
    }

    /// Return the best candidate, or `None` when there are none
    pub fn resolve(&self, candidates: &[LocatorSpec]) -> Option<LocatorSpec> {
        let first = candidates.first()?;

        let allowed: Vec<&LocatorSpec> = candidates
            .iter()
            .filter(|c| !self.is_forbidden(c))
            .collect();

        if allowed.is_empty() {
            tracing::warn!(
                strategy = %first.strategy,
                value = %first.value,
                "all locator candidates are forbidden, keeping the first"
            );
            return Some(first.clone());
        }

        // min_by_key returns the first minimum, which keeps the original order on ties
        allowed
            .into_iter()
            .min_by_key(|c| self.score(c.strategy))
            .cloned()
    }

    /// Candidates for a free-text element reference such as `#save`, `[data-testid=x]`
    /// or `Save`. `role_hint` is the element kind named in the step text, if any.
    pub fn candidates_for(target: &str, role_hint: Option<&str>) -> Vec<LocatorSpec> {
        let target = target.trim();
        let mut candidates = Vec::new();

        if let Some(testid) = parse_testid_selector(target) {
            candidates.push(LocatorSpec::new(LocatorStrategy::Testid, testid));
            candidates.push(LocatorSpec::new(LocatorStrategy::Css, target));
            return candidates;
        }
        if target.starts_with("//") || target.starts_with("xpath=") {
            candidates.push(LocatorSpec::new(
                LocatorStrategy::Xpath,
                target.trim_start_matches("xpath="),
            ));
            return candidates;
        }
        if looks_like_css(target) {
            candidates.push(LocatorSpec::new(LocatorStrategy::Css, target));
            return candidates;
        }

        if let Some(role) = role_hint {
            candidates.push(LocatorSpec::role(role, target));
        }
        candidates.push(LocatorSpec::new(LocatorStrategy::Text, target));
        candidates
    }

    /// Candidates for a form field referenced by its visible name
    pub fn field_candidates(name: &str) -> Vec<LocatorSpec> {
        let name = name.trim();
        if parse_testid_selector(name).is_some() || looks_like_css(name) {
            return Self::candidates_for(name, None);
        }
        vec![
            LocatorSpec::new(LocatorStrategy::Label, name),
            LocatorSpec::new(LocatorStrategy::Placeholder, name),
            LocatorSpec::role("textbox", name),
        ]
    }
}

fn testid_selector_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\[data-test(?:id|-id)=["']?([^"'\]]+)["']?\]$"#).expect("static regex")
    })
}

fn parse_testid_selector(target: &str) -> Option<String> {
    testid_selector_re()
        .captures(target)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn looks_like_css(target: &str) -> bool {
    if target.contains(' ') && !target.contains('>') && !target.starts_with('[') {
        return false;
    }
    target.starts_with('#')
        || target.starts_with('.')
        || target.starts_with('[')
        || target.contains("::")
        || target.contains(" > ")
}
