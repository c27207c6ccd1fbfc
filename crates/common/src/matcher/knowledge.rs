//! Learned step mappings
//!
//! The file is maintained outside the compiler and only ever read here. It is plain
//! JSON:
//!
//! ```json
//! { "lessons": [ { "trigger": "...", "instruction": { "type": "click", ... },
//!                  "confidence": 0.92, "stable": true } ] }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::normalize::{canonical_text, similarity};
use super::{MatchContext, MatchOutcome, MatchTier, StepMatcher};
use crate::ir::Instruction;
use crate::Result;

/// Similarity at which a trigger counts as the same step
const NEAR_EXACT: f64 = 0.95;

/// Confidence that makes a non-stable mapping usable anyway
const TRUSTED_CONFIDENCE: f64 = 0.9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnedMapping {
    pub trigger: String,
    pub instruction: Instruction,
    pub confidence: f64,
    #[serde(default)]
    pub stable: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeBase {
    #[serde(default)]
    pub lessons: Vec<LearnedMapping>,
}

impl KnowledgeBase {
    /// Load from disk; a missing file is an empty knowledge base
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no knowledge file, starting empty");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let kb: KnowledgeBase = serde_json::from_str(&content)?;
        info!(path = %path.display(), lessons = kb.lessons.len(), "loaded learned mappings");
        Ok(kb)
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    /// Best mapping for a step: exact canonical match first, then the closest
    /// near-exact trigger
    pub fn lookup(&self, step: &str) -> Option<(&LearnedMapping, f64)> {
        let key = canonical_text(step);
        if let Some(exact) = self
            .lessons
            .iter()
            .find(|l| canonical_text(&l.trigger) == key)
        {
            return Some((exact, 1.0));
        }

        self.lessons
            .iter()
            .map(|l| (l, similarity(&canonical_text(&l.trigger), &key)))
            .filter(|(_, score)| *score >= NEAR_EXACT)
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Third tier: previously learned mappings
pub struct KnowledgeMatcher {
    knowledge: KnowledgeBase,
    min_confidence: f64,
}

impl KnowledgeMatcher {
    pub fn new(knowledge: KnowledgeBase, min_confidence: f64) -> Self {
        Self {
            knowledge,
            min_confidence,
        }
    }
}

impl StepMatcher for KnowledgeMatcher {
    fn tier(&self) -> MatchTier {
        MatchTier::Knowledge
    }

    fn try_match(&self, step: &str, _ctx: &mut MatchContext) -> Option<MatchOutcome> {
        let (mapping, score) = self.knowledge.lookup(step)?;
        let usable = mapping.confidence >= self.min_confidence
            && (mapping.stable || mapping.confidence >= TRUSTED_CONFIDENCE);
        if !usable {
            debug!(
                trigger = %mapping.trigger,
                confidence = mapping.confidence,
                stable = mapping.stable,
                "learned mapping below threshold"
            );
            return None;
        }
        Some(
            MatchOutcome::new(
                mapping.instruction.clone(),
                MatchTier::Knowledge,
                mapping.confidence * score,
            )
            .with_rule(mapping.trigger.clone()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{LocatorSpec, LocatorStrategy};
    use tempfile::TempDir;

    fn click(target: &str) -> Instruction {
        Instruction::Click {
            locator: LocatorSpec::new(LocatorStrategy::Testid, target),
        }
    }

    fn kb(confidence: f64, stable: bool) -> KnowledgeBase {
        KnowledgeBase {
            lessons: vec![LearnedMapping {
                trigger: "Open the 'Reports' drawer".to_string(),
                instruction: click("reports-drawer"),
                confidence,
                stable,
            }],
        }
    }

    #[test]
    fn test_exact_canonical_match() {
        let matcher = KnowledgeMatcher::new(kb(0.8, true), 0.7);
        let outcome = matcher
            .try_match("open the 'Reports' drawer.", &mut MatchContext::new())
            .unwrap();
        assert_eq!(outcome.instruction, click("reports-drawer"));
        assert_eq!(outcome.tier, MatchTier::Knowledge);
    }

    #[test]
    fn test_literal_must_match() {
        let matcher = KnowledgeMatcher::new(kb(0.95, true), 0.7);
        assert!(matcher
            .try_match("Open the 'Settings' drawer", &mut MatchContext::new())
            .is_none());
    }

    #[test]
    fn test_unstable_low_confidence_rejected() {
        let matcher = KnowledgeMatcher::new(kb(0.8, false), 0.7);
        assert!(matcher
            .try_match("Open the 'Reports' drawer", &mut MatchContext::new())
            .is_none());
    }

    #[test]
    fn test_below_min_confidence_rejected() {
        let matcher = KnowledgeMatcher::new(kb(0.6, true), 0.7);
        assert!(matcher
            .try_match("Open the 'Reports' drawer", &mut MatchContext::new())
            .is_none());
    }

    #[test]
    fn test_load_lessons_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("knowledge.json");
        let content = r#"{"lessons": [{"trigger": "Open the 'Reports' drawer",
            "instruction": {"type": "click", "locator": {"strategy": "testid", "value": "reports-drawer"}},
            "confidence": 0.92}]}"#;
        std::fs::write(&path, content).unwrap();

        let loaded = KnowledgeBase::load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded.lessons[0].stable);
        let (mapping, score) = loaded.lookup("open the 'Reports' drawer").unwrap();
        assert_eq!(mapping.instruction, click("reports-drawer"));
        assert_eq!(score, 1.0);
        // Loading never rewrites the file
        assert_eq!(std::fs::read_to_string(&path).unwrap(), content);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let kb = KnowledgeBase::load(&tmp.path().join("none.json")).unwrap();
        assert!(kb.is_empty());
    }
}
