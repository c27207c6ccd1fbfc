//! Cascading step matcher
//!
//! A step is offered to an ordered registry of tiers; the first tier that returns a
//! match wins, whatever the confidence of later tiers. Default order:
//!
//! ```text
//! structured markup ─▶ legacy free text ─▶ learned knowledge ─▶ fuzzy ─▶ AI fallback
//!                                                                          │
//!                                         nothing matched ─▶ blocked ◀─────┘
//! ```
//!
//! Tiers never mutate global state: caches, budgets and telemetry live in the
//! [`MatchContext`] passed through every call.

mod ai;
mod fuzzy;
mod knowledge;
mod legacy;
pub mod normalize;
mod patterns;
mod structured;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ArtkConfig;
use crate::ir::Instruction;
use crate::locator::LocatorResolver;
use crate::telemetry::TelemetryRecord;
use crate::Result;

pub use ai::{AiCompletion, AiError, AiFallbackMatcher, AiRequest, CommandClient, LlmClient};
pub use fuzzy::FuzzyMatcher;
pub use knowledge::{KnowledgeBase, KnowledgeMatcher, LearnedMapping};
pub use legacy::LegacyPatternMatcher;
pub use normalize::{canonical_text, clean_step_text, normalize_step_text};
pub use structured::StructuredPatternMatcher;

/// Reason recorded on steps no tier could resolve
pub const NO_MATCH_REASON: &str = "no matching pattern";

/// Which tier produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Structured,
    Legacy,
    Knowledge,
    Fuzzy,
    Ai,
    Blocked,
}

impl std::fmt::Display for MatchTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MatchTier::Structured => "structured",
            MatchTier::Legacy => "legacy",
            MatchTier::Knowledge => "knowledge",
            MatchTier::Fuzzy => "fuzzy",
            MatchTier::Ai => "ai",
            MatchTier::Blocked => "blocked",
        };
        f.write_str(name)
    }
}

/// Result of resolving one step
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub instruction: Instruction,
    pub tier: MatchTier,
    pub confidence: f64,
    /// Name of the pattern or template that fired, when the tier has one
    pub rule: Option<String>,
}

impl MatchOutcome {
    pub fn new(instruction: Instruction, tier: MatchTier, confidence: f64) -> Self {
        Self {
            instruction,
            tier,
            confidence,
            rule: None,
        }
    }

    pub fn with_rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }
}

/// A single matching tier
pub trait StepMatcher: Send + Sync {
    fn tier(&self) -> MatchTier;

    /// Try to resolve `step` into an instruction. `None` passes the step on.
    fn try_match(&self, step: &str, ctx: &mut MatchContext) -> Option<MatchOutcome>;
}

/// Cached AI verdict for a step
#[derive(Debug, Clone, PartialEq)]
pub enum CachedResponse {
    Accepted(Instruction),
    Rejected(String),
}

/// Per-process mutable state threaded through matching
#[derive(Debug, Default)]
pub struct MatchContext {
    journey_id: Option<String>,
    pub(crate) ai_cache: HashMap<String, CachedResponse>,
    pub(crate) ai_spent_usd: f64,
    pub(crate) ai_calls: u32,
    pub(crate) ai_cache_hits: u32,
    telemetry: Vec<TelemetryRecord>,
    tier_counts: BTreeMap<MatchTier, usize>,
}

impl MatchContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear caches, budgets, counters and buffered telemetry
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn set_journey(&mut self, journey_id: impl Into<String>) {
        self.journey_id = Some(journey_id.into());
    }

    pub fn journey_id(&self) -> Option<&str> {
        self.journey_id.as_deref()
    }

    /// Seed the AI response cache, e.g. from a recorded session
    pub fn seed_ai_response(&mut self, step: &str, instruction: Instruction) {
        self.ai_cache
            .insert(ai::cache_key(step), CachedResponse::Accepted(instruction));
    }

    pub fn ai_spent_usd(&self) -> f64 {
        self.ai_spent_usd
    }

    pub fn ai_calls(&self) -> u32 {
        self.ai_calls
    }

    pub fn ai_cache_hits(&self) -> u32 {
        self.ai_cache_hits
    }

    pub fn telemetry(&self) -> &[TelemetryRecord] {
        &self.telemetry
    }

    /// Take buffered telemetry, leaving the buffer empty
    pub fn drain_telemetry(&mut self) -> Vec<TelemetryRecord> {
        std::mem::take(&mut self.telemetry)
    }

    pub fn tier_counts(&self) -> &BTreeMap<MatchTier, usize> {
        &self.tier_counts
    }

    fn record(&mut self, tier: MatchTier) {
        *self.tier_counts.entry(tier).or_default() += 1;
    }
}

/// Ordered registry of tiers
#[derive(Default)]
pub struct CascadingMatcher {
    tiers: Vec<Box<dyn StepMatcher>>,
}

impl CascadingMatcher {
    /// An empty registry; add tiers with [`CascadingMatcher::with_tier`]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard cascade built from configuration
    pub fn from_config(
        config: &ArtkConfig,
        knowledge: Option<KnowledgeBase>,
        ai_client: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self> {
        let resolver = LocatorResolver::from_config(&config.locators)?;
        let knowledge = match (knowledge, &config.matcher.knowledge_path) {
            (Some(kb), _) => kb,
            (None, Some(path)) => KnowledgeBase::load(path)?,
            (None, None) => KnowledgeBase::default(),
        };

        Ok(Self::new()
            .with_tier(StructuredPatternMatcher::new(resolver.clone()))
            .with_tier(LegacyPatternMatcher::new(resolver.clone()))
            .with_tier(KnowledgeMatcher::new(
                knowledge,
                config.matcher.knowledge_min_confidence,
            ))
            .with_tier(FuzzyMatcher::new(resolver, config.matcher.fuzzy_threshold))
            .with_tier(AiFallbackMatcher::new(config.ai.clone(), ai_client)))
    }

    /// Append a tier at the lowest priority
    pub fn with_tier(mut self, tier: impl StepMatcher + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    /// Insert a tier at `index` (0 = highest priority)
    pub fn insert_tier(&mut self, index: usize, tier: impl StepMatcher + 'static) {
        let index = index.min(self.tiers.len());
        self.tiers.insert(index, Box::new(tier));
    }

    pub fn tiers(&self) -> Vec<MatchTier> {
        self.tiers.iter().map(|t| t.tier()).collect()
    }

    /// Resolve a step. Never fails: unresolved steps become `blocked`.
    pub fn resolve(&self, step: &str, ctx: &mut MatchContext) -> MatchOutcome {
        for tier in &self.tiers {
            if let Some(outcome) = tier.try_match(step, ctx) {
                match outcome.instruction.validate() {
                    Ok(()) => {
                        debug!(
                            tier = %outcome.tier,
                            rule = outcome.rule.as_deref().unwrap_or("-"),
                            kind = outcome.instruction.kind(),
                            "step matched"
                        );
                        ctx.record(outcome.tier);
                        return outcome;
                    }
                    Err(reason) => {
                        warn!(tier = %tier.tier(), %reason, step, "tier produced an invalid instruction");
                    }
                }
            }
        }

        let source_text = clean_step_text(step);
        let normalized = normalize_step_text(step);
        let journey_id = ctx.journey_id().unwrap_or("unknown").to_string();
        let record = TelemetryRecord::new(journey_id, &source_text, normalized, NO_MATCH_REASON);
        warn!(
            step = %source_text,
            category = %record.category,
            "step blocked: no matching pattern"
        );
        ctx.telemetry.push(record);
        ctx.record(MatchTier::Blocked);

        MatchOutcome::new(
            Instruction::blocked(NO_MATCH_REASON, source_text),
            MatchTier::Blocked,
            0.0,
        )
    }
}
