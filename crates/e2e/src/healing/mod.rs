//! Bounded self-healing of failing generated tests
//!
//! ```text
//! classify ─▶ healable? ─no─▶ unhealable
//!    ▲            │yes
//!    │            ▼
//!    │      attempts < cap? ─no─▶ circuit breaker tripped
//!    │            │yes
//!    │            ▼
//!    │      best untried allowed fix ─none─▶ exhausted
//!    │            │
//!    │            ▼
//!    └─ rerun ◀─ apply to IR, re-render, merge into the test file
//! ```
//!
//! A fix is "tried" per IR state: the same fix is never applied twice to an identical
//! journey, but may apply again once an earlier fix has changed it. Forbidden fix types
//! are skipped before they are considered.

pub mod fixes;
pub mod log;

use std::collections::HashSet;
use std::path::Path;

use chrono::Utc;
use tracing::{debug, info, warn};

use artk_common::codegen::{CodeGenerator, SourceMap};
use artk_common::config::HealingSettings;
use artk_common::ir::{IrJourney, LocatorSpec};
use artk_common::locator::LocatorResolver;

use crate::classifier::{classify, ClassifiedFailure};
use crate::error::E2eResult;
use crate::runner::{run_test_file, RunOutcome, TestExecutor};

pub use fixes::{apply_fix, candidates, is_healable, FixCandidate, FixType, Target};
pub use log::{AttemptStatus, HealingAttempt, HealingLog, HealingOutcome, HealingSession};

pub struct HealingEngine {
    settings: HealingSettings,
    generator: CodeGenerator,
    resolver: LocatorResolver,
}

impl HealingEngine {
    pub fn new(settings: HealingSettings, generator: CodeGenerator, resolver: LocatorResolver) -> Self {
        Self {
            settings,
            generator,
            resolver,
        }
    }

    /// Map a failure to the instruction it came from
    fn locate(
        &self,
        ir: &IrJourney,
        test_path: &Path,
        source_map: &SourceMap,
        failure: &ClassifiedFailure,
    ) -> Option<Target> {
        let from_location = failure.location.as_ref().and_then(|location| {
            let reported = Path::new(&location.file);
            let same_file = test_path.ends_with(reported)
                || reported.file_name().is_some_and(|name| Some(name) == test_path.file_name());
            if !same_file {
                return None;
            }
            let content = std::fs::read_to_string(test_path).ok()?;
            source_map.locate(&content, location.line)
        });
        from_location.or_else(|| fixes::target_from_output(ir, &failure.output))
    }

    fn write(&self, ir: &IrJourney, test_path: &Path) -> E2eResult<SourceMap> {
        let generated = self.generator.generate(ir);
        self.generator.write(&generated, test_path)?;
        Ok(generated.source_map)
    }

    /// Run the healing loop for one journey, starting from a failed run.
    ///
    /// `ir` is updated in place with every applied fix; the caller persists it.
    pub async fn heal(
        &self,
        ir: &mut IrJourney,
        test_path: &Path,
        initial: RunOutcome,
        executor: &dyn TestExecutor,
    ) -> E2eResult<HealingSession> {
        let mut session = HealingSession::new(&ir.id);
        if !self.settings.enabled {
            session.finish(HealingOutcome::Disabled);
            return Ok(session);
        }

        let mut source_map = self.generator.generate(ir).source_map;
        let mut outcome = initial;
        let mut tried: HashSet<String> = HashSet::new();
        let mut tried_locators: Vec<LocatorSpec> = Vec::new();

        let result = loop {
            if outcome.passed() {
                break HealingOutcome::Healed;
            }

            let Some(failure) = classify(&outcome).into_iter().next() else {
                break HealingOutcome::Unhealable;
            };
            session.last_category = Some(failure.category);

            if !is_healable(failure.category) {
                info!(journey = %ir.id, category = %failure.category, "failure is not healable");
                break HealingOutcome::Unhealable;
            }
            if session.applied_count() >= self.settings.max_attempts as usize {
                warn!(
                    journey = %ir.id,
                    attempts = self.settings.max_attempts,
                    "healing circuit breaker tripped"
                );
                break HealingOutcome::CircuitBreakerTripped;
            }

            let target = self.locate(ir, test_path, &source_map, &failure);
            if let Some(locator) = target.and_then(|(si, ii)| ir.steps.get(si)?.instructions.get(ii)?.locator()) {
                if !tried_locators.contains(locator) {
                    tried_locators.push(locator.clone());
                }
            }
            let state = serde_json::to_string(&*ir)?;

            let mut chosen = None;
            for candidate in candidates(failure.category) {
                if candidate.fix_type.is_forbidden() {
                    debug!(fix = %candidate.fix_type, "skipping forbidden fix");
                    continue;
                }
                if !tried.insert(format!("{}|{state}", candidate.fix_type)) {
                    continue;
                }

                let mut patched = ir.clone();
                match apply_fix(candidate.fix_type, &mut patched, target, &self.resolver, &tried_locators) {
                    Some(description) => {
                        chosen = Some((candidate, description, patched));
                        break;
                    }
                    None => session.attempts.push(HealingAttempt {
                        category: failure.category,
                        fix_type: candidate.fix_type,
                        confidence: candidate.confidence,
                        applied: false,
                        result_status: AttemptStatus::NotApplicable,
                        description: None,
                        timestamp: Utc::now(),
                    }),
                }
            }

            let Some((candidate, description, patched)) = chosen else {
                info!(journey = %ir.id, category = %failure.category, "no untried fix applies");
                break HealingOutcome::Exhausted;
            };

            info!(
                journey = %ir.id,
                fix = %candidate.fix_type,
                confidence = candidate.confidence,
                %description,
                "applying fix"
            );
            *ir = patched;
            source_map = self.write(ir, test_path)?;
            outcome = run_test_file(executor, test_path).await;

            session.attempts.push(HealingAttempt {
                category: failure.category,
                fix_type: candidate.fix_type,
                confidence: candidate.confidence,
                applied: true,
                result_status: if outcome.passed() {
                    AttemptStatus::Passed
                } else {
                    AttemptStatus::Failed
                },
                description: Some(description),
                timestamp: Utc::now(),
            });
        };

        info!(
            journey = %ir.id,
            outcome = result.as_str(),
            applied = session.applied_count(),
            "healing finished"
        );
        session.finish(result);
        Ok(session)
    }
}
