//! Full command sequence against a scratch project, with `sh` standing in for Playwright

use artk_common::config::ArtkConfig;
use artk_common::matcher::MatchTier;
use artk_common::state::Stage;
use artk_e2e::{E2eError, HealingLog, HealingOutcome, Pipeline};
use tempfile::TempDir;

const JOURNEY: &str = r#"---
id: JRN-0007
title: User signs in
status: clarified
tier: smoke
tags: [auth]
completion:
  - type: url
    value: /dashboard
---

## Acceptance Criteria

### AC-1: Sign in
- **Action**: Navigate to "/login"
- Fill in "Email" with "user@example.com"
- Click the "Sign in" button
- **Assert**: "Welcome back" is visible
"#;

const TIMEOUT_OUTPUT: &str = "echo '  1) signs-in.spec.ts › User signs in'; \
     echo '    Error: Timed out 5000ms waiting for expect(locator).toBeVisible()'; \
     exit 1";

fn project(script: &str) -> (TempDir, Pipeline) {
    let tmp = TempDir::new().unwrap();
    let journeys = tmp.path().join("journeys");
    std::fs::create_dir_all(&journeys).unwrap();
    std::fs::write(journeys.join("signs-in.md"), JOURNEY).unwrap();

    let mut config = ArtkConfig::default();
    config.runner.command = vec!["sh".into(), "-c".into(), script.into(), "sh".into()];
    config.runner.timeout_secs = 30;
    config.runner.retries = 0;
    let pipeline = Pipeline::new(tmp.path(), config).unwrap();
    (tmp, pipeline)
}

fn stage(pipeline: &Pipeline) -> Stage {
    pipeline.status().state.stage
}

fn prepare(pipeline: &Pipeline) {
    let journeys = pipeline.analyze(&[]).unwrap();
    assert_eq!(journeys.len(), 1);
    assert_eq!(journeys[0].id, "JRN-0007");

    let coverage = pipeline.plan().unwrap();
    assert_eq!(coverage[0].blocked, 0);
    assert!(pipeline.paths().ir_dir.join("JRN-0007.json").exists());

    let files = pipeline.generate().unwrap();
    assert!(files[0].created);
    assert!(files[0].path.ends_with("jrn-0007-user-signs-in.spec.ts"));
}

#[tokio::test]
async fn test_passing_run_completes_pipeline() {
    let (_tmp, pipeline) = project("test -f \"$1\"");
    prepare(&pipeline);

    let report = pipeline.test().await.unwrap();
    assert!(report.outcome.passed());
    assert!(report.failures.is_empty());

    let state = pipeline.status().state;
    assert_eq!(state.stage, Stage::Completed);
    let commands: Vec<&str> = state.history.iter().map(|h| h.command.as_str()).collect();
    assert_eq!(commands, ["analyze", "plan", "generate", "test"]);
    assert!(state.history.iter().all(|h| h.success));
    assert_eq!(state.test_paths.len(), 1);
}

#[tokio::test]
async fn test_heal_raises_timeouts_until_pass() {
    let script = format!("grep -q 'timeout: 10000' \"$1\" && exit 0; {TIMEOUT_OUTPUT}");
    let (_tmp, pipeline) = project(&script);
    prepare(&pipeline);

    let report = pipeline.test().await.unwrap();
    assert!(!report.outcome.passed());
    assert_eq!(report.failures[0].category.as_str(), "timeout");
    assert_eq!(stage(&pipeline), Stage::Tested);

    let healed = pipeline.heal().await.unwrap();
    assert_eq!(healed.stage, Stage::Completed);
    assert_eq!(healed.sessions.len(), 1);
    assert_eq!(healed.sessions[0].outcome, Some(HealingOutcome::Healed));

    let state = pipeline.status().state;
    assert_eq!(state.refinement_attempts, 1);

    // The fix lands in the persisted IR so later generations keep it
    let ir = std::fs::read_to_string(pipeline.paths().ir_dir.join("JRN-0007.json")).unwrap();
    assert!(ir.contains("10000"));
    let logged = HealingLog::new(&pipeline.paths().healing_log).sessions();
    assert_eq!(logged.len(), 1);
}

#[tokio::test]
async fn test_heal_stops_at_attempt_cap_and_blocks() {
    let (_tmp, pipeline) = project(TIMEOUT_OUTPUT);
    prepare(&pipeline);
    pipeline.test().await.unwrap();

    let report = pipeline.heal().await.unwrap();
    assert_eq!(report.stage, Stage::Blocked);
    let session = &report.sessions[0];
    assert_eq!(session.outcome, Some(HealingOutcome::CircuitBreakerTripped));
    assert_eq!(session.applied_count(), 3);

    let state = pipeline.status().state;
    assert!(state.is_blocked);
    assert!(state.blocked_reason.unwrap().contains("JRN-0007"));
    assert!(!state.history.last().unwrap().success);

    // Blocked only allows a restart
    let err = pipeline.generate().unwrap_err();
    assert!(matches!(err, E2eError::StageRejected { .. }));
    pipeline.clean().unwrap();
    assert_eq!(stage(&pipeline), Stage::Initial);
}

#[tokio::test]
async fn test_out_of_order_command_leaves_state_alone() {
    let (_tmp, pipeline) = project("exit 0");
    let err = pipeline.test().await.unwrap_err();
    assert!(matches!(err, E2eError::StageRejected { .. }));
    assert_eq!(err.code(), "ARTK-S002");
    assert!(!pipeline.paths().state_file.exists());

    pipeline.analyze(&[]).unwrap();
    let before = std::fs::read_to_string(&pipeline.paths().state_file).unwrap();
    assert!(pipeline.generate().is_err());
    let after = std::fs::read_to_string(&pipeline.paths().state_file).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_clean_drops_ir_but_keeps_tests() {
    let (_tmp, pipeline) = project("exit 0");
    prepare(&pipeline);
    let test_file = pipeline.paths().tests_dir.join("jrn-0007-user-signs-in.spec.ts");

    let state = pipeline.clean().unwrap();
    assert_eq!(state.stage, Stage::Initial);
    assert_eq!(state.history.len(), 1);
    assert!(!pipeline.paths().ir_dir.exists());
    assert!(test_file.exists());
}

#[test]
fn test_analyze_rejects_invalid_journey() {
    let (tmp, pipeline) = project("exit 0");
    std::fs::write(
        tmp.path().join("journeys").join("draft.md"),
        JOURNEY.replace("JRN-0007", "JRN-0008").replace("clarified", "proposed"),
    )
    .unwrap();

    let err = pipeline.analyze(&[]).unwrap_err();
    assert!(matches!(err, E2eError::AnalysisFailed { count: 1 }));
    let state = pipeline.status().state;
    assert_eq!(state.stage, Stage::Initial);
    assert!(!state.history[0].success);

    // Restricting to the ready journey succeeds
    let journeys = pipeline.analyze(&["JRN-0007".to_string()]).unwrap();
    assert_eq!(journeys.len(), 1);
    assert_eq!(stage(&pipeline), Stage::Analyzed);
}

#[test]
fn test_analyze_without_journeys() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::new(tmp.path(), ArtkConfig::default()).unwrap();
    let err = pipeline.analyze(&[]).unwrap_err();
    assert!(matches!(err, E2eError::NoJourneys(_)));
}

const ODD_STEP_JOURNEY_LINE: &str = "- Zorblax the quux";

fn project_with_odd_step(configure: impl FnOnce(&mut ArtkConfig)) -> (TempDir, Pipeline) {
    let tmp = TempDir::new().unwrap();
    let journeys = tmp.path().join("journeys");
    std::fs::create_dir_all(&journeys).unwrap();
    let journey = JOURNEY.replace(
        "- Click the \"Sign in\" button",
        &format!("- Click the \"Sign in\" button\n{ODD_STEP_JOURNEY_LINE}"),
    );
    std::fs::write(journeys.join("signs-in.md"), journey).unwrap();

    let mut config = ArtkConfig::default();
    config.runner.command = vec!["sh".into(), "-c".into(), "exit 0".into(), "sh".into()];
    configure(&mut config);
    let pipeline = Pipeline::new(tmp.path(), config).unwrap();
    (tmp, pipeline)
}

#[test]
fn test_plan_reads_learned_mappings_without_writing() {
    let lessons = r#"{"lessons": [{"trigger": "Zorblax the quux",
        "instruction": {"type": "click", "locator": {"strategy": "testid", "value": "quux"}},
        "confidence": 0.95, "stable": true}]}"#;
    let (tmp, pipeline) = project_with_odd_step(|config| {
        config.matcher.knowledge_path = Some("knowledge.json".into());
    });
    let knowledge = tmp.path().join("knowledge.json");
    std::fs::write(&knowledge, lessons).unwrap();

    pipeline.analyze(&[]).unwrap();
    let coverage = pipeline.plan().unwrap();
    assert_eq!(coverage[0].blocked, 0);
    assert_eq!(coverage[0].by_tier.get(&MatchTier::Knowledge), Some(&1));
    assert_eq!(std::fs::read_to_string(&knowledge).unwrap(), lessons);
}

#[test]
fn test_plan_uses_configured_ai_command() {
    let reply = r#"{"type": "click", "locator": {"strategy": "testid", "value": "quux"}}"#;
    let (_tmp, pipeline) = project_with_odd_step(|config| {
        config.ai.enabled = true;
        config.ai.command = vec![
            "sh".into(),
            "-c".into(),
            format!("cat > /dev/null; echo '{reply}'"),
        ];
    });

    pipeline.analyze(&[]).unwrap();
    let coverage = pipeline.plan().unwrap();
    assert_eq!(coverage[0].blocked, 0);
    assert_eq!(coverage[0].by_tier.get(&MatchTier::Ai), Some(&1));
    let ir = std::fs::read_to_string(pipeline.paths().ir_dir.join("JRN-0007.json")).unwrap();
    assert!(ir.contains("quux"));
}

#[test]
fn test_plan_without_ai_blocks_unknown_step() {
    let (_tmp, pipeline) = project_with_odd_step(|_| {});
    pipeline.analyze(&[]).unwrap();
    let coverage = pipeline.plan().unwrap();
    assert_eq!(coverage[0].blocked, 1);
}
