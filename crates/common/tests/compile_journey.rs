//! Journey → IR → Playwright source, through the public API

use artk_common::codegen::CodeGenerator;
use artk_common::config::ArtkConfig;
use artk_common::journey::{build_ir, parse_journey, validate_journey};
use artk_common::telemetry::TelemetrySink;
use artk_common::{CascadingMatcher, LocatorResolver, LocatorSpec, LocatorStrategy, MatchContext};
use serde_json::json;
use tempfile::TempDir;

const JOURNEY: &str = r#"---
id: JRN-0042
title: Customer places an order
status: implemented
tier: release
actor: buyer
tags: [orders, checkout]
testData: orders
completion:
  - type: toast
    value: Order placed
---

## Acceptance Criteria

### AC-1: Cart
- **Action**: Navigate to "/cart"
- **Wait for**: "Checkout"
- Click the "Checkout" button

### AC-2: Details
- Fill in "Order name" with "{{runId:order}}"
- Enter "{{testData.orders.note}}" into the "Note" field
- Drag the item to the dropzone

### AC-3: Confirm
- Click the Submit button
- **Assert**: URL contains "/orders"
"#;

fn matcher() -> CascadingMatcher {
    CascadingMatcher::from_config(&ArtkConfig::default(), None, None).unwrap()
}

#[test]
fn test_click_submit_button_instruction_json() {
    let outcome = matcher().resolve("Click the Submit button", &mut MatchContext::new());
    assert_eq!(
        serde_json::to_value(&outcome.instruction).unwrap(),
        json!({
            "type": "click",
            "locator": {"strategy": "role", "value": "button", "options": {"name": "Submit"}}
        })
    );
}

#[test]
fn test_unresolvable_step_instruction_json() {
    let mut ctx = MatchContext::new();
    let outcome = matcher().resolve("Drag the item to the dropzone", &mut ctx);
    assert_eq!(
        serde_json::to_value(&outcome.instruction).unwrap(),
        json!({
            "type": "blocked",
            "reason": "no matching pattern",
            "sourceText": "Drag the item to the dropzone"
        })
    );
    assert_eq!(ctx.telemetry().len(), 1);
}

#[test]
fn test_forbidden_pattern_skips_to_allowed_candidate() {
    let resolver = LocatorResolver::default()
        .with_forbidden_patterns(&[r"#submit-\d+"])
        .unwrap();
    let candidates = vec![
        LocatorSpec::new(LocatorStrategy::Role, "button"),
        LocatorSpec::new(LocatorStrategy::Css, "#submit-1"),
    ];
    let chosen = resolver.resolve(&candidates).unwrap();
    assert_eq!(chosen.strategy, LocatorStrategy::Role);
}

#[test]
fn test_journey_compiles_generates_and_regenerates() {
    let tmp = TempDir::new().unwrap();
    let journey = parse_journey(JOURNEY, "order.md").unwrap();
    assert!(validate_journey(&journey).is_valid());

    let matcher = matcher();
    let mut ctx = MatchContext::new();
    let (ir, coverage) = build_ir(&journey, &matcher, &LocatorResolver::default(), &mut ctx);
    assert_eq!(coverage.blocked, 1);
    assert_eq!(ir.steps.last().unwrap().id, "completion");

    let sink = TelemetrySink::new(tmp.path().join("telemetry.jsonl"));
    sink.append(&ctx.drain_telemetry()).unwrap();
    assert_eq!(sink.read_all().unwrap().len(), 1);

    let generator = CodeGenerator::default();
    let generated = generator.generate(&ir);
    let path = tmp.path().join("tests").join(&generated.file_name);
    assert!(generator.write(&generated, &path).unwrap().created);

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("import { actors, testData } from '../fixtures';"));
    assert!(content.contains("`order-${runId}`"));
    assert!(content.contains("testData['orders'].note"));
    assert!(content.contains("throw new Error('ARTK BLOCKED: no matching pattern: Drag the item to the dropzone');"));
    assert!(content.contains("@release @orders @checkout"));

    // A hand edit between blocks survives regeneration, and an unchanged IR is a no-op
    let edited = content.replace(
        "    // ARTK:END GENERATED\n\n    // ARTK:BEGIN GENERATED id=AC-1",
        "    // ARTK:END GENERATED\n    await page.context().clearCookies();\n\n    // ARTK:BEGIN GENERATED id=AC-1",
    );
    assert_ne!(edited, content);
    std::fs::write(&path, &edited).unwrap();

    let (again, _) = build_ir(&journey, &matcher, &LocatorResolver::default(), &mut MatchContext::new());
    let outcome = generator.write(&generator.generate(&again), &path).unwrap();
    assert!(!outcome.changed);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), edited);
}
