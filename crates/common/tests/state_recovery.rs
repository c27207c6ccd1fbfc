//! Pipeline state persistence through the public API

use artk_common::state::{can_proceed_to, PipelineState, Stage, StateStore};
use tempfile::TempDir;

#[test]
fn test_transition_legality() {
    assert!(!can_proceed_to(Stage::Initial, Stage::Tested).allowed);
    assert!(can_proceed_to(Stage::Tested, Stage::Refining).allowed);
}

#[test]
fn test_invalid_json_is_backed_up_and_reset() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("pipeline-state.json");
    std::fs::write(&path, "{\"version\": \"1.0\", \"stage\": ").unwrap();

    let loaded = StateStore::new(&path).load();
    assert_eq!(loaded.state.stage, Stage::Initial);
    assert!(!path.exists());

    let backups: Vec<_> = std::fs::read_dir(tmp.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".corrupted."))
        .collect();
    assert_eq!(backups.len(), 1);
}

#[test]
fn test_state_survives_reload_after_each_command() {
    let tmp = TempDir::new().unwrap();
    let store = StateStore::new(tmp.path().join("state.json"));

    for (command, stage) in [
        ("analyze", Stage::Analyzed),
        ("plan", Stage::Planned),
        ("generate", Stage::Generated),
    ] {
        let mut state = store.load().state;
        state.transition(stage).unwrap();
        state.record(command, true);
        store.save(&state).unwrap();
    }

    let state = store.load().state;
    assert_eq!(state.stage, Stage::Generated);
    let commands: Vec<_> = state.history.iter().map(|h| h.command.as_str()).collect();
    assert_eq!(commands, vec!["analyze", "plan", "generate"]);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
    assert_eq!(json["version"], "1.0");
    assert_eq!(json["stage"], "generated");
    assert_eq!(json["lastCommand"], "generate");
    assert!(json["history"][0]["timestamp"].is_string());
}

#[test]
fn test_reset_returns_fresh_state() {
    let tmp = TempDir::new().unwrap();
    let store = StateStore::new(tmp.path().join("state.json"));
    let mut state = PipelineState::new();
    state.transition(Stage::Analyzed).unwrap();
    store.save(&state).unwrap();

    let fresh = store.reset().unwrap();
    assert_eq!(fresh.stage, Stage::Initial);
    assert_eq!(store.load().state.stage, Stage::Initial);
}
