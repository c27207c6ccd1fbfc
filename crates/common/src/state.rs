//! Pipeline state machine
//!
//! The multi-stage run (analyze → plan → generate → test → heal) is persisted in a
//! single JSON file so it can be resumed, audited or reset. Every transition is checked
//! against a fixed adjacency table before it is committed. A state file that cannot be
//! read, parsed or validated is moved aside and replaced by a fresh initial state.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fsutil::write_json_atomic;
use crate::{Error, Result};

pub const STATE_VERSION: &str = "1.0";

/// History entries kept in the state file
pub const MAX_HISTORY: usize = 50;

const KNOWN_FIELDS: &[&str] = &[
    "version",
    "stage",
    "lastCommand",
    "lastCommandAt",
    "journeyIds",
    "testPaths",
    "refinementAttempts",
    "isBlocked",
    "blockedReason",
    "history",
    "createdAt",
    "updatedAt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Initial,
    Analyzed,
    Planned,
    Generated,
    Tested,
    Refining,
    Completed,
    Blocked,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Initial,
        Stage::Analyzed,
        Stage::Planned,
        Stage::Generated,
        Stage::Tested,
        Stage::Refining,
        Stage::Completed,
        Stage::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Initial => "initial",
            Stage::Analyzed => "analyzed",
            Stage::Planned => "planned",
            Stage::Generated => "generated",
            Stage::Tested => "tested",
            Stage::Refining => "refining",
            Stage::Completed => "completed",
            Stage::Blocked => "blocked",
        }
    }

    /// Stages reachable from this one
    pub fn successors(&self) -> &'static [Stage] {
        use Stage::*;
        match self {
            Initial => &[Analyzed],
            Analyzed => &[Planned, Initial, Analyzed],
            Planned => &[Generated, Analyzed, Initial],
            Generated => &[Tested, Generated, Planned, Initial],
            Tested => &[Refining, Completed, Generated, Initial],
            Refining => &[Tested, Refining, Completed, Blocked, Initial],
            Completed => &[Initial, Analyzed],
            Blocked => &[Initial, Analyzed],
        }
    }

    pub fn can_transition_to(&self, target: Stage) -> bool {
        self.successors().contains(&target)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict of a transition check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionCheck {
    pub allowed: bool,
    pub reason: String,
}

/// Whether `from → to` is a legal transition, with a human-readable reason
pub fn can_proceed_to(from: Stage, to: Stage) -> TransitionCheck {
    if from.can_transition_to(to) {
        return TransitionCheck {
            allowed: true,
            reason: format!("{from} -> {to} is allowed"),
        };
    }

    let allowed = from
        .successors()
        .iter()
        .map(Stage::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let reason = if from == Stage::Blocked {
        format!("pipeline is blocked; reset to initial or re-analyze (allowed: {allowed})")
    } else {
        format!("{from} can only move to: {allowed}")
    };
    TransitionCheck {
        allowed: false,
        reason,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub command: String,
    pub stage: Stage,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

/// Persisted pipeline state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub version: String,
    pub stage: Stage,
    #[serde(default)]
    pub last_command: Option<String>,
    #[serde(default)]
    pub last_command_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub journey_ids: Vec<String>,
    #[serde(default)]
    pub test_paths: Vec<String>,
    #[serde(default)]
    pub refinement_attempts: u32,
    #[serde(default)]
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION.to_string(),
            stage: Stage::Initial,
            last_command: None,
            last_command_at: None,
            journey_ids: Vec::new(),
            test_paths: Vec::new(),
            refinement_attempts: 0,
            is_blocked: false,
            blocked_reason: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_proceed_to(&self, target: Stage) -> TransitionCheck {
        can_proceed_to(self.stage, target)
    }

    /// Move to `target`, leaving the state untouched if the move is illegal
    pub fn transition(&mut self, target: Stage) -> Result<()> {
        let check = self.can_proceed_to(target);
        if !check.allowed {
            return Err(Error::InvalidStateTransition {
                from: self.stage.to_string(),
                to: target.to_string(),
                reason: check.reason,
            });
        }

        debug!(from = %self.stage, to = %target, "stage transition");
        self.stage = target;
        match target {
            Stage::Blocked => self.is_blocked = true,
            Stage::Initial | Stage::Analyzed => {
                self.is_blocked = false;
                self.blocked_reason = None;
            }
            _ => {}
        }
        if target == Stage::Initial {
            self.refinement_attempts = 0;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Enter `blocked` with a reason for the human who has to intervene
    pub fn block(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(Stage::Blocked)?;
        self.blocked_reason = Some(reason.into());
        Ok(())
    }

    /// Append a history entry for `command`, trimming to the most recent entries
    pub fn record(&mut self, command: &str, success: bool) {
        let now = Utc::now();
        self.history.push(HistoryEntry {
            command: command.to_string(),
            stage: self.stage,
            timestamp: now,
            success,
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
        self.last_command = Some(command.to_string());
        self.last_command_at = Some(now);
        self.updated_at = now;
    }

    fn check_schema(&self) -> std::result::Result<(), String> {
        if self.version != STATE_VERSION {
            return Err(format!("unsupported state version '{}'", self.version));
        }
        if self.is_blocked != (self.stage == Stage::Blocked) {
            return Err(format!(
                "isBlocked={} disagrees with stage '{}'",
                self.is_blocked, self.stage
            ));
        }
        if self.history.len() > MAX_HISTORY {
            return Err(format!("history has {} entries", self.history.len()));
        }
        Ok(())
    }
}

/// Result of loading a state file
#[derive(Debug, Clone)]
pub struct LoadedState {
    pub state: PipelineState,
    /// Where a corrupt file was moved, if recovery happened
    pub recovered_from: Option<PathBuf>,
    /// Unknown top-level fields that were ignored
    pub unknown_fields: Vec<String>,
}

/// Reads and writes the pipeline state file
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parse(content: &str) -> std::result::Result<(PipelineState, Vec<String>), String> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| format!("invalid JSON: {e}"))?;
        let object = value
            .as_object()
            .ok_or_else(|| "state is not a JSON object".to_string())?;
        let unknown = object
            .keys()
            .filter(|k| !KNOWN_FIELDS.contains(&k.as_str()))
            .cloned()
            .collect();

        let state: PipelineState =
            serde_json::from_value(value).map_err(|e| format!("schema mismatch: {e}"))?;
        state.check_schema()?;
        Ok((state, unknown))
    }

    fn backup_path(&self) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".corrupted.{stamp}"));
        PathBuf::from(name)
    }

    /// Load the state, recovering from corruption. Never fails.
    pub fn load(&self) -> LoadedState {
        let fresh = |recovered_from| LoadedState {
            state: PipelineState::new(),
            recovered_from,
            unknown_fields: Vec::new(),
        };

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return fresh(None),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "state file unreadable");
                return fresh(self.quarantine());
            }
        };

        match Self::parse(&content) {
            Ok((state, unknown_fields)) => {
                if !unknown_fields.is_empty() {
                    warn!(
                        path = %self.path.display(),
                        fields = ?unknown_fields,
                        "ignoring unknown state fields"
                    );
                }
                LoadedState {
                    state,
                    recovered_from: None,
                    unknown_fields,
                }
            }
            Err(reason) => {
                warn!(path = %self.path.display(), %reason, "state file corrupted, resetting");
                fresh(self.quarantine())
            }
        }
    }

    /// Move the current file aside so a fresh state can replace it
    fn quarantine(&self) -> Option<PathBuf> {
        let backup = self.backup_path();
        match std::fs::rename(&self.path, &backup) {
            Ok(()) => {
                info!(backup = %backup.display(), "backed up corrupted state");
                Some(backup)
            }
            Err(e) => {
                warn!(error = %e, "could not back up corrupted state");
                None
            }
        }
    }

    pub fn save(&self, state: &PipelineState) -> Result<()> {
        write_json_atomic(&self.path, state)
    }

    /// Reset to a fresh state and persist it
    pub fn reset(&self) -> Result<PipelineState> {
        let state = PipelineState::new();
        self.save(&state)?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_case::test_case;

    #[test_case(Stage::Initial, Stage::Tested, false ; "initial cannot skip to tested")]
    #[test_case(Stage::Tested, Stage::Refining, true ; "tested to refining")]
    #[test_case(Stage::Tested, Stage::Completed, true ; "tested to completed")]
    #[test_case(Stage::Refining, Stage::Blocked, true ; "refining to blocked")]
    #[test_case(Stage::Blocked, Stage::Generated, false ; "blocked needs restart")]
    #[test_case(Stage::Blocked, Stage::Analyzed, true ; "blocked to analyzed")]
    #[test_case(Stage::Completed, Stage::Initial, true ; "completed to initial")]
    #[test_case(Stage::Initial, Stage::Initial, false ; "initial is not reentrant")]
    fn test_transition_table(from: Stage, to: Stage, allowed: bool) {
        assert_eq!(can_proceed_to(from, to).allowed, allowed);
    }

    #[test]
    fn test_every_stage_can_reach_initial_or_is_initial() {
        for stage in Stage::ALL {
            assert!(stage == Stage::Initial || stage.can_transition_to(Stage::Initial));
        }
    }

    #[test]
    fn test_rejected_transition_leaves_state_unchanged() {
        let mut state = PipelineState::new();
        let before = state.clone();
        let err = state.transition(Stage::Tested).unwrap_err();
        assert_eq!(err.code(), "ARTK-S001");
        assert_eq!(state, before);
    }

    #[test]
    fn test_block_and_reset() {
        let mut state = PipelineState::new();
        for stage in [
            Stage::Analyzed,
            Stage::Planned,
            Stage::Generated,
            Stage::Tested,
            Stage::Refining,
        ] {
            state.transition(stage).unwrap();
        }
        state.block("healing exhausted").unwrap();
        assert!(state.is_blocked);
        assert_eq!(state.blocked_reason.as_deref(), Some("healing exhausted"));

        state.transition(Stage::Initial).unwrap();
        assert!(!state.is_blocked);
        assert!(state.blocked_reason.is_none());
    }

    #[test]
    fn test_history_is_capped() {
        let mut state = PipelineState::new();
        for i in 0..(MAX_HISTORY + 5) {
            state.record(&format!("cmd-{i}"), true);
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].command, "cmd-5");
        assert_eq!(state.last_command.as_deref(), Some("cmd-54"));
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join(".artk/state.json"));
        let mut state = PipelineState::new();
        state.transition(Stage::Analyzed).unwrap();
        state.journey_ids.push("JRN-0001".to_string());
        state.record("analyze", true);
        store.save(&state).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.state, state);
        assert!(loaded.recovered_from.is_none());
    }

    #[test]
    fn test_missing_file_is_fresh() {
        let tmp = TempDir::new().unwrap();
        let loaded = StateStore::new(tmp.path().join("state.json")).load();
        assert_eq!(loaded.state.stage, Stage::Initial);
        assert!(loaded.recovered_from.is_none());
    }

    #[test]
    fn test_unknown_fields_tolerated() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let mut value = serde_json::to_value(PipelineState::new()).unwrap();
        value["futureField"] = serde_json::json!(42);
        std::fs::write(store.path(), value.to_string()).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.unknown_fields, vec!["futureField".to_string()]);
        assert!(loaded.recovered_from.is_none());
        assert!(store.path().exists());
    }

    #[test_case(r#"{ not json"# ; "invalid json")]
    #[test_case(r#"[1, 2]"# ; "not an object")]
    #[test_case(r#"{"version": "1.0", "stage": "exploded"}"# ; "unknown stage")]
    fn test_corruption_is_backed_up(content: &str) {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        std::fs::write(store.path(), content).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.state.stage, Stage::Initial);
        assert!(!store.path().exists());
        let backup = loaded.recovered_from.unwrap();
        assert!(backup.exists());
        assert!(backup.to_string_lossy().contains("state.json.corrupted."));
    }

    #[test]
    fn test_version_mismatch_is_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path().join("state.json"));
        let mut value = serde_json::to_value(PipelineState::new()).unwrap();
        value["version"] = serde_json::json!("0.9");
        std::fs::write(store.path(), value.to_string()).unwrap();

        assert!(store.load().recovered_from.is_some());
    }
}
