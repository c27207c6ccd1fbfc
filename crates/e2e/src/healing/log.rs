//! Persisted audit log of healing sessions

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use artk_common::fsutil::write_json_atomic;

use super::fixes::FixType;
use crate::classifier::FailureCategory;
use crate::error::E2eResult;

/// Sessions kept in the log file
pub const MAX_SESSIONS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttemptStatus {
    /// Fix applied and the rerun passed
    Passed,
    /// Fix applied and the rerun still failed
    Failed,
    /// Fix did not apply to this journey
    NotApplicable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingAttempt {
    pub category: FailureCategory,
    pub fix_type: FixType,
    pub confidence: f64,
    pub applied: bool,
    pub result_status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealingOutcome {
    /// The test passes
    Healed,
    /// Failure category is outside the healable set
    Unhealable,
    /// No untried fix applies
    Exhausted,
    /// Attempt cap reached without a passing run
    CircuitBreakerTripped,
    /// Healing is turned off in configuration
    Disabled,
}

impl HealingOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealingOutcome::Healed => "healed",
            HealingOutcome::Unhealable => "unhealable",
            HealingOutcome::Exhausted => "exhausted",
            HealingOutcome::CircuitBreakerTripped => "circuitBreakerTripped",
            HealingOutcome::Disabled => "disabled",
        }
    }
}

/// One invocation of the healing loop for one journey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingSession {
    pub id: Uuid,
    pub journey_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts: Vec<HealingAttempt>,
    pub outcome: Option<HealingOutcome>,
    /// Last failure category seen
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_category: Option<FailureCategory>,
}

impl HealingSession {
    pub fn new(journey_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            journey_id: journey_id.into(),
            started_at: Utc::now(),
            finished_at: None,
            attempts: Vec::new(),
            outcome: None,
            last_category: None,
        }
    }

    /// Fixes applied and rerun
    pub fn applied_count(&self) -> usize {
        self.attempts.iter().filter(|a| a.applied).count()
    }

    pub fn finish(&mut self, outcome: HealingOutcome) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
    }

    pub fn is_healed(&self) -> bool {
        self.outcome == Some(HealingOutcome::Healed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LogFile {
    sessions: Vec<HealingSession>,
}

/// Bounded JSON log of healing sessions
#[derive(Debug, Clone)]
pub struct HealingLog {
    path: PathBuf,
}

impl HealingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recorded sessions, oldest first. An unreadable log reads as empty.
    pub fn sessions(&self) -> Vec<HealingSession> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        match serde_json::from_str::<LogFile>(&content) {
            Ok(log) => log.sessions,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "healing log unreadable, starting fresh");
                Vec::new()
            }
        }
    }

    /// Append a session, keeping the most recent entries
    pub fn append(&self, session: &HealingSession) -> E2eResult<()> {
        let mut sessions = self.sessions();
        sessions.push(session.clone());
        if sessions.len() > MAX_SESSIONS {
            let excess = sessions.len() - MAX_SESSIONS;
            sessions.drain(..excess);
        }
        write_json_atomic(&self.path, &LogFile { sessions })?;
        debug!(path = %self.path.display(), session = %session.id, "recorded healing session");
        Ok(())
    }
}
