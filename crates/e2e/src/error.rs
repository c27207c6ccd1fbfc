//! Error types for test execution and pipeline orchestration

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error(transparent)]
    Common(#[from] artk_common::Error),

    #[error("[ARTK-S002] {command} rejected: {reason}")]
    StageRejected { command: String, reason: String },

    #[error("[ARTK-J020] no journeys found under {0}")]
    NoJourneys(PathBuf),

    #[error("[ARTK-J021] {count} journey(s) failed analysis")]
    AnalysisFailed { count: usize },

    #[error("[ARTK-G010] no compiled IR for journey {0}; run plan first")]
    MissingIr(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl E2eError {
    /// Stable code, matching the `artk_common::Error` scheme
    pub fn code(&self) -> &'static str {
        match self {
            E2eError::Common(e) => e.code(),
            E2eError::StageRejected { .. } => "ARTK-S002",
            E2eError::NoJourneys(_) => "ARTK-J020",
            E2eError::AnalysisFailed { .. } => "ARTK-J021",
            E2eError::MissingIr(_) => "ARTK-G010",
            E2eError::Io(_) | E2eError::Json(_) => "ARTK-IO",
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
